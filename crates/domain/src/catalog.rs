//! Per-product point catalogs.
//!
//! Which sensor maps to which flat key is static data; each catalog also
//! names the liveness policy of the device's status point.

use crate::liveness::LivenessPolicy;
use crate::point::{
    CommandTemplate, DeviceClass, PointSpec, SelectOption, StateClass, Unit, ValueTransform,
};

/// Static point list for one product family.
#[derive(Debug)]
pub struct Catalog {
    pub name: &'static str,
    /// Normalized product-name prefixes this catalog applies to.
    pub product_prefixes: &'static [&'static str],
    pub liveness: LivenessPolicy,
    pub points: &'static [PointSpec],
}

impl Catalog {
    /// Point bound to `key`.
    #[must_use]
    pub fn point(&self, key: &str) -> Option<&PointSpec> {
        self.points.iter().find(|point| point.key == key)
    }

    fn matches(&self, product_type: &str) -> bool {
        let normalized: String = product_type
            .chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect();
        self.product_prefixes
            .iter()
            .any(|prefix| normalized.starts_with(prefix))
    }
}

/// All known catalogs, most specific first.
pub static CATALOGS: &[&Catalog] = &[&POWER_OCEAN];

/// Catalog for a cloud-reported product name; [`DIAGNOSTIC`] when unknown.
#[must_use]
pub fn catalog_for(product_type: &str) -> &'static Catalog {
    CATALOGS
        .iter()
        .copied()
        .find(|catalog| catalog.matches(product_type))
        .unwrap_or(&DIAGNOSTIC)
}

/// Unknown products: only the status point.
pub static DIAGNOSTIC: Catalog = Catalog {
    name: "diagnostic",
    product_prefixes: &[],
    liveness: LivenessPolicy::Plain,
    points: &[],
};

const fn tcp(id: u32, field: &'static str) -> CommandTemplate {
    CommandTemplate { id, field }
}

const fn level(key: &'static str, name: &'static str) -> PointSpec {
    PointSpec::sensor(key, name, ValueTransform::Identity)
        .unit(Unit::Percent)
        .class(DeviceClass::Battery, StateClass::Measurement)
}

const fn watts(key: &'static str, name: &'static str) -> PointSpec {
    PointSpec::sensor(key, name, ValueTransform::Identity)
        .unit(Unit::Watt)
        .class(DeviceClass::Power, StateClass::Measurement)
}

const fn volts(key: &'static str, name: &'static str) -> PointSpec {
    PointSpec::sensor(key, name, ValueTransform::Identity)
        .unit(Unit::Volt)
        .class(DeviceClass::Voltage, StateClass::Measurement)
        .diagnostic()
}

const fn amps(key: &'static str, name: &'static str) -> PointSpec {
    PointSpec::sensor(key, name, ValueTransform::Identity)
        .unit(Unit::MilliAmpere)
        .class(DeviceClass::Current, StateClass::Measurement)
        .diagnostic()
}

const fn temperature(key: &'static str, name: &'static str) -> PointSpec {
    PointSpec::sensor(key, name, ValueTransform::Identity)
        .unit(Unit::Celsius)
        .class(DeviceClass::Temperature, StateClass::Measurement)
        .diagnostic()
}

const DC_CHARGE_CURRENT_OPTIONS: &[SelectOption] = &[
    SelectOption { label: "4A", value: 4000 },
    SelectOption { label: "6A", value: 6000 },
    SelectOption { label: "8A", value: 8000 },
];

const SCREEN_TIMEOUT_OPTIONS: &[SelectOption] = &[
    SelectOption { label: "Never", value: 0 },
    SelectOption { label: "10 sec", value: 10 },
    SelectOption { label: "30 sec", value: 30 },
    SelectOption { label: "1 min", value: 60 },
    SelectOption { label: "5 min", value: 300 },
    SelectOption { label: "30 min", value: 1800 },
];

/// PowerOcean home battery system.
pub static POWER_OCEAN: Catalog = Catalog {
    name: "power_ocean",
    product_prefixes: &["powerocean"],
    liveness: LivenessPolicy::QuotaRepoll,
    points: &[
        level("bpSoc", "Battery level"),
        watts("bpPwr", "Battery power"),
        volts("pcsAPhase.vol", "Phase A voltage"),
        watts("pcsAPhase.actPwr", "Phase A active power"),
        watts("pcsAPhase.reactPwr", "Phase A reactive power"),
        amps("pcsAPhase.amp", "Phase A current"),
        volts("pcsBPhase.vol", "Phase B voltage"),
        watts("pcsBPhase.actPwr", "Phase B active power"),
        watts("pcsBPhase.reactPwr", "Phase B reactive power"),
        amps("pcsBPhase.amp", "Phase B current"),
        volts("pcsCPhase.vol", "Phase C voltage"),
        watts("pcsCPhase.actPwr", "Phase C active power"),
        watts("pcsCPhase.reactPwr", "Phase C reactive power"),
        amps("pcsCPhase.amp", "Phase C current"),
        watts("sysLoadPwr", "System load power"),
        watts("sysGridPwr", "Grid power"),
        watts("mpptPwr", "Solar power"),
        volts("mpptPv1.vol", "Solar string 1 voltage"),
        amps("mpptPv1.amp", "Solar string 1 current"),
        volts("mpptPv2.vol", "Solar string 2 voltage"),
        amps("mpptPv2.amp", "Solar string 2 current"),
        temperature("sectorA.tempCurr", "Zone A temperature"),
        temperature("sectorB.tempCurr", "Zone B temperature"),
        temperature("hpMaster.tempInlet", "Inlet temperature"),
        temperature("hpMaster.tempOutlet", "Outlet temperature"),
        temperature("hpMaster.tempAmbient", "Ambient temperature"),
        PointSpec::number(
            "ems.maxChargeSoc",
            "Max charge level",
            50.0,
            100.0,
            tcp(49, "maxChgSoc"),
        )
        .unit(Unit::Percent),
        PointSpec::number(
            "ems.minDsgSoc",
            "Min discharge level",
            0.0,
            30.0,
            tcp(51, "minDsgSoc"),
        )
        .unit(Unit::Percent),
        PointSpec::number(
            "inv.cfgSlowChgWatts",
            "AC charging power",
            200.0,
            2900.0,
            tcp(69, "slowChgPower"),
        )
        .unit(Unit::Watt),
        PointSpec::switch("sysGridPwr.enabled", "Grid connection", tcp(72, "enabled")),
        PointSpec::switch(
            "sectorDhw.powerHeatEnabled",
            "Heating enabled",
            tcp(91, "enabled"),
        ),
        PointSpec::select(
            "mppt.cfgDcChgCurrent",
            "DC charge current",
            DC_CHARGE_CURRENT_OPTIONS,
            tcp(71, "currMa"),
        ),
        PointSpec::select(
            "pd.lcdOffSec",
            "Screen timeout",
            SCREEN_TIMEOUT_OPTIONS,
            tcp(39, "lcdTime"),
        ),
    ],
};

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use serde_json::json;

    use super::*;

    #[test]
    fn should_pick_power_ocean_regardless_of_spacing_and_case() {
        assert_eq!(catalog_for("PowerOcean").name, "power_ocean");
        assert_eq!(catalog_for("Power Ocean Plus").name, "power_ocean");
    }

    #[test]
    fn should_fall_back_to_diagnostic_when_product_unknown() {
        let catalog = catalog_for("Delta Pro");
        assert_eq!(catalog.name, "diagnostic");
        assert!(catalog.points.is_empty());
        assert_eq!(catalog.liveness, LivenessPolicy::Plain);
    }

    #[test]
    fn should_use_quota_repoll_for_power_ocean() {
        assert_eq!(POWER_OCEAN.liveness, LivenessPolicy::QuotaRepoll);
    }

    #[test]
    fn should_have_unique_keys() {
        let keys: BTreeSet<_> = POWER_OCEAN.points.iter().map(|p| p.key).collect();
        assert_eq!(keys.len(), POWER_OCEAN.points.len());
    }

    #[test]
    fn should_expose_seven_writable_points() {
        let writable = POWER_OCEAN.points.iter().filter(|p| p.is_writable());
        assert_eq!(writable.count(), 7);
    }

    #[test]
    fn should_build_vendor_command_for_charge_limit() {
        let point = POWER_OCEAN.point("ems.maxChargeSoc").unwrap();
        let command = point.build_command(&json!(90)).unwrap();
        assert_eq!(command.message["params"]["id"], json!(49));
        assert_eq!(command.message["params"]["maxChgSoc"], json!(90));
    }

    #[test]
    fn should_build_heating_switch_command() {
        let point = POWER_OCEAN.point("sectorDhw.powerHeatEnabled").unwrap();
        let command = point.build_command(&json!(true)).unwrap();
        assert_eq!(
            serde_json::Value::Object(command.message),
            json!({"moduleType": 0, "operateType": "TCP", "params": {"id": 91, "enabled": 1}})
        );
    }
}
