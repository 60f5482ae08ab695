//! Bridge events: what the host entity framework gets told.
//!
//! Produced by the coordinator in the `app` crate and fanned out through the
//! event bus. Points are created once and refreshed in place, so the host
//! only ever sees additions and value updates.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::device::DeviceSn;
use crate::liveness::{LivenessPolicy, LivenessState, LivenessTracker};
use crate::point::{BatteryPoint, DeviceClass, PointValue, Unit};
use crate::time::Timestamp;

/// Something observable happened on a device.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// A device was configured with the named catalog.
    DeviceAdded {
        sn: DeviceSn,
        display_name: String,
        catalog: &'static str,
    },
    /// Point values were re-derived after new data arrived.
    PointsRefreshed {
        sn: DeviceSn,
        readings: Vec<PointReading>,
    },
    /// A battery module was seen for the first time.
    ModuleDiscovered { sn: DeviceSn, point: BatteryPoint },
    /// The status point changed (state or escalation counters).
    StatusChanged { sn: DeviceSn, report: StatusReport },
    /// A set-command was published.
    CommandSent {
        sn: DeviceSn,
        key: String,
        value: Value,
    },
}

impl BridgeEvent {
    /// Device the event is about.
    #[must_use]
    pub fn sn(&self) -> &DeviceSn {
        match self {
            Self::DeviceAdded { sn, .. }
            | Self::PointsRefreshed { sn, .. }
            | Self::ModuleDiscovered { sn, .. }
            | Self::StatusChanged { sn, .. }
            | Self::CommandSent { sn, .. } => sn,
        }
    }
}

/// Value of one point after a refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct PointReading {
    pub key: String,
    pub value: PointValue,
    pub unit: Option<Unit>,
    pub device_class: Option<DeviceClass>,
    pub attributes: BTreeMap<String, Value>,
    /// Units of the entries in `attributes` that have one.
    pub attribute_units: BTreeMap<String, Unit>,
}

impl PointReading {
    #[must_use]
    pub fn new(key: impl Into<String>, value: PointValue) -> Self {
        Self {
            key: key.into(),
            value,
            unit: None,
            device_class: None,
            attributes: BTreeMap::new(),
            attribute_units: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn described(mut self, unit: Option<Unit>, device_class: Option<DeviceClass>) -> Self {
        self.unit = unit;
        self.device_class = device_class;
        self
    }
}

/// State and attributes of a device's status point.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub state: LivenessState,
    pub serial: DeviceSn,
    pub last_data_update: Option<Timestamp>,
    pub mqtt_connected: Option<bool>,
    /// Re-poll policy only.
    pub quota_requests: Option<u64>,
    /// Reconnect policy only.
    pub reconnects: Option<u64>,
    /// Reconnect policy only.
    pub reconnect_phase: Option<u32>,
}

impl StatusReport {
    #[must_use]
    pub fn from_tracker(
        sn: &DeviceSn,
        tracker: &LivenessTracker,
        mqtt_connected: Option<bool>,
    ) -> Self {
        let repoll = tracker.policy() == LivenessPolicy::QuotaRepoll;
        let reconnect = tracker.policy() == LivenessPolicy::Reconnect;
        Self {
            state: tracker.state(),
            serial: sn.clone(),
            last_data_update: tracker.last_data_update(),
            mqtt_connected,
            quota_requests: repoll.then(|| tracker.quota_requests()),
            reconnects: reconnect.then(|| tracker.reconnects()),
            reconnect_phase: reconnect.then(|| tracker.reconnect_phase()),
        }
    }
}
