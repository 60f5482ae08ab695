//! Device runtime: everything the bridge holds for one device.
//!
//! Ties the domain pieces together: store, battery discovery, liveness and
//! the device's point catalog. A runtime has a single owner; the
//! [`Bridge`](super::bridge::Bridge) serializes access behind a mutex and
//! never holds it across an `await`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};

use efbridge_domain::catalog::{self, Catalog};
use efbridge_domain::device::{DeviceInfo, DeviceSn, MessageClass};
use efbridge_domain::discovery::ModuleTracker;
use efbridge_domain::error::{BridgeError, NotFoundError, PayloadError};
use efbridge_domain::event::{PointReading, StatusReport};
use efbridge_domain::liveness::{Evaluation, LivenessThresholds, LivenessTracker};
use efbridge_domain::params::ParameterMap;
use efbridge_domain::payload::{NormalizeIssue, Normalizer, RawMessage};
use efbridge_domain::point::{
    BatteryPoint, PointValue, Reading, SetCommand, battery_attribute_unit,
};
use efbridge_domain::store::{DeviceData, StoreConfig};
use efbridge_domain::time::{self, Timestamp};

/// Tuning shared by every device runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    pub store: StoreConfig,
    pub thresholds: LivenessThresholds,
}

/// Runtime state of one configured device.
#[derive(Debug)]
pub struct DeviceRuntime {
    info: DeviceInfo,
    catalog: &'static Catalog,
    data: DeviceData,
    modules: ModuleTracker,
    batteries: Vec<BatteryPoint>,
    liveness: LivenessTracker,
    last_broadcast: Timestamp,
    shown: BTreeMap<String, PointValue>,
}

impl DeviceRuntime {
    /// Runtime for `info`, using the catalog matching its product type.
    #[must_use]
    pub fn new(info: DeviceInfo, config: RuntimeConfig) -> Self {
        let catalog = catalog::catalog_for(&info.product_type);
        Self {
            liveness: LivenessTracker::new(catalog.liveness, config.thresholds),
            data: DeviceData::new(config.store),
            info,
            catalog,
            modules: ModuleTracker::new(),
            batteries: Vec::new(),
            last_broadcast: time::never(),
            shown: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn sn(&self) -> &DeviceSn {
        &self.info.sn
    }

    #[must_use]
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    #[must_use]
    pub fn catalog(&self) -> &'static Catalog {
        self.catalog
    }

    #[must_use]
    pub fn data(&self) -> &DeviceData {
        &self.data
    }

    #[must_use]
    pub fn liveness(&self) -> &LivenessTracker {
        &self.liveness
    }

    /// Battery points materialised so far.
    #[must_use]
    pub fn batteries(&self) -> &[BatteryPoint] {
        &self.batteries
    }

    /// Immutable view of the parameters for concurrent readers.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ParameterMap> {
        self.data.snapshot()
    }

    /// Route one decoded message to the store operation for its class.
    ///
    /// Only data messages are normalized; the other classes are recorded as
    /// received.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] when the message lacks the substructure its
    /// class needs. The store is not modified for data and status messages.
    pub fn ingest(
        &mut self,
        class: MessageClass,
        raw: RawMessage,
        normalizer: &Normalizer,
    ) -> Result<(), PayloadError> {
        match class {
            MessageClass::Data => {
                let normalized = normalizer.normalize(raw);
                log_issues(&self.info.sn, &normalized.issues);
                self.data.update_data(&normalized.message)?;
            }
            MessageClass::Status => {
                self.data.update_status(&raw)?;
            }
            MessageClass::Set => self.data.add_set_message(raw),
            MessageClass::SetReply => self.data.add_set_reply_message(raw),
            MessageClass::Get => self.data.add_get_message(raw),
            MessageClass::GetReply => self.data.add_get_reply_message(raw)?,
        }
        Ok(())
    }

    /// Apply the online flag reported by the cloud device list.
    pub fn apply_status(&mut self, online: bool) {
        let mut raw = RawMessage::new();
        raw.insert("params".to_string(), json!({ "status": i64::from(online) }));
        if let Err(err) = self.data.update_status(&raw) {
            tracing::warn!(sn = %self.info.sn, %err, "unable to apply device-list status");
        }
    }

    /// Whether new data arrived since the last call; advances the broadcast
    /// high-water mark.
    pub fn take_changed(&mut self) -> bool {
        let received = self.data.last_received_time();
        let changed = self.last_broadcast < received;
        self.last_broadcast = received;
        changed
    }

    /// Materialise battery modules seen for the first time.
    pub fn discover(&mut self) -> Vec<BatteryPoint> {
        let fresh: Vec<BatteryPoint> = self
            .modules
            .scan(self.data.params())
            .into_iter()
            .map(BatteryPoint::new)
            .collect();
        for point in &fresh {
            tracing::info!(
                sn = %self.info.sn,
                module = point.serial(),
                known = self.modules.len(),
                "discovered new battery module"
            );
        }
        self.batteries.extend(fresh.iter().cloned());
        fresh
    }

    /// Re-derive every point's value from the current parameters.
    ///
    /// Points whose transform asks to keep the previous value repeat what
    /// was last shown; never-shown ones are left out.
    pub fn refresh(&mut self) -> Vec<PointReading> {
        let params = self.data.snapshot();
        let catalog = self.catalog;
        let mut readings = Vec::with_capacity(catalog.points.len() + self.batteries.len());

        for point in catalog.points {
            let value = match point.refresh(&params) {
                Reading::Value(value) => {
                    if value.is_unknown() {
                        tracing::debug!(sn = %self.info.sn, key = point.key, "no usable value");
                    }
                    self.shown.insert(point.key.to_string(), value.clone());
                    value
                }
                Reading::Keep => match self.shown.get(point.key) {
                    Some(previous) => previous.clone(),
                    None => continue,
                },
            };
            readings.push(
                PointReading::new(point.key, value).described(point.unit, point.device_class),
            );
        }

        for battery in &self.batteries {
            let reading = battery.refresh(&params);
            let mut point = PointReading::new(battery.key(), reading.value)
                .described(Some(battery.unit()), Some(battery.device_class()));
            for (name, value) in reading.attributes {
                if let Some(unit) = battery_attribute_unit(name) {
                    point.attribute_units.insert(name.to_string(), unit);
                }
                point.attributes.insert(name.to_string(), value);
            }
            readings.push(point);
        }

        readings
    }

    /// Advance liveness by one poll cycle.
    pub fn tick_liveness(&mut self) -> Evaluation {
        self.liveness.tick(self.data.last_received_time())
    }

    #[must_use]
    pub fn status_report(&self, mqtt_connected: Option<bool>) -> StatusReport {
        StatusReport::from_tracker(&self.info.sn, &self.liveness, mqtt_connected)
    }

    /// Validate a new value for `key`, record the command in the `set`
    /// history and optimistically apply it.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] for an unknown point and
    /// [`BridgeError::Command`] when the value does not fit the point.
    pub fn prepare_command(
        &mut self,
        key: &str,
        value: &Value,
    ) -> Result<SetCommand, BridgeError> {
        let point = self.catalog.point(key).ok_or_else(|| NotFoundError {
            entity: "Point",
            id: key.to_string(),
        })?;
        let command = point.build_command(value)?;
        self.data.add_set_message(command.message.clone());
        self.data.apply_target_state(&command.target)?;
        Ok(command)
    }
}

fn log_issues(sn: &DeviceSn, issues: &[NormalizeIssue]) {
    for issue in issues {
        match issue {
            NormalizeIssue::EmbeddedJson { .. } => {
                tracing::debug!(%sn, %issue, "kept raw module string");
            }
            NormalizeIssue::NotAnObject { .. } => {
                tracing::warn!(%sn, %issue, "skipped payload section");
            }
        }
    }
}
