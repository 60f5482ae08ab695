//! Parameter store: the mutable per-device data holder.
//!
//! Merges normalized parameters into a flat map, tracks one "last updated"
//! timestamp per message class and keeps bounded histories of raw traffic.
//!
//! The parameter map lives behind an [`Arc`] and is copied on write, so
//! readers can hold a [`snapshot`](DeviceData::snapshot) while the owner
//! keeps mutating.

use std::sync::Arc;

use serde_json::Value;

use crate::device::MessageClass;
use crate::error::{PayloadError, TargetKeyError};
use crate::history::{BoundedHistory, DEFAULT_CAPACITY};
use crate::params::{ParameterMap, TargetKey};
use crate::payload::RawMessage;
use crate::time::{self, Timestamp};

/// Store tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Capacity of every per-class history.
    pub history_capacity: usize,
    /// Whether data messages are kept in the raw `data` history.
    pub collect_raw: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_CAPACITY,
            collect_raw: false,
        }
    }
}

/// Runtime data for one device.
#[derive(Debug, Clone)]
pub struct DeviceData {
    params: Arc<ParameterMap>,
    status: Option<i64>,
    collect_raw: bool,

    raw_data: BoundedHistory<RawMessage>,
    set: BoundedHistory<RawMessage>,
    set_reply: BoundedHistory<RawMessage>,
    get: BoundedHistory<RawMessage>,
    get_reply: BoundedHistory<RawMessage>,

    params_time: Timestamp,
    status_time: Timestamp,
    set_reply_time: Timestamp,
    get_reply_time: Timestamp,
}

impl Default for DeviceData {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl DeviceData {
    /// Empty store; every timestamp starts at [`time::never`].
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        let history = || BoundedHistory::with_capacity(config.history_capacity);
        Self {
            params: Arc::new(ParameterMap::new()),
            status: None,
            collect_raw: config.collect_raw,
            raw_data: history(),
            set: history(),
            set_reply: history(),
            get: history(),
            get_reply: history(),
            params_time: time::never(),
            status_time: time::never(),
            set_reply_time: time::never(),
            get_reply_time: time::never(),
        }
    }

    /// Merge `raw.params` into the parameter map (last write wins).
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::MissingParams`] when `raw` has no `params`
    /// object; the store is left untouched.
    pub fn update_data(&mut self, raw: &RawMessage) -> Result<usize, PayloadError> {
        self.update_data_at(raw, time::now())
    }

    /// [`update_data`](Self::update_data) with an explicit receive time.
    ///
    /// # Errors
    ///
    /// See [`update_data`](Self::update_data).
    pub fn update_data_at(
        &mut self,
        raw: &RawMessage,
        at: Timestamp,
    ) -> Result<usize, PayloadError> {
        let delta = raw
            .get("params")
            .and_then(Value::as_object)
            .ok_or(PayloadError::MissingParams)?;

        if self.collect_raw {
            self.raw_data.push(raw.clone());
        }

        Arc::make_mut(&mut self.params).merge(delta.iter().map(|(k, v)| (k.clone(), v.clone())));
        advance(&mut self.params_time, at);
        Ok(delta.len())
    }

    /// Record the device's online flag from `{"params": {"status": n}}`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::MissingField`] when `params.status` is absent
    /// or not an integer.
    pub fn update_status(&mut self, raw: &RawMessage) -> Result<i64, PayloadError> {
        self.update_status_at(raw, time::now())
    }

    /// [`update_status`](Self::update_status) with an explicit receive time.
    ///
    /// # Errors
    ///
    /// See [`update_status`](Self::update_status).
    pub fn update_status_at(
        &mut self,
        raw: &RawMessage,
        at: Timestamp,
    ) -> Result<i64, PayloadError> {
        let status = raw
            .get("params")
            .and_then(|params| params.get("status"))
            .and_then(as_int)
            .ok_or(PayloadError::MissingField("params.status"))?;
        self.status = Some(status);
        advance(&mut self.status_time, at);
        Ok(status)
    }

    /// Record an outbound set-command.
    pub fn add_set_message(&mut self, raw: RawMessage) {
        self.set.push(raw);
    }

    /// Record a set-command reply.
    pub fn add_set_reply_message(&mut self, raw: RawMessage) {
        self.add_set_reply_message_at(raw, time::now());
    }

    /// [`add_set_reply_message`](Self::add_set_reply_message) with an explicit receive time.
    pub fn add_set_reply_message_at(&mut self, raw: RawMessage, at: Timestamp) {
        self.set_reply.push(raw);
        advance(&mut self.set_reply_time, at);
    }

    /// Record an outbound get request.
    pub fn add_get_message(&mut self, raw: RawMessage) {
        self.get.push(raw);
    }

    /// Record a get reply.
    ///
    /// A `latestQuotas` reply from an online device (`data.online == 1`)
    /// carries a full quota map, which is merged as a data update first.
    ///
    /// # Errors
    ///
    /// Returns a [`PayloadError`] when a `latestQuotas` reply lacks its
    /// `data.online` / `data.quotaMap` substructure. The reply itself is
    /// still recorded.
    pub fn add_get_reply_message(&mut self, raw: RawMessage) -> Result<(), PayloadError> {
        self.add_get_reply_message_at(raw, time::now())
    }

    /// [`add_get_reply_message`](Self::add_get_reply_message) with an explicit receive time.
    ///
    /// # Errors
    ///
    /// See [`add_get_reply_message`](Self::add_get_reply_message).
    pub fn add_get_reply_message_at(
        &mut self,
        raw: RawMessage,
        at: Timestamp,
    ) -> Result<(), PayloadError> {
        let quotas = if raw.get("operateType").and_then(Value::as_str) == Some("latestQuotas") {
            latest_quotas(&raw).map(|quotas| quotas.map(|q| self.update_data_at(&q, at)))
        } else {
            Ok(None)
        };

        self.get_reply.push(raw);
        advance(&mut self.get_reply_time, at);

        match quotas {
            Ok(Some(merged)) => merged.map(|_| ()),
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Optimistically write a pending set-command's values before the device
    /// confirms them. Keys are [`TargetKey`] expressions.
    ///
    /// All keys are parsed before anything is written.
    ///
    /// # Errors
    ///
    /// Returns [`TargetKeyError`] for a malformed key; nothing is applied.
    pub fn apply_target_state(&mut self, patch: &RawMessage) -> Result<usize, TargetKeyError> {
        self.apply_target_state_at(patch, time::now())
    }

    /// [`apply_target_state`](Self::apply_target_state) with an explicit time.
    ///
    /// # Errors
    ///
    /// See [`apply_target_state`](Self::apply_target_state).
    pub fn apply_target_state_at(
        &mut self,
        patch: &RawMessage,
        at: Timestamp,
    ) -> Result<usize, TargetKeyError> {
        let targets = patch
            .iter()
            .map(|(key, value)| key.parse::<TargetKey>().map(|target| (target, value)))
            .collect::<Result<Vec<_>, _>>()?;

        let params = Arc::make_mut(&mut self.params);
        let written = targets
            .iter()
            .map(|(target, value)| params.apply(target, value))
            .sum();
        advance(&mut self.params_time, at);
        Ok(written)
    }

    /// Most recent evidence of life: max of status, params, get-reply and
    /// set-reply times.
    #[must_use]
    pub fn last_received_time(&self) -> Timestamp {
        self.status_time
            .max(self.params_time)
            .max(self.get_reply_time)
            .max(self.set_reply_time)
    }

    /// Borrow the current parameters.
    #[must_use]
    pub fn params(&self) -> &ParameterMap {
        &self.params
    }

    /// Cheap immutable snapshot of the current parameters.
    #[must_use]
    pub fn snapshot(&self) -> Arc<ParameterMap> {
        Arc::clone(&self.params)
    }

    /// Last online flag reported by the cloud or the status topic.
    #[must_use]
    pub fn status(&self) -> Option<i64> {
        self.status
    }

    /// History for a message class; `Status` keeps none.
    #[must_use]
    pub fn history(&self, class: MessageClass) -> Option<&BoundedHistory<RawMessage>> {
        match class {
            MessageClass::Data => Some(&self.raw_data),
            MessageClass::Set => Some(&self.set),
            MessageClass::SetReply => Some(&self.set_reply),
            MessageClass::Get => Some(&self.get),
            MessageClass::GetReply => Some(&self.get_reply),
            MessageClass::Status => None,
        }
    }

    /// Last update time of a message class; `Set` and `Get` are not tracked.
    #[must_use]
    pub fn updated_at(&self, class: MessageClass) -> Option<Timestamp> {
        match class {
            MessageClass::Data => Some(self.params_time),
            MessageClass::Status => Some(self.status_time),
            MessageClass::SetReply => Some(self.set_reply_time),
            MessageClass::GetReply => Some(self.get_reply_time),
            MessageClass::Set | MessageClass::Get => None,
        }
    }
}

/// Move `slot` forward to `at`, never backwards.
fn advance(slot: &mut Timestamp, at: Timestamp) {
    if at > *slot {
        *slot = at;
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Extract `{"params": data.quotaMap}` from an online `latestQuotas` reply.
fn latest_quotas(raw: &RawMessage) -> Result<Option<RawMessage>, PayloadError> {
    let data = raw
        .get("data")
        .and_then(Value::as_object)
        .ok_or(PayloadError::MissingField("data"))?;
    let online = data
        .get("online")
        .and_then(as_int)
        .ok_or(PayloadError::MissingField("data.online"))?;
    if online != 1 {
        return Ok(None);
    }
    let quota_map = data
        .get("quotaMap")
        .filter(|v| v.is_object())
        .ok_or(PayloadError::MissingField("data.quotaMap"))?;

    let mut update = RawMessage::new();
    update.insert("params".to_string(), quota_map.clone());
    Ok(Some(update))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn raw(value: Value) -> RawMessage {
        match value {
            Value::Object(map) => map,
            _ => panic!("test payload must be an object"),
        }
    }

    fn t(secs: i64) -> Timestamp {
        time::never() + Duration::days(365 * 20) + Duration::seconds(secs)
    }

    #[test]
    fn should_start_at_never() {
        let data = DeviceData::default();
        assert_eq!(data.last_received_time(), time::never());
        assert!(data.params().is_empty());
    }

    #[test]
    fn should_merge_params_last_write_wins() {
        let mut data = DeviceData::default();
        data.update_data_at(&raw(json!({"params": {"a": 1, "b": 2}})), t(1)).unwrap();
        data.update_data_at(&raw(json!({"params": {"a": 3}})), t(2)).unwrap();
        assert_eq!(data.params().get("a"), Some(&json!(3)));
        assert_eq!(data.params().get("b"), Some(&json!(2)));
        assert_eq!(data.updated_at(MessageClass::Data), Some(t(2)));
    }

    #[test]
    fn should_leave_store_untouched_when_params_missing() {
        let mut data = DeviceData::new(StoreConfig {
            history_capacity: 20,
            collect_raw: true,
        });
        let err = data.update_data_at(&raw(json!({"code": 0})), t(1)).unwrap_err();
        assert!(matches!(err, PayloadError::MissingParams));
        assert!(data.params().is_empty());
        assert_eq!(data.last_received_time(), time::never());
        assert!(data.history(MessageClass::Data).unwrap().is_empty());
    }

    #[test]
    fn should_collect_raw_only_when_enabled() {
        let msg = raw(json!({"params": {"a": 1}}));

        let mut off = DeviceData::default();
        off.update_data(&msg).unwrap();
        assert!(off.history(MessageClass::Data).unwrap().is_empty());

        let mut on = DeviceData::new(StoreConfig {
            history_capacity: 20,
            collect_raw: true,
        });
        on.update_data(&msg).unwrap();
        assert_eq!(on.history(MessageClass::Data).unwrap().len(), 1);
    }

    #[test]
    fn should_record_status_and_advance_its_time() {
        let mut data = DeviceData::default();
        let status = data
            .update_status_at(&raw(json!({"params": {"status": 1}})), t(5))
            .unwrap();
        assert_eq!(status, 1);
        assert_eq!(data.status(), Some(1));
        assert_eq!(data.last_received_time(), t(5));
    }

    #[test]
    fn should_reject_status_without_value() {
        let mut data = DeviceData::default();
        assert!(data.update_status(&raw(json!({"params": {}}))).is_err());
        assert_eq!(data.status(), None);
    }

    #[test]
    fn should_not_stamp_outbound_messages() {
        let mut data = DeviceData::default();
        data.add_set_message(raw(json!({"id": 1})));
        data.add_get_message(raw(json!({"id": 2})));
        assert_eq!(data.last_received_time(), time::never());
        assert_eq!(data.history(MessageClass::Set).unwrap().len(), 1);
        assert_eq!(data.history(MessageClass::Get).unwrap().len(), 1);
    }

    #[test]
    fn should_stamp_set_reply() {
        let mut data = DeviceData::default();
        data.add_set_reply_message_at(raw(json!({"id": 1})), t(9));
        assert_eq!(data.last_received_time(), t(9));
    }

    #[test]
    fn should_merge_latest_quotas_from_online_get_reply() {
        let mut data = DeviceData::default();
        data.add_get_reply_message_at(
            raw(json!({
                "operateType": "latestQuotas",
                "data": {"online": 1, "quotaMap": {"bpSoc": 77}}
            })),
            t(3),
        )
        .unwrap();
        assert_eq!(data.params().get("bpSoc"), Some(&json!(77)));
        assert_eq!(data.updated_at(MessageClass::Data), Some(t(3)));
        assert_eq!(data.history(MessageClass::GetReply).unwrap().len(), 1);
    }

    #[test]
    fn should_skip_latest_quotas_from_offline_device() {
        let mut data = DeviceData::default();
        data.add_get_reply_message_at(
            raw(json!({
                "operateType": "latestQuotas",
                "data": {"online": 0, "quotaMap": {"bpSoc": 77}}
            })),
            t(3),
        )
        .unwrap();
        assert!(data.params().is_empty());
        assert_eq!(data.updated_at(MessageClass::GetReply), Some(t(3)));
    }

    #[test]
    fn should_record_malformed_latest_quotas_reply() {
        let mut data = DeviceData::default();
        let result = data.add_get_reply_message(raw(json!({"operateType": "latestQuotas"})));
        assert!(matches!(result, Err(PayloadError::MissingField("data"))));
        assert_eq!(data.history(MessageClass::GetReply).unwrap().len(), 1);
    }

    #[test]
    fn should_apply_target_state_and_advance_params_time() {
        let mut data = DeviceData::default();
        data.update_data_at(&raw(json!({"params": {"ems.maxChargeSoc": 90}})), t(1))
            .unwrap();
        let written = data
            .apply_target_state_at(&raw(json!({"ems.maxChargeSoc": 80})), t(2))
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(data.params().get("ems.maxChargeSoc"), Some(&json!(80)));
        assert_eq!(data.last_received_time(), t(2));
    }

    #[test]
    fn should_apply_nothing_when_any_target_is_malformed() {
        let mut data = DeviceData::default();
        let result = data.apply_target_state(&raw(json!({"ok": 1, "bad[x]": 2})));
        assert!(result.is_err());
        assert!(data.params().is_empty());
    }

    #[test]
    fn should_keep_snapshot_stable_across_writes() {
        let mut data = DeviceData::default();
        data.update_data(&raw(json!({"params": {"a": 1}}))).unwrap();
        let snapshot = data.snapshot();
        data.update_data(&raw(json!({"params": {"a": 2}}))).unwrap();
        assert_eq!(snapshot.get("a"), Some(&json!(1)));
        assert_eq!(data.params().get("a"), Some(&json!(2)));
    }

    #[test]
    fn should_never_move_last_received_time_backwards() {
        let mut data = DeviceData::default();
        let mut previous = data.last_received_time();
        let steps: [(i64, u8); 6] = [(10, 0), (5, 1), (20, 2), (1, 3), (15, 0), (30, 1)];
        for (secs, kind) in steps {
            match kind {
                0 => {
                    data.update_data_at(&raw(json!({"params": {"x": secs}})), t(secs))
                        .unwrap();
                }
                1 => {
                    data.update_status_at(&raw(json!({"params": {"status": 1}})), t(secs))
                        .unwrap();
                }
                2 => data.add_set_reply_message_at(raw(json!({})), t(secs)),
                _ => data.add_get_reply_message_at(raw(json!({})), t(secs)).unwrap(),
            }
            let current = data.last_received_time();
            assert!(current >= previous);
            previous = current;
        }
        assert_eq!(previous, t(30));
    }
}
