//! Bridge coordinator. Routes inbound messages, drives the poll cycle and
//! sends set-commands.
//!
//! The coordinator owns one [`DeviceRuntime`] per configured device. Inbound
//! MQTT messages and cloud re-fetches both end up in the same store entry
//! point, so ordering between them is last-write-wins by arrival.
//!
//! Nothing on the message or poll path returns an error: every failure is
//! logged and contained to the message or device it came from.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use efbridge_domain::device::{DeviceSn, MessageClass};
use efbridge_domain::error::{BridgeError, NotFoundError};
use efbridge_domain::event::BridgeEvent;
use efbridge_domain::liveness::LivenessAction;
use efbridge_domain::payload::{self, Normalizer};

use crate::ports::{CloudApi, EventPublisher, Transport};
use crate::services::device_runtime::{DeviceRuntime, RuntimeConfig};

/// Coordinator settings.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Serials to bridge; empty means every device on the account.
    pub devices: Vec<DeviceSn>,
    pub runtime: RuntimeConfig,
}

/// What one poll cycle did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Devices whose points were refreshed.
    pub refreshed: Vec<DeviceSn>,
    /// Out-of-band quota re-fetches started this cycle.
    pub repolls: Vec<JoinHandle<()>>,
}

/// The bridge between the vendor cloud and the host's entity model.
pub struct Bridge<C, T, P> {
    cloud: C,
    transport: T,
    publisher: P,
    normalizer: Normalizer,
    config: BridgeConfig,
    devices: BTreeMap<DeviceSn, Mutex<DeviceRuntime>>,
}

impl<C, T, P> Bridge<C, T, P>
where
    C: CloudApi + 'static,
    T: Transport + 'static,
    P: EventPublisher + Send + Sync + 'static,
{
    /// Create a bridge with no devices; call [`setup`](Self::setup) next.
    pub fn new(
        cloud: C,
        transport: T,
        publisher: P,
        normalizer: Normalizer,
        config: BridgeConfig,
    ) -> Self {
        Self {
            cloud,
            transport,
            publisher,
            normalizer,
            config,
            devices: BTreeMap::new(),
        }
    }

    /// Fetch the device list and create a runtime per selected device.
    ///
    /// # Errors
    ///
    /// Returns the cloud error when the device list cannot be fetched.
    #[tracing::instrument(skip(self))]
    pub async fn setup(&mut self) -> Result<Vec<DeviceSn>, BridgeError> {
        let available = self.cloud.fetch_all_devices().await?;
        tracing::info!(count = available.len(), "fetched device list");

        for wanted in &self.config.devices {
            if !available.iter().any(|info| &info.sn == wanted) {
                tracing::warn!(sn = %wanted, "configured device is not registered to this account");
            }
        }

        let mut added = Vec::new();
        for info in available {
            if !self.config.devices.is_empty() && !self.config.devices.contains(&info.sn) {
                continue;
            }
            if self.devices.contains_key(&info.sn) {
                continue;
            }

            let online = info.online;
            let mut runtime = DeviceRuntime::new(info, self.config.runtime);
            runtime.apply_status(online);
            let event = BridgeEvent::DeviceAdded {
                sn: runtime.sn().clone(),
                display_name: runtime.info().display_name.clone(),
                catalog: runtime.catalog().name,
            };
            tracing::info!(
                sn = %runtime.sn(),
                product = %runtime.info().product_type,
                catalog = runtime.catalog().name,
                "configured device"
            );

            added.push(runtime.sn().clone());
            self.devices.insert(runtime.sn().clone(), Mutex::new(runtime));
            self.publish(event).await;
        }

        Ok(added)
    }

    /// Serials of all configured devices.
    pub fn devices(&self) -> impl Iterator<Item = &DeviceSn> {
        self.devices.keys()
    }

    /// Run `f` against one device's runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] for an unknown serial.
    pub fn with_device<R>(
        &self,
        sn: &DeviceSn,
        f: impl FnOnce(&mut DeviceRuntime) -> R,
    ) -> Result<R, BridgeError> {
        let mut runtime = self.lock(sn).ok_or_else(|| NotFoundError {
            entity: "Device",
            id: sn.to_string(),
        })?;
        Ok(f(&mut runtime))
    }

    /// Inbound delivery callback for one MQTT message.
    ///
    /// Malformed payloads are logged and dropped.
    #[tracing::instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub fn on_message(&self, sn: &DeviceSn, class: MessageClass, payload: &[u8]) {
        let raw = match payload::decode(payload) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(%err, "dropping undecodable payload");
                return;
            }
        };

        let Some(mut runtime) = self.lock(sn) else {
            tracing::debug!("message for unconfigured device");
            return;
        };
        if let Err(err) = runtime.ingest(class, raw, &self.normalizer) {
            tracing::warn!(%err, "dropping malformed payload");
        }
    }

    /// One coordinator cycle: refresh statuses and quotas from the cloud,
    /// publish point refreshes for changed devices, then advance liveness and
    /// carry out its escalations.
    #[tracing::instrument(skip(self))]
    pub async fn poll_tick(self: &Arc<Self>) -> TickReport {
        self.refresh_statuses().await;

        let serials: Vec<DeviceSn> = self.devices.keys().cloned().collect();
        for sn in &serials {
            self.refresh_quota(sn).await;
        }

        let mqtt_connected = Some(self.transport.is_connected());
        let mut report = TickReport::default();
        for sn in serials {
            let Some((events, actions)) = self.cycle_device(&sn, mqtt_connected) else {
                continue;
            };
            if events
                .iter()
                .any(|event| matches!(event, BridgeEvent::PointsRefreshed { .. }))
            {
                report.refreshed.push(sn.clone());
            }
            for event in events {
                self.publish(event).await;
            }

            for action in actions {
                match action {
                    LivenessAction::RequestQuota => {
                        tracing::warn!(%sn, "no data within offline window, re-requesting quota");
                        report.repolls.push(self.request_quota(sn.clone()));
                    }
                    LivenessAction::Reconnect => {
                        tracing::warn!(%sn, "no data for several cycles, reconnecting transport");
                        if let Err(err) = self.transport.reconnect().await {
                            tracing::warn!(%sn, %err, "reconnect failed");
                        }
                    }
                }
            }
        }

        report
    }

    /// Start a fire-and-forget bulk quota re-fetch for one device.
    pub fn request_quota(self: &Arc<Self>, sn: DeviceSn) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.refresh_quota(&sn).await })
    }

    /// Validate and publish a set-command for one point.
    ///
    /// The command is recorded and applied to the local store before it is
    /// published.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::NotFound`] for an unknown device or point,
    /// [`BridgeError::Command`] for an invalid value, or the transport error
    /// when publishing fails.
    #[tracing::instrument(skip(self, value))]
    pub async fn send_command(
        &self,
        sn: &DeviceSn,
        key: &str,
        value: Value,
    ) -> Result<(), BridgeError> {
        let command = self.with_device(sn, |runtime| runtime.prepare_command(key, &value))??;
        self.transport.publish_set(sn, command.message).await?;
        tracing::info!(%value, "set-command published");

        self.publish(BridgeEvent::CommandSent {
            sn: sn.clone(),
            key: key.to_string(),
            value,
        })
        .await;
        Ok(())
    }

    /// Drive [`poll_tick`](Self::poll_tick) every `interval` until `shutdown`
    /// resolves. The first tick runs immediately.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.poll_tick().await;
                    tracing::debug!(
                        refreshed = report.refreshed.len(),
                        repolls = report.repolls.len(),
                        "poll cycle done"
                    );
                }
                () = &mut shutdown => {
                    tracing::info!("poll loop stopped");
                    break;
                }
            }
        }
    }

    async fn refresh_statuses(&self) {
        match self.cloud.fetch_all_devices().await {
            Ok(list) => {
                for info in list {
                    if let Some(mut runtime) = self.lock(&info.sn) {
                        runtime.apply_status(info.online);
                    }
                }
            }
            Err(err) => tracing::warn!(%err, "failed to fetch device list"),
        }
    }

    async fn refresh_quota(&self, sn: &DeviceSn) {
        let raw = match self.cloud.fetch_quota_all(sn).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(%sn, %err, "failed to fetch device quota");
                return;
            }
        };

        if let Some(mut runtime) = self.lock(sn) {
            if let Err(err) = runtime.ingest(MessageClass::Data, raw, &self.normalizer) {
                tracing::warn!(%sn, %err, "dropping malformed quota response");
            }
        }
    }

    fn cycle_device(
        &self,
        sn: &DeviceSn,
        mqtt_connected: Option<bool>,
    ) -> Option<(Vec<BridgeEvent>, Vec<LivenessAction>)> {
        let mut runtime = self.lock(sn)?;
        let mut events = Vec::new();

        if runtime.take_changed() {
            for point in runtime.discover() {
                events.push(BridgeEvent::ModuleDiscovered {
                    sn: sn.clone(),
                    point,
                });
            }
            events.push(BridgeEvent::PointsRefreshed {
                sn: sn.clone(),
                readings: runtime.refresh(),
            });
        }

        let previous = runtime.liveness().state();
        let evaluation = runtime.tick_liveness();
        if evaluation.changed {
            let report = runtime.status_report(mqtt_connected);
            if report.state == previous {
                tracing::debug!(%sn, state = %report.state, "status refreshed");
            } else {
                tracing::info!(
                    %sn,
                    state = %report.state,
                    skip = evaluation.skip_count,
                    "status changed"
                );
            }
            events.push(BridgeEvent::StatusChanged {
                sn: sn.clone(),
                report,
            });
        }

        Some((events, evaluation.actions))
    }

    fn lock(&self, sn: &DeviceSn) -> Option<MutexGuard<'_, DeviceRuntime>> {
        self.devices
            .get(sn)
            .map(|runtime| runtime.lock().unwrap_or_else(PoisonError::into_inner))
    }

    async fn publish(&self, event: BridgeEvent) {
        if let Err(err) = self.publisher.publish(event).await {
            tracing::warn!(%err, "failed to publish bridge event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use serde_json::json;
    use tokio::sync::broadcast;

    use super::*;
    use crate::event_bus::InProcessEventBus;
    use efbridge_domain::device::DeviceInfo;
    use efbridge_domain::liveness::{LivenessState, LivenessThresholds};
    use efbridge_domain::payload::RawMessage;
    use efbridge_domain::point::PointValue;

    // -- Fakes --

    #[derive(Default)]
    struct FakeCloud {
        devices: Mutex<Vec<DeviceInfo>>,
        quotas: Mutex<BTreeMap<DeviceSn, RawMessage>>,
        unreachable: AtomicBool,
        quota_calls: AtomicUsize,
    }

    impl FakeCloud {
        fn with_devices(devices: Vec<DeviceInfo>) -> Self {
            Self {
                devices: Mutex::new(devices),
                ..Self::default()
            }
        }

        fn set_quota(&self, sn: &str, quota: Value) {
            let Value::Object(map) = quota else {
                panic!("quota must be an object");
            };
            self.quotas.lock().unwrap().insert(DeviceSn::new(sn), map);
        }

        fn set_unreachable(&self, unreachable: bool) {
            self.unreachable.store(unreachable, Ordering::SeqCst);
        }

        fn down(&self) -> Option<BridgeError> {
            self.unreachable
                .load(Ordering::SeqCst)
                .then(|| BridgeError::Transport("cloud unreachable".into()))
        }
    }

    impl CloudApi for FakeCloud {
        fn fetch_all_devices(
            &self,
        ) -> impl Future<Output = Result<Vec<DeviceInfo>, BridgeError>> + Send {
            let result = match self.down() {
                Some(err) => Err(err),
                None => Ok(self.devices.lock().unwrap().clone()),
            };
            async move { result }
        }

        fn fetch_quota_all(
            &self,
            sn: &DeviceSn,
        ) -> impl Future<Output = Result<RawMessage, BridgeError>> + Send {
            self.quota_calls.fetch_add(1, Ordering::SeqCst);
            let result = match self.down() {
                Some(err) => Err(err),
                None => Ok(self
                    .quotas
                    .lock()
                    .unwrap()
                    .get(sn)
                    .cloned()
                    .unwrap_or_else(empty_quota)),
            };
            async move { result }
        }
    }

    #[derive(Default)]
    struct FakeTransport {
        published: Mutex<Vec<(DeviceSn, RawMessage)>>,
        reconnects: AtomicUsize,
    }

    impl Transport for FakeTransport {
        fn publish_set(
            &self,
            sn: &DeviceSn,
            message: RawMessage,
        ) -> impl Future<Output = Result<(), BridgeError>> + Send {
            self.published.lock().unwrap().push((sn.clone(), message));
            async { Ok(()) }
        }

        fn reconnect(&self) -> impl Future<Output = Result<(), BridgeError>> + Send {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    type TestBridge = Bridge<Arc<FakeCloud>, Arc<FakeTransport>, Arc<InProcessEventBus>>;

    struct Harness {
        bridge: Arc<TestBridge>,
        cloud: Arc<FakeCloud>,
        transport: Arc<FakeTransport>,
        events: broadcast::Receiver<BridgeEvent>,
    }

    // -- Helpers --

    fn info(sn: &str, product: &str) -> DeviceInfo {
        DeviceInfo {
            sn: DeviceSn::new(sn),
            display_name: format!("{product}-{sn}"),
            product_type: product.to_string(),
            online: true,
        }
    }

    fn empty_quota() -> RawMessage {
        let Value::Object(map) = json!({"code": "0", "message": "Success", "data": {}}) else {
            unreachable!();
        };
        map
    }

    fn config(devices: &[&str], threshold: u32) -> BridgeConfig {
        BridgeConfig {
            devices: devices.iter().map(|sn| DeviceSn::new(*sn)).collect(),
            runtime: RuntimeConfig {
                thresholds: LivenessThresholds::new(threshold),
                ..RuntimeConfig::default()
            },
        }
    }

    async fn power_ocean(offline_cycles: u32) -> Harness {
        let cloud = FakeCloud::with_devices(vec![info("HJ31", "PowerOcean")]);
        harness(cloud, config(&[], offline_cycles)).await
    }

    async fn harness(cloud: FakeCloud, config: BridgeConfig) -> Harness {
        let cloud = Arc::new(cloud);
        let transport = Arc::new(FakeTransport::default());
        let bus = Arc::new(InProcessEventBus::new(64));
        let events = bus.subscribe();

        let mut bridge = Bridge::new(
            Arc::clone(&cloud),
            Arc::clone(&transport),
            bus,
            Normalizer::default(),
            config,
        );
        bridge.setup().await.unwrap();

        Harness {
            bridge: Arc::new(bridge),
            cloud,
            transport,
            events,
        }
    }

    fn drain(events: &mut broadcast::Receiver<BridgeEvent>) -> Vec<BridgeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn reading(events: &[BridgeEvent], key: &str) -> Option<PointValue> {
        events.iter().find_map(|event| match event {
            BridgeEvent::PointsRefreshed { readings, .. } => readings
                .iter()
                .find(|r| r.key == key)
                .map(|r| r.value.clone()),
            _ => None,
        })
    }

    fn last_state(events: &[BridgeEvent]) -> Option<LivenessState> {
        events.iter().rev().find_map(|event| match event {
            BridgeEvent::StatusChanged { report, .. } => Some(report.state),
            _ => None,
        })
    }

    // -- Setup --

    #[tokio::test]
    async fn should_configure_only_selected_devices_when_selection_given() {
        let cloud = FakeCloud::with_devices(vec![
            info("HJ31", "PowerOcean"),
            info("R331", "Delta 2"),
        ]);
        let mut h = harness(cloud, config(&["HJ31", "MISSING"], 2)).await;

        let devices: Vec<_> = h.bridge.devices().cloned().collect();
        assert_eq!(devices, vec![DeviceSn::new("HJ31")]);

        let events = drain(&mut h.events);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            BridgeEvent::DeviceAdded { catalog: "power_ocean", .. }
        ));
    }

    #[tokio::test]
    async fn should_configure_every_device_when_selection_empty() {
        let cloud = FakeCloud::with_devices(vec![
            info("HJ31", "PowerOcean"),
            info("R331", "Delta 2"),
        ]);
        let h = harness(cloud, config(&[], 2)).await;

        assert_eq!(h.bridge.devices().count(), 2);
        let catalog = h
            .bridge
            .with_device(&DeviceSn::new("R331"), |runtime| runtime.catalog().name)
            .unwrap();
        assert_eq!(catalog, "diagnostic");
    }

    #[tokio::test]
    async fn should_fail_setup_when_device_list_unavailable() {
        let cloud = Arc::new(FakeCloud::default());
        cloud.set_unreachable(true);
        let mut bridge = Bridge::new(
            cloud,
            Arc::new(FakeTransport::default()),
            Arc::new(InProcessEventBus::new(4)),
            Normalizer::default(),
            BridgeConfig::default(),
        );

        let err = bridge.setup().await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }

    // -- Inbound messages --

    #[tokio::test]
    async fn should_merge_inbound_data_message() {
        let h = power_ocean(2).await;
        let sn = DeviceSn::new("HJ31");

        h.bridge
            .on_message(&sn, MessageClass::Data, br#"{"params":{"bpSoc":42}}"#);

        let soc = h
            .bridge
            .with_device(&sn, |runtime| runtime.data().params().get("bpSoc").cloned())
            .unwrap();
        assert_eq!(soc, Some(json!(42)));
    }

    #[tokio::test]
    async fn should_drop_undecodable_payload() {
        let h = power_ocean(2).await;
        let sn = DeviceSn::new("HJ31");

        h.bridge.on_message(&sn, MessageClass::Data, b"not json");
        h.bridge.on_message(&sn, MessageClass::Data, br#"{"code":"0"}"#);

        let empty = h
            .bridge
            .with_device(&sn, |runtime| runtime.data().params().is_empty())
            .unwrap();
        assert!(empty);
    }

    #[tokio::test]
    async fn should_ignore_message_for_unconfigured_device() {
        let h = power_ocean(2).await;
        let stranger = DeviceSn::new("OTHER");

        h.bridge
            .on_message(&stranger, MessageClass::Data, br#"{"params":{"bpSoc":1}}"#);

        assert!(h.bridge.with_device(&stranger, |_| ()).is_err());
    }

    // -- Poll cycle --

    #[tokio::test]
    async fn should_publish_points_and_modules_after_quota_fetch() {
        let cloud = FakeCloud::with_devices(vec![info("HJ31", "PowerOcean")]);
        cloud.set_quota(
            "HJ31",
            json!({
                "code": "0",
                "message": "Success",
                "data": {"bpSoc": 77, "bp_addr.B1": "{\"bpSoc\":90}"}
            }),
        );
        let mut h = harness(cloud, config(&[], 2)).await;
        drain(&mut h.events);

        let report = h.bridge.poll_tick().await;
        assert_eq!(report.refreshed, vec![DeviceSn::new("HJ31")]);
        assert!(report.repolls.is_empty());

        let events = drain(&mut h.events);
        assert!(events.iter().any(|event| matches!(
            event,
            BridgeEvent::ModuleDiscovered { point, .. } if point.serial() == "B1"
        )));
        assert_eq!(reading(&events, "bpSoc"), Some(PointValue::Int(77)));
        assert_eq!(reading(&events, "bp_addr.B1.bpSoc"), Some(PointValue::Int(90)));
        assert_eq!(last_state(&events), Some(LivenessState::Online));
    }

    #[tokio::test]
    async fn should_not_refresh_points_when_nothing_arrived() {
        let mut h = power_ocean(5).await;
        h.bridge.poll_tick().await;
        drain(&mut h.events);

        h.cloud.set_unreachable(true);
        let report = h.bridge.poll_tick().await;

        assert!(report.refreshed.is_empty());
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn should_request_quota_then_go_offline_when_device_stalls() {
        let mut h = power_ocean(1).await;
        h.bridge.poll_tick().await;
        let calls_before = h.cloud.quota_calls.load(Ordering::SeqCst);

        h.cloud.set_unreachable(true);
        let report = h.bridge.poll_tick().await;
        assert_eq!(report.repolls.len(), 1);
        for handle in report.repolls {
            handle.await.unwrap();
        }
        assert_eq!(h.cloud.quota_calls.load(Ordering::SeqCst), calls_before + 2);

        drain(&mut h.events);
        let report = h.bridge.poll_tick().await;
        assert!(report.repolls.is_empty());
        assert_eq!(last_state(&drain(&mut h.events)), Some(LivenessState::Offline));
    }

    #[tokio::test]
    async fn should_come_back_online_when_data_resumes() {
        let mut h = power_ocean(1).await;
        h.bridge.poll_tick().await;
        h.cloud.set_unreachable(true);
        h.bridge.poll_tick().await;
        h.bridge.poll_tick().await;
        drain(&mut h.events);

        h.bridge
            .on_message(&DeviceSn::new("HJ31"), MessageClass::Data, br#"{"params":{"bpSoc":50}}"#);
        h.bridge.poll_tick().await;

        let events = drain(&mut h.events);
        assert_eq!(last_state(&events), Some(LivenessState::Online));
        assert_eq!(reading(&events, "bpSoc"), Some(PointValue::Int(50)));
    }

    // -- Commands --

    #[tokio::test]
    async fn should_publish_set_command_and_apply_it_locally() {
        let mut h = power_ocean(2).await;
        let sn = DeviceSn::new("HJ31");
        drain(&mut h.events);

        h.bridge
            .send_command(&sn, "ems.maxChargeSoc", json!(90))
            .await
            .unwrap();

        let published = h.transport.published.lock().unwrap().clone();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, sn);
        assert_eq!(published[0].1["params"]["maxChgSoc"], json!(90));

        let applied = h
            .bridge
            .with_device(&sn, |runtime| runtime.data().params().get("ems.maxChargeSoc").cloned())
            .unwrap();
        assert_eq!(applied, Some(json!(90)));
        assert!(matches!(
            drain(&mut h.events).as_slice(),
            [BridgeEvent::CommandSent { key, .. }] if key == "ems.maxChargeSoc"
        ));
    }

    #[tokio::test]
    async fn should_reject_command_for_unknown_device() {
        let h = power_ocean(2).await;

        let err = h
            .bridge
            .send_command(&DeviceSn::new("NOPE"), "ems.maxChargeSoc", json!(90))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::NotFound(_)));
        assert!(h.transport.published.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_not_publish_out_of_range_command() {
        let h = power_ocean(2).await;

        let err = h
            .bridge
            .send_command(&DeviceSn::new("HJ31"), "ems.maxChargeSoc", json!(20))
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::Command(_)));
        assert!(h.transport.published.lock().unwrap().is_empty());
        assert_eq!(h.transport.reconnects.load(Ordering::SeqCst), 0);
    }
}
