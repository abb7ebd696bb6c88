//! Polling Pipeline
//!
//! One cycle runs four stages strictly in order:
//!
//! 1. **Announce**: I-Am for the local device
//! 2. **Fetch**: roster, then the latest reading of every device
//! 3. **Aggregate & flatten**: facility averages and the flattened record
//! 4. **Apply**: timezone offset, every path into the registry, then the
//!    updated values to the gateway
//!
//! The pipeline owns the registry and the timezone offset; nothing else
//! writes to them. It runs as a [`Service`] whose tick interval is the
//! polling period, so cycles never overlap and a failed cycle only costs
//! that cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bridge_runtime::{Service, ServiceContext, ServiceError, ServiceResult, ServiceSpec};

use crate::aggregate;
use crate::api::TelemetrySource;
use crate::config::BridgeConfig;
use crate::error::BridgeResult;
use crate::facility::FacilityData;
use crate::flatten::FlatRecord;
use crate::gateway::ProtocolGateway;
use crate::registry::{PointRegistry, SetOutcome, facility_parameters};
use crate::units::UnitSystem;

/// Stage of a polling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Announce,
    Fetch,
    AggregateFlatten,
    Apply,
}

impl std::fmt::Display for CycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleStage::Announce => write!(f, "announce"),
            CycleStage::Fetch => write!(f, "fetch"),
            CycleStage::AggregateFlatten => write!(f, "aggregate-flatten"),
            CycleStage::Apply => write!(f, "apply"),
        }
    }
}

/// Outcome of one completed cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Devices with a reading this cycle
    pub devices: usize,
    /// Devices without a reading in the trailing window
    pub skipped: usize,
    /// Points that took a new value
    pub updated: usize,
    /// Paths with no registered point
    pub unregistered: usize,
    /// Values that did not fit their point
    pub rejected: usize,
    /// Everything that was flattened this cycle
    pub record: FlatRecord,
}

/// Pipeline context: the data source, the gateway and the point state
pub struct Pipeline<S, G> {
    source: S,
    gateway: Arc<G>,
    registry: PointRegistry,
    facility_id: String,
    interval: Duration,
}

impl<S, G> Pipeline<S, G>
where
    S: TelemetrySource,
    G: ProtocolGateway,
{
    pub fn new(
        source: S,
        gateway: Arc<G>,
        registry: PointRegistry,
        facility_id: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            gateway,
            registry,
            facility_id: facility_id.into(),
            interval,
        }
    }

    /// Build the registry from the facility's current roster and register
    /// every point with the gateway.
    pub async fn bootstrap(source: S, gateway: Arc<G>, config: &BridgeConfig) -> BridgeResult<Self> {
        let facility_id = config.api.facility_id.clone();
        let devices = source.list_devices(&facility_id).await?;

        let registry = create_points(&*gateway, &devices, config.units).await?;
        tracing::info!(
            facility_id = %facility_id,
            devices = devices.len(),
            points = registry.len(),
            units = ?config.units,
            "Point registry created"
        );

        Ok(Self::new(
            source,
            gateway,
            registry,
            facility_id,
            config.poll_interval(),
        ))
    }

    pub fn registry(&self) -> &PointRegistry {
        &self.registry
    }

    /// Run one full cycle
    pub async fn run_cycle(&mut self) -> BridgeResult<CycleReport> {
        let started = Instant::now();

        self.announce().await?;
        let (data, skipped) = self.fetch().await?;
        let devices = data.device_count();
        let record = self.aggregate_and_flatten(data);
        let mut report = self.apply_record(record).await?;

        report.devices = devices;
        report.skipped = skipped;

        tracing::info!(
            facility_id = %self.facility_id,
            devices = report.devices,
            skipped = report.skipped,
            updated = report.updated,
            unregistered = report.unregistered,
            rejected = report.rejected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cycle complete"
        );
        Ok(report)
    }

    async fn announce(&self) -> BridgeResult<()> {
        tracing::trace!(stage = %CycleStage::Announce);
        self.gateway.announce_presence().await?;
        Ok(())
    }

    /// Latest reading per device. Every entry is written fresh; devices
    /// without a reading are skipped for this cycle.
    async fn fetch(&self) -> BridgeResult<(FacilityData, usize)> {
        tracing::trace!(stage = %CycleStage::Fetch);
        let devices = self.source.list_devices(&self.facility_id).await?;

        let mut data = FacilityData::new();
        let mut skipped = 0;
        for device in devices {
            match self.source.latest_reading(&device).await? {
                Some(reading) => data.insert(device, reading),
                None => {
                    tracing::debug!(device = %device, "No reading in window, skipping device");
                    skipped += 1;
                }
            }
        }
        Ok((data, skipped))
    }

    /// Averages folded into the data, then flattened
    fn aggregate_and_flatten(&self, mut data: FacilityData) -> FlatRecord {
        tracing::trace!(stage = %CycleStage::AggregateFlatten);
        data.set_average(aggregate::average(&data));
        FlatRecord::from_document(&data.to_document())
    }

    /// Take the record's timezone offset, write every path into the
    /// registry, then push the updated points to the gateway.
    ///
    /// The offset is set before any point is written, so datetime points
    /// see it wherever `$.timezone` sits in the record. The registry takes
    /// the whole record before the first push; if a push fails, the gateway
    /// lags the registry until the next cycle pushes again.
    async fn apply_record(&mut self, record: FlatRecord) -> BridgeResult<CycleReport> {
        tracing::trace!(stage = %CycleStage::Apply);
        if let Some(offset) = record.timezone_offset() {
            self.registry.set_timezone_offset(offset);
        }

        let mut report = CycleReport::default();
        let mut pushes = Vec::new();
        for (path, value) in record.iter() {
            match self.registry.set_value(path, value) {
                SetOutcome::Updated => {
                    if let Some(point) = self.registry.get(path) {
                        pushes.push((point.identifier, point.value.clone()));
                    }
                    report.updated += 1;
                }
                SetOutcome::Unregistered => {
                    tracing::debug!(path, "Ignoring unregistered path");
                    report.unregistered += 1;
                }
                SetOutcome::Rejected => report.rejected += 1,
            }
        }

        for (identifier, value) in &pushes {
            self.gateway.set_present_value(*identifier, value).await?;
        }

        report.record = record;
        Ok(report)
    }
}

/// Create the registry for `devices` and expose every point via `gateway`
pub async fn create_points<G: ProtocolGateway + ?Sized>(
    gateway: &G,
    devices: &[String],
    units: UnitSystem,
) -> BridgeResult<PointRegistry> {
    let registry = PointRegistry::create(&facility_parameters(devices), units)?;
    for point in registry.iter() {
        gateway.create_point(point).await?;
    }
    Ok(registry)
}

#[async_trait]
impl<S, G> Service for Pipeline<S, G>
where
    S: TelemetrySource,
    G: ProtocolGateway,
{
    fn spec(&self) -> ServiceSpec {
        ServiceSpec::new("airbridge/pipeline", "Telemetry Polling Pipeline")
            .with_tick_interval(self.interval)
            .with_description("Polls facility telemetry and updates BACnet points")
    }

    async fn on_start(&mut self, ctx: &ServiceContext) -> ServiceResult<()> {
        tracing::info!(
            service_id = %ctx.service_id,
            facility_id = %self.facility_id,
            points = self.registry.len(),
            interval_secs = self.interval.as_secs(),
            "Polling pipeline starting"
        );
        Ok(())
    }

    async fn on_tick(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
        self.run_cycle()
            .await
            .map(|_| ())
            .map_err(|e| ServiceError::TickFailed(e.to_string()))
    }

    async fn on_stop(&mut self, ctx: &ServiceContext) -> ServiceResult<()> {
        tracing::info!(
            service_id = %ctx.service_id,
            cycles = ctx.ticks,
            "Polling pipeline stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use bridge_runtime::ServiceManager;
    use parking_lot::Mutex;
    use serde_json::{Value, json};

    use crate::error::BridgeError;
    use crate::facility::{DeviceId, Reading};
    use crate::gateway::{
        BacnetDateTime, GatewayError, GatewayResult, LocalDevice, LocalGateway,
        ObjectIdentifier, ObjectType, Segmentation,
    };
    use crate::registry::{Point, PointKind, PointSpec, PointValue};

    /// In-memory telemetry with switchable failure
    #[derive(Default)]
    struct FakeSource {
        devices: Mutex<Vec<DeviceId>>,
        readings: Mutex<HashMap<DeviceId, Reading>>,
        fail: Mutex<bool>,
        roster_calls: AtomicUsize,
    }

    impl FakeSource {
        fn with(readings: Value) -> Self {
            let source = Self::default();
            for (device, reading) in readings.as_object().unwrap() {
                source.devices.lock().push(device.clone());
                if let Some(reading) = reading.as_object() {
                    source
                        .readings
                        .lock()
                        .insert(device.clone(), reading.clone());
                }
            }
            source
        }

        fn set_reading(&self, device: &str, reading: Value) {
            self.readings
                .lock()
                .insert(device.to_string(), reading.as_object().cloned().unwrap());
        }
    }

    #[async_trait]
    impl TelemetrySource for Arc<FakeSource> {
        async fn list_devices(&self, _facility_id: &str) -> BridgeResult<Vec<DeviceId>> {
            self.roster_calls.fetch_add(1, Ordering::SeqCst);
            if *self.fail.lock() {
                let source = serde_json::from_str::<Value>("not json").unwrap_err();
                return Err(BridgeError::Parse {
                    endpoint: "fake".into(),
                    source,
                });
            }
            Ok(self.devices.lock().clone())
        }

        async fn latest_reading(&self, device_id: &str) -> BridgeResult<Option<Reading>> {
            Ok(self.readings.lock().get(device_id).cloned())
        }
    }

    fn local_gateway() -> LocalGateway {
        LocalGateway::new(LocalDevice {
            object_name: "bridge".into(),
            instance: 599,
            address: "127.0.0.1:47808".into(),
            vendor_identifier: 15,
            max_apdu_length_accepted: 1024,
            segmentation_supported: Segmentation::SegmentedBoth,
        })
    }

    fn gateway() -> Arc<LocalGateway> {
        Arc::new(local_gateway())
    }

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.api.facility_id = "fac-1".into();
        config
    }

    fn analog(pipeline: &Pipeline<Arc<FakeSource>, LocalGateway>, path: &str) -> Option<f64> {
        pipeline.registry().get(path).and_then(|p| p.value.as_f64())
    }

    #[tokio::test]
    async fn test_bootstrap_creates_points_for_roster() {
        let source = Arc::new(FakeSource::with(json!({"A": {}, "B": {}})));
        let gw = gateway();

        let pipeline = Pipeline::bootstrap(source, Arc::clone(&gw), &config())
            .await
            .unwrap();

        assert_eq!(pipeline.registry().len(), 33);
        assert_eq!(gw.object_count(), 33);
        assert!(pipeline.registry().contains("$.indoor.B.asthmaRisk"));
        assert_eq!(pipeline.spec().tick_interval, Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_end_to_end_cycle() {
        let source = Arc::new(FakeSource::with(json!({
            "A": {"t": 70, "h": 30},
            "B": {"t": 74, "h": 40}
        })));
        let gw = gateway();
        let mut pipeline = Pipeline::bootstrap(source, Arc::clone(&gw), &config())
            .await
            .unwrap();

        let report = pipeline.run_cycle().await.unwrap();

        let record = &report.record;
        assert_eq!(record.get("$.indoor.A.t"), Some(&json!(70)));
        assert_eq!(record.get("$.indoor.B.t"), Some(&json!(74)));
        assert_eq!(record.get("$.indoor.facility_average.t"), Some(&json!(72.0)));
        assert_eq!(record.get("$.indoor.facility_average.h"), Some(&json!(35.0)));

        assert_eq!(analog(&pipeline, "$.indoor.A.t"), Some(70.0));
        assert_eq!(analog(&pipeline, "$.indoor.B.h"), Some(40.0));
        assert_eq!(analog(&pipeline, "$.indoor.facility_average.t"), Some(72.0));
        assert_eq!(analog(&pipeline, "$.indoor.facility_average.h"), Some(35.0));

        let id = pipeline
            .registry()
            .get("$.indoor.facility_average.t")
            .unwrap()
            .identifier;
        assert_eq!(
            gw.read_present_value(id).and_then(|v| v.as_f64()),
            Some(72.0)
        );

        assert_eq!(report.devices, 2);
        assert_eq!(report.updated, 6);
        assert_eq!(report.unregistered, 0);
        assert_eq!(gw.announcements(), 1);
    }

    #[tokio::test]
    async fn test_device_without_reading_is_skipped() {
        let source = Arc::new(FakeSource::with(json!({"A": {"t": 70}, "B": null})));
        let mut pipeline = Pipeline::bootstrap(Arc::clone(&source), gateway(), &config())
            .await
            .unwrap();

        let report = pipeline.run_cycle().await.unwrap();
        assert_eq!(report.devices, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.record.get("$.indoor.B.t").is_none());
        assert_eq!(analog(&pipeline, "$.indoor.facility_average.t"), Some(70.0));
        assert_eq!(analog(&pipeline, "$.indoor.B.t"), Some(0.0));
    }

    #[tokio::test]
    async fn test_values_are_overwritten_every_cycle() {
        let source = Arc::new(FakeSource::with(json!({"A": {"t": 70}})));
        let mut pipeline = Pipeline::bootstrap(Arc::clone(&source), gateway(), &config())
            .await
            .unwrap();

        pipeline.run_cycle().await.unwrap();
        source.set_reading("A", json!({"t": 68}));
        pipeline.run_cycle().await.unwrap();

        assert_eq!(analog(&pipeline, "$.indoor.A.t"), Some(68.0));
    }

    #[tokio::test]
    async fn test_unknown_metrics_and_new_devices_are_ignored() {
        let source = Arc::new(FakeSource::with(json!({"A": {"t": 70, "battery": 3.1}})));
        let mut pipeline = Pipeline::bootstrap(Arc::clone(&source), gateway(), &config())
            .await
            .unwrap();

        source.devices.lock().push("Z".into());
        source.set_reading("Z", json!({"t": 90}));

        let report = pipeline.run_cycle().await.unwrap();
        assert_eq!(pipeline.registry().len(), 22);
        assert!(!pipeline.registry().contains("$.indoor.Z.t"));
        // A.battery, Z.t and facility_average.battery have no point
        assert_eq!(report.unregistered, 3);
        assert_eq!(analog(&pipeline, "$.indoor.facility_average.t"), Some(80.0));
    }

    #[tokio::test]
    async fn test_non_numeric_metric_is_dropped_from_average() {
        let source = Arc::new(FakeSource::with(json!({
            "A": {"t": 70, "h": 30},
            "B": {"t": "n/a", "h": 40}
        })));
        let mut pipeline = Pipeline::bootstrap(source, gateway(), &config())
            .await
            .unwrap();

        let report = pipeline.run_cycle().await.unwrap();
        assert!(report.record.get("$.indoor.facility_average.t").is_none());
        assert_eq!(analog(&pipeline, "$.indoor.facility_average.h"), Some(35.0));
        // B.t is still flattened but cannot go into an analog point
        assert_eq!(report.rejected, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_fails_cycle() {
        let source = Arc::new(FakeSource::with(json!({"A": {"t": 70}})));
        let mut pipeline = Pipeline::bootstrap(Arc::clone(&source), gateway(), &config())
            .await
            .unwrap();

        *source.fail.lock() = true;
        assert!(matches!(
            pipeline.run_cycle().await,
            Err(BridgeError::Parse { .. })
        ));
        assert_eq!(analog(&pipeline, "$.indoor.A.t"), Some(0.0));
    }

    /// Local gateway whose value pushes can be switched off
    struct OfflineGateway {
        inner: LocalGateway,
        offline: AtomicBool,
    }

    #[async_trait]
    impl ProtocolGateway for OfflineGateway {
        async fn create_point(&self, point: &Point) -> GatewayResult<()> {
            self.inner.create_point(point).await
        }

        async fn set_present_value(
            &self,
            identifier: ObjectIdentifier,
            value: &PointValue,
        ) -> GatewayResult<()> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(GatewayError::Transport("link down".into()));
            }
            self.inner.set_present_value(identifier, value).await
        }

        async fn announce_presence(&self) -> GatewayResult<()> {
            self.inner.announce_presence().await
        }
    }

    #[tokio::test]
    async fn test_failed_push_leaves_registry_applied_and_resyncs() {
        let source = Arc::new(FakeSource::with(json!({"A": {"t": 70, "h": 30}})));
        let gw = Arc::new(OfflineGateway {
            inner: local_gateway(),
            offline: AtomicBool::new(true),
        });
        let mut pipeline = Pipeline::bootstrap(Arc::clone(&source), Arc::clone(&gw), &config())
            .await
            .unwrap();

        assert!(matches!(
            pipeline.run_cycle().await,
            Err(BridgeError::Gateway(GatewayError::Transport(_)))
        ));
        // Every path reached the registry before the first push
        for path in ["$.indoor.A.t", "$.indoor.A.h", "$.indoor.facility_average.t"] {
            assert!(pipeline.registry().get(path).unwrap().value.as_f64().is_some_and(|v| v > 0.0));
        }
        let t = pipeline.registry().get("$.indoor.A.t").unwrap().identifier;
        assert_eq!(gw.inner.read_present_value(t).and_then(|v| v.as_f64()), Some(0.0));

        gw.offline.store(false, Ordering::SeqCst);
        pipeline.run_cycle().await.unwrap();
        assert_eq!(gw.inner.read_present_value(t).and_then(|v| v.as_f64()), Some(70.0));
    }

    async fn timezone_pipeline(
        gw: Arc<LocalGateway>,
    ) -> Pipeline<Arc<FakeSource>, LocalGateway> {
        let specs = vec![PointSpec::date_time("$.indoor.A.ts")];
        let registry = PointRegistry::create(&specs, UnitSystem::Imperial).unwrap();
        for point in registry.iter() {
            gw.create_point(point).await.unwrap();
        }
        Pipeline::new(
            Arc::new(FakeSource::default()),
            gw,
            registry,
            "fac-1",
            Duration::from_secs(60),
        )
    }

    fn local_hour(pipeline: &Pipeline<Arc<FakeSource>, LocalGateway>) -> Option<u8> {
        match pipeline.registry().get("$.indoor.A.ts").map(|p| &p.value) {
            Some(PointValue::DateTime {
                present_value: Some(BacnetDateTime { time, .. }),
            }) => Some(time.hour),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_timezone_applies_regardless_of_record_order() {
        // 2021-03-04T23:30:00Z
        let ts = json!(1_614_900_600);

        for tz_first in [true, false] {
            let gw = gateway();
            let mut pipeline = timezone_pipeline(Arc::clone(&gw)).await;

            let mut entries = vec![
                ("$.indoor.A.ts".to_string(), ts.clone()),
                ("$.timezone".to_string(), json!(3600)),
            ];
            if tz_first {
                entries.reverse();
            }
            let report = pipeline
                .apply_record(entries.into_iter().collect())
                .await
                .unwrap();

            assert_eq!(report.updated, 1);
            assert_eq!(report.unregistered, 1);
            assert_eq!(pipeline.registry().timezone_offset(), 3600);
            assert_eq!(local_hour(&pipeline), Some(0));

            let id = pipeline.registry().get("$.indoor.A.ts").unwrap().identifier;
            assert_eq!(
                gw.read_present_value(id),
                Some(pipeline.registry().get("$.indoor.A.ts").unwrap().value.clone())
            );
        }
    }

    #[tokio::test]
    async fn test_timezone_persists_until_next_offset() {
        let mut pipeline = timezone_pipeline(gateway()).await;

        let with_offset: FlatRecord = vec![("$.timezone".to_string(), json!(-18000))]
            .into_iter()
            .collect();
        pipeline.apply_record(with_offset).await.unwrap();
        assert_eq!(pipeline.registry().timezone_offset(), -18000);

        let without: FlatRecord = vec![("$.indoor.A.ts".to_string(), json!(1_614_900_600))]
            .into_iter()
            .collect();
        pipeline.apply_record(without).await.unwrap();
        assert_eq!(pipeline.registry().timezone_offset(), -18000);
        // 23:30 UTC at UTC-5
        assert_eq!(local_hour(&pipeline), Some(18));
    }

    #[tokio::test]
    async fn test_device_timezone_field_is_not_the_record_timezone() {
        let mut pipeline = timezone_pipeline(gateway()).await;

        let mut data = FacilityData::new();
        data.insert("A", json!({"timezone": 3600}).as_object().cloned().unwrap());
        let record = pipeline.aggregate_and_flatten(data);
        assert!(record.get("$.indoor.A.timezone").is_some());
        assert_eq!(record.timezone_offset(), None);

        pipeline.apply_record(record).await.unwrap();
        assert_eq!(pipeline.registry().timezone_offset(), 0);
    }

    #[tokio::test]
    async fn test_point_kinds_map_to_object_types() {
        let pipeline = timezone_pipeline(gateway()).await;
        let point = pipeline.registry().get("$.indoor.A.ts").unwrap();
        assert_eq!(point.kind(), PointKind::DateTime);
        assert_eq!(point.identifier.object_type, ObjectType::DatetimeValue);
    }

    #[tokio::test]
    async fn test_scheduler_runs_cycles_and_survives_failures() {
        let source = Arc::new(FakeSource::with(json!({"A": {"t": 70}})));
        let gw = gateway();
        let mut pipeline = Pipeline::bootstrap(Arc::clone(&source), Arc::clone(&gw), &config())
            .await
            .unwrap();
        pipeline.interval = Duration::from_millis(20);

        *source.fail.lock() = true;
        let manager = ServiceManager::new();
        let handle = manager.spawn(pipeline).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Cycles keep being attempted while the upstream fails
        assert!(source.roster_calls.load(Ordering::SeqCst) >= 3);
        assert!(handle.is_running());

        *source.fail.lock() = false;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let id = gw
            .read(ObjectIdentifier::new(ObjectType::AnalogValue, 16))
            .map(|entry| entry.object_name);
        assert_eq!(id.as_deref(), Some("$.indoor.A.t"));
        let t = gw
            .read_present_value(ObjectIdentifier::new(
                ObjectType::AnalogValue,
                16,
            ))
            .and_then(|v| v.as_f64());
        assert_eq!(t, Some(70.0));

        manager.shutdown_all().await.unwrap();
    }
}
