//! Per-cycle facility snapshot

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

/// Hardware address identifying one sensor
pub type DeviceId = String;

/// One device's metrics at one point in time
pub type Reading = Map<String, Value>;

/// Entry name under which facility-wide averages are published
pub const FACILITY_AVERAGE: &str = "facility_average";

/// Latest reading of every device for one cycle, plus the averages
/// computed from them. Built fresh each cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacilityData {
    devices: BTreeMap<DeviceId, Reading>,
    average: BTreeMap<String, f64>,
}

impl FacilityData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a device's reading, replacing anything stored for it earlier
    pub fn insert(&mut self, device: impl Into<DeviceId>, reading: Reading) {
        self.devices.insert(device.into(), reading);
    }

    pub fn devices(&self) -> impl Iterator<Item = (&DeviceId, &Reading)> {
        self.devices.iter()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn reading(&self, device: &str) -> Option<&Reading> {
        self.devices.get(device)
    }

    pub fn average(&self) -> &BTreeMap<String, f64> {
        &self.average
    }

    pub fn set_average(&mut self, average: BTreeMap<String, f64>) {
        self.average = average;
    }

    /// Nested document that gets flattened:
    /// `{"indoor": {<device>: {...}, "facility_average": {...}}}`
    pub fn to_document(&self) -> Value {
        let mut indoor: Map<String, Value> = self
            .devices
            .iter()
            .map(|(device, reading)| (device.clone(), Value::Object(reading.clone())))
            .collect();

        let average: Map<String, Value> = self
            .average
            .iter()
            .map(|(metric, mean)| (metric.clone(), json!(mean)))
            .collect();
        indoor.insert(FACILITY_AVERAGE.to_string(), Value::Object(average));

        json!({ "indoor": indoor })
    }
}
