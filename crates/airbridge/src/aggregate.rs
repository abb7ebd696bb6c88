//! Facility-wide averaging of device readings

use std::collections::BTreeMap;

use serde_json::Value;

use crate::facility::{FACILITY_AVERAGE, FacilityData};

/// Arithmetic mean of every metric across all devices.
///
/// A metric with any non-numeric value on any device is left out entirely;
/// other metrics are unaffected. A device named like the synthesized
/// average entry is not counted.
pub fn average(data: &FacilityData) -> BTreeMap<String, f64> {
    let mut collected: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();

    for (device, reading) in data.devices() {
        if device == FACILITY_AVERAGE {
            continue;
        }
        for (metric, value) in reading {
            collected.entry(metric.as_str()).or_default().push(value);
        }
    }

    collected
        .into_iter()
        .filter_map(|(metric, values)| match mean(&values) {
            Some(m) => Some((metric.to_string(), m)),
            None => {
                tracing::debug!(metric, "Skipping non-numeric metric in facility average");
                None
            }
        })
        .collect()
}

fn mean(values: &[&Value]) -> Option<f64> {
    let mut sum = 0.0;
    for value in values {
        // `as_f64` only accepts JSON numbers; bools and strings fall through.
        sum += value.as_f64()?;
    }
    Some(sum / values.len() as f64)
}
