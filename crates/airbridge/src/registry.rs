//! Point Registry
//!
//! Owns every point the bridge exposes. Points are created once at startup
//! from a parameter list; afterwards the set of names is fixed and only
//! present values change.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::facility::{DeviceId, FACILITY_AVERAGE};
use crate::gateway::{BacnetDateTime, ObjectIdentifier, ObjectType};
use crate::units::{EngineeringUnit, UnitSpec, UnitSystem};

/// Metrics exposed for the facility average and for every device
pub const METRICS: [(&str, UnitSpec); 11] = [
    ("cotwo", UnitSpec::Fixed(EngineeringUnit::PartsPerMillion)),
    ("pmten", UnitSpec::Fixed(EngineeringUnit::MicrogramsPerCubicMeter)),
    ("pmtwo", UnitSpec::Fixed(EngineeringUnit::MicrogramsPerCubicMeter)),
    ("voc", UnitSpec::Fixed(EngineeringUnit::PartsPerMillion)),
    ("t", UnitSpec::Fixed(EngineeringUnit::DegreesCelsius)),
    ("h", UnitSpec::Fixed(EngineeringUnit::PercentRelativeHumidity)),
    ("mold", UnitSpec::Fixed(EngineeringUnit::NoUnits)),
    ("covid", UnitSpec::Fixed(EngineeringUnit::NoUnits)),
    ("productivity", UnitSpec::Fixed(EngineeringUnit::NoUnits)),
    ("comfort", UnitSpec::Fixed(EngineeringUnit::NoUnits)),
    ("asthmaRisk", UnitSpec::Fixed(EngineeringUnit::NoUnits)),
];

/// Errors raised while building the registry
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("duplicate point name {0}")]
    DuplicatePoint(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Points
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of value a point holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PointKind {
    Analog,
    DateTime,
}

impl PointKind {
    pub fn object_type(&self) -> ObjectType {
        match self {
            PointKind::Analog => ObjectType::AnalogValue,
            PointKind::DateTime => ObjectType::DatetimeValue,
        }
    }
}

/// Present value of a point, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PointValue {
    Analog {
        present_value: f64,
        units: Option<EngineeringUnit>,
    },
    DateTime {
        present_value: Option<BacnetDateTime>,
    },
}

impl PointValue {
    fn initial(kind: PointKind, units: Option<EngineeringUnit>) -> Self {
        match kind {
            PointKind::Analog => PointValue::Analog {
                present_value: 0.0,
                units,
            },
            PointKind::DateTime => PointValue::DateTime {
                present_value: None,
            },
        }
    }

    pub fn kind(&self) -> PointKind {
        match self {
            PointValue::Analog { .. } => PointKind::Analog,
            PointValue::DateTime { .. } => PointKind::DateTime,
        }
    }

    /// Analog present value, if this is an analog point
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PointValue::Analog { present_value, .. } => Some(*present_value),
            PointValue::DateTime { .. } => None,
        }
    }
}

/// A named value cell exposed as one BACnet object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub name: String,
    pub identifier: ObjectIdentifier,
    pub value: PointValue,
}

impl Point {
    pub fn new(
        name: impl Into<String>,
        kind: PointKind,
        instance: u32,
        units: Option<EngineeringUnit>,
    ) -> Self {
        Self {
            name: name.into(),
            identifier: ObjectIdentifier::new(kind.object_type(), instance),
            value: PointValue::initial(kind, units),
        }
    }

    pub fn kind(&self) -> PointKind {
        self.value.kind()
    }

    pub fn units(&self) -> Option<EngineeringUnit> {
        match &self.value {
            PointValue::Analog { units, .. } => *units,
            PointValue::DateTime { .. } => None,
        }
    }
}

/// Entry of the parameter list a registry is created from
#[derive(Debug, Clone, PartialEq)]
pub struct PointSpec {
    pub name: String,
    pub kind: PointKind,
    pub units: UnitSpec,
}

impl PointSpec {
    pub fn analog(name: impl Into<String>, units: UnitSpec) -> Self {
        Self {
            name: name.into(),
            kind: PointKind::Analog,
            units,
        }
    }

    pub fn date_time(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PointKind::DateTime,
            units: UnitSpec::None,
        }
    }
}

/// Path of a metric under the facility-average entry or a device entry
pub fn metric_path(entry: &str, metric: &str) -> String {
    format!("$.indoor.{}.{}", entry, metric)
}

/// Parameter list for the facility average followed by every device
pub fn facility_parameters(devices: &[DeviceId]) -> Vec<PointSpec> {
    std::iter::once(FACILITY_AVERAGE)
        .chain(devices.iter().map(String::as_str))
        .flat_map(|entry| {
            METRICS
                .iter()
                .map(move |(metric, units)| PointSpec::analog(metric_path(entry, metric), *units))
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Result of addressing a point by path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The point took the new value
    Updated,
    /// No point is registered under the path
    Unregistered,
    /// The value does not fit the point's kind; the point is unchanged
    Rejected,
}

/// Points keyed by name, in creation order
#[derive(Debug, Default)]
pub struct PointRegistry {
    points: Vec<Point>,
    index: HashMap<String, usize>,
    timezone_offset: i64,
}

impl PointRegistry {
    /// Create one point per spec. Instance numbers start at 1 and share a
    /// single counter across kinds.
    pub fn create(specs: &[PointSpec], system: UnitSystem) -> Result<Self, RegistryError> {
        let mut registry = Self::default();

        for (spec, instance) in specs.iter().zip(1u32..) {
            if registry.index.contains_key(&spec.name) {
                return Err(RegistryError::DuplicatePoint(spec.name.clone()));
            }

            let units = match spec.kind {
                PointKind::Analog => spec.units.resolve(system),
                PointKind::DateTime => None,
            };
            let point = Point::new(spec.name.clone(), spec.kind, instance, units);

            registry.index.insert(spec.name.clone(), registry.points.len());
            registry.points.push(point);
        }

        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&Point> {
        self.index.get(name).map(|&i| &self.points[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Points in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Seconds east of UTC applied to datetime points
    pub fn timezone_offset(&self) -> i64 {
        self.timezone_offset
    }

    pub fn set_timezone_offset(&mut self, offset_secs: i64) {
        self.timezone_offset = offset_secs;
    }

    /// Write `value` into the point named `path`.
    ///
    /// Datetime points read `value` as epoch seconds and use the timezone
    /// offset current at the time of the call.
    pub fn set_value(&mut self, path: &str, value: &Value) -> SetOutcome {
        let Some(&i) = self.index.get(path) else {
            tracing::trace!(path, "No point registered for path");
            return SetOutcome::Unregistered;
        };
        let offset = self.timezone_offset;
        let point = &mut self.points[i];

        match &mut point.value {
            PointValue::Analog { present_value, .. } => match value.as_f64() {
                Some(v) => *present_value = v,
                None => {
                    tracing::warn!(path, %value, "Non-numeric value for analog point");
                    return SetOutcome::Rejected;
                }
            },
            PointValue::DateTime { present_value } => {
                match value.as_f64().and_then(|ts| BacnetDateTime::from_epoch(ts, offset)) {
                    Some(dt) => *present_value = Some(dt),
                    None => {
                        tracing::warn!(path, %value, offset, "Invalid timestamp for datetime point");
                        return SetOutcome::Rejected;
                    }
                }
            }
        }

        SetOutcome::Updated
    }
}
