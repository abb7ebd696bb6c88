//! Engineering units and the measurement-system unit policy

use serde::{Deserialize, Serialize};

/// BACnet engineering units used by the exposed points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineeringUnit {
    PartsPerMillion,
    MicrogramsPerCubicMeter,
    DegreesCelsius,
    DegreesFahrenheit,
    Percent,
    PercentRelativeHumidity,
    NoUnits,
}

impl EngineeringUnit {
    /// Enumerated value of the unit on the wire
    pub fn code(&self) -> u16 {
        match self {
            EngineeringUnit::PercentRelativeHumidity => 29,
            EngineeringUnit::DegreesCelsius => 62,
            EngineeringUnit::DegreesFahrenheit => 64,
            EngineeringUnit::NoUnits => 95,
            EngineeringUnit::PartsPerMillion => 96,
            EngineeringUnit::Percent => 98,
            EngineeringUnit::MicrogramsPerCubicMeter => 219,
        }
    }
}

impl std::fmt::Display for EngineeringUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineeringUnit::PartsPerMillion => "parts-per-million",
            EngineeringUnit::MicrogramsPerCubicMeter => "micrograms-per-cubic-meter",
            EngineeringUnit::DegreesCelsius => "degrees-celsius",
            EngineeringUnit::DegreesFahrenheit => "degrees-fahrenheit",
            EngineeringUnit::Percent => "percent",
            EngineeringUnit::PercentRelativeHumidity => "percent-relative-humidity",
            EngineeringUnit::NoUnits => "no-units",
        };
        f.write_str(name)
    }
}

/// Measurement system selected by configuration
///
/// Any value other than `metric` or `imperial` deserializes to `Unrecognized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitSystem {
    Metric,
    #[default]
    Imperial,
    #[serde(other)]
    Unrecognized,
}

/// Units declared for one point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSpec {
    /// No unit; the point is created without one
    None,
    /// A single unit regardless of measurement system
    Fixed(EngineeringUnit),
    /// Per-system units plus the fallback for unrecognized systems
    BySystem {
        default: EngineeringUnit,
        metric: EngineeringUnit,
        imperial: EngineeringUnit,
    },
}

impl UnitSpec {
    /// Pick the unit a point is created with
    pub fn resolve(&self, system: UnitSystem) -> Option<EngineeringUnit> {
        match *self {
            UnitSpec::None => None,
            UnitSpec::Fixed(unit) => Some(unit),
            UnitSpec::BySystem {
                metric,
                imperial,
                default,
            } => Some(match system {
                UnitSystem::Metric => metric,
                UnitSystem::Imperial => imperial,
                UnitSystem::Unrecognized => default,
            }),
        }
    }
}
