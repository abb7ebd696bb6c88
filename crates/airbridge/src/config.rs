//! Bridge Configuration
//!
//! Layered with figment, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. TOML file (`airbridge.toml` unless `--config` says otherwise)
//! 3. `AIRBRIDGE_*` environment variables, `__` separating sections
//!    (e.g. `AIRBRIDGE_API__FACILITY_ID`)
//! 4. `APPUNITS` and `APPINTERVAL`, kept for existing deployments
//!
//! ```toml
//! units = "metric"
//! interval_minutes = 5
//!
//! [api]
//! dev_endpoint = "https://api.example.com/facility/devices"
//! data_endpoint = "https://api.example.com/device/data"
//! facility_id = "fac-1"
//!
//! [device]
//! object_name = "Air Quality Bridge"
//! object_instance = 599
//! ```

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};
use crate::gateway::{LocalDevice, Segmentation};
use crate::units::UnitSystem;

/// Prefix of the structured environment overrides
pub const ENV_PREFIX: &str = "AIRBRIDGE_";

/// One week, the longest accepted polling period
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

/// One week, the longest accepted readings window
pub const MAX_WINDOW_HOURS: u64 = 7 * 24;

/// Full bridge configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Measurement system used to pick point units
    #[serde(default)]
    pub units: UnitSystem,

    /// Minutes between polling cycles
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub device: DeviceConfig,
}

fn default_interval_minutes() -> u64 {
    1
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            units: UnitSystem::default(),
            interval_minutes: default_interval_minutes(),
            api: ApiConfig::default(),
            device: DeviceConfig::default(),
        }
    }
}

/// Telemetry API endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Roster endpoint (`GET`, header `facID`)
    #[serde(default)]
    pub dev_endpoint: String,

    /// Readings endpoint (`POST`, headers `mac`, `start_ts`, `end_ts`)
    #[serde(default)]
    pub data_endpoint: String,

    #[serde(default)]
    pub facility_id: String,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Trailing window of the readings request
    #[serde(default = "default_window_hours")]
    pub window_hours: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_window_hours() -> u64 {
    5
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            dev_endpoint: String::new(),
            data_endpoint: String::new(),
            facility_id: String::new(),
            timeout_secs: default_timeout_secs(),
            window_hours: default_window_hours(),
        }
    }
}

/// Identity of the local BACnet device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_object_name")]
    pub object_name: String,

    #[serde(default = "default_object_instance")]
    pub object_instance: u32,

    /// BACnet/IP address the device is reachable at
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_vendor_identifier")]
    pub vendor_identifier: u16,

    #[serde(default = "default_max_apdu")]
    pub max_apdu_length_accepted: u16,

    #[serde(default)]
    pub segmentation_supported: Segmentation,
}

fn default_object_name() -> String {
    "Air Quality Bridge".to_string()
}

fn default_object_instance() -> u32 {
    599
}

fn default_address() -> String {
    "0.0.0.0:47808".to_string()
}

fn default_vendor_identifier() -> u16 {
    15
}

fn default_max_apdu() -> u16 {
    1024
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            object_name: default_object_name(),
            object_instance: default_object_instance(),
            address: default_address(),
            vendor_identifier: default_vendor_identifier(),
            max_apdu_length_accepted: default_max_apdu(),
            segmentation_supported: Segmentation::default(),
        }
    }
}

impl BridgeConfig {
    /// Layered configuration sources, without extracting
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(BridgeConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Env::raw().only(&["APPUNITS", "APPINTERVAL"]).map(|key| {
                if key.as_str().eq_ignore_ascii_case("APPUNITS") {
                    "units".into()
                } else {
                    "interval_minutes".into()
                }
            }))
    }

    /// Load and validate configuration
    pub fn load(path: &Path) -> BridgeResult<Self> {
        let config: Self = Self::figment(path)
            .extract()
            .map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;

        if config.units == UnitSystem::Unrecognized {
            tracing::warn!("Unrecognized measurement system, using default point units");
        }
        Ok(config)
    }

    pub fn validate(&self) -> BridgeResult<()> {
        let missing = [
            ("api.dev_endpoint", &self.api.dev_endpoint),
            ("api.data_endpoint", &self.api.data_endpoint),
            ("api.facility_id", &self.api.facility_id),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());

        if let Some((key, _)) = missing {
            return Err(BridgeError::Config(format!("{} must be set", key)));
        }
        if !(1..=MAX_INTERVAL_MINUTES).contains(&self.interval_minutes) {
            return Err(BridgeError::Config(format!(
                "interval_minutes must be between 1 and {}",
                MAX_INTERVAL_MINUTES
            )));
        }
        if !(1..=MAX_WINDOW_HOURS).contains(&self.api.window_hours) {
            return Err(BridgeError::Config(format!(
                "api.window_hours must be between 1 and {}",
                MAX_WINDOW_HOURS
            )));
        }
        if self.api.timeout_secs == 0 {
            return Err(BridgeError::Config(
                "api.timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Period between polling cycles; bounded by `validate`
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    pub fn local_device(&self) -> LocalDevice {
        LocalDevice {
            object_name: self.device.object_name.clone(),
            instance: self.device.object_instance,
            address: self.device.address.clone(),
            vendor_identifier: self.device.vendor_identifier,
            max_apdu_length_accepted: self.device.max_apdu_length_accepted,
            segmentation_supported: self.device.segmentation_supported,
        }
    }
}
