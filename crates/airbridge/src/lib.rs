//! Airbridge - air quality telemetry to BACnet
//!
//! This crate polls a cloud telemetry API for the indoor air readings of a
//! facility and republishes them as BACnet points:
//! - Device roster and latest readings via [`api`]
//! - Facility-wide averages via [`aggregate`]
//! - JSON-path flattening via [`flatten`]
//! - Named BACnet points via [`registry`] and [`gateway`]
//! - The periodic cycle tying it together via [`pipeline`]

// Re-export the service runtime
pub use bridge_runtime;

pub mod aggregate;
pub mod api;
pub mod config;
pub mod error;
pub mod facility;
pub mod flatten;
pub mod gateway;
pub mod pipeline;
pub mod registry;
pub mod units;

pub use api::{ApiClient, TelemetrySource};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use gateway::{LocalGateway, ProtocolGateway};
pub use pipeline::{CycleReport, Pipeline};
pub use registry::{PointRegistry, SetOutcome};
