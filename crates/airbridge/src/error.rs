//! Bridge error types

use crate::gateway::GatewayError;
use crate::registry::RegistryError;

/// Errors surfaced by the polling pipeline and its collaborators
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Transport failure, timeout or error status from the telemetry API
    #[error("request to {endpoint} failed: {source}")]
    Network {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Response body from the telemetry API could not be decoded
    #[error("malformed response from {endpoint}: {source}")]
    Parse {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
