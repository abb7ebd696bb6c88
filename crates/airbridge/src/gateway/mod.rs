//! Protocol Gateway
//!
//! The network-facing BACnet stack is an external collaborator. The bridge
//! talks to it through [`ProtocolGateway`]: points are registered once at
//! startup, their present values are pushed after every cycle, and the
//! local device is announced at the start of each cycle.
//!
//! [`LocalGateway`] keeps the resulting object table in process and applies
//! the discovery policy; a transport layer reads from it when serving
//! network requests.

mod discovery;
mod local;
mod types;

pub use discovery::{DiscoveryError, DiscoveryResponder};
pub use local::{LocalGateway, ObjectEntry};
pub use types::{
    BacnetDate, BacnetDateTime, BacnetTime, DiscoveredDevice, IAm, LocalDevice, ObjectIdentifier,
    ObjectType, Segmentation, WhoIs,
};

use async_trait::async_trait;

use crate::registry::{Point, PointValue};

/// Errors reported by the protocol gateway
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("object {0} already exists")]
    DuplicateObject(ObjectIdentifier),

    #[error("unknown object {0}")]
    UnknownObject(ObjectIdentifier),

    #[error("gateway transport error: {0}")]
    Transport(String),
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Boundary between the polling pipeline and the BACnet object model
#[async_trait]
pub trait ProtocolGateway: Send + Sync + 'static {
    /// Expose a new object for `point`
    async fn create_point(&self, point: &Point) -> GatewayResult<()>;

    /// Replace the present value of an existing object
    async fn set_present_value(
        &self,
        identifier: ObjectIdentifier,
        value: &PointValue,
    ) -> GatewayResult<()>;

    /// Broadcast an I-Am for the local device
    async fn announce_presence(&self) -> GatewayResult<()>;
}
