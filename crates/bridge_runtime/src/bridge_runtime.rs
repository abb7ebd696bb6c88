//! Bridge Runtime
//!
//! Long-running service lifecycle for the bridge: services are spawned onto
//! their own task, started, ticked on a fixed period and stopped on shutdown.

pub mod service;

pub use service::{
    Service, ServiceContext, ServiceError, ServiceHandle, ServiceManager, ServiceResult,
    ServiceSpec, ServiceState,
};
