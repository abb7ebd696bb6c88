//! Service Lifecycle Management
//!
//! A service is a long-running component owned by its own task. The manager
//! drives it through the following hooks:
//! - `on_start`: called once before the first tick
//! - `on_tick`: called on every tick of the service's fixed period
//! - `on_stop`: called once on shutdown
//!
//! Ticks never overlap: the next tick is only awaited after `on_tick`
//! returns. An error from `on_tick` is logged and the loop keeps running.

mod handle;
mod manager;

pub use handle::*;
pub use manager::*;

use std::time::Duration;

use async_trait::async_trait;

// ─────────────────────────────────────────────────────────────────────────────
// Service Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during service lifecycle
#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("Service already running: {0}")]
    AlreadyRunning(String),

    #[error("Tick failed: {0}")]
    TickFailed(String),

    #[error("Shutdown timeout")]
    ShutdownTimeout,
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

// ─────────────────────────────────────────────────────────────────────────────
// Service Specification
// ─────────────────────────────────────────────────────────────────────────────

/// Identity and schedule of a service
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Unique service identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Period between `on_tick` calls. The first tick fires right after
    /// `on_start`; missed ticks are not caught up.
    pub tick_interval: Option<Duration>,

    /// Upper bound on `on_stop`
    pub shutdown_timeout: Duration,

    pub description: Option<String>,
}

impl ServiceSpec {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tick_interval: None,
            shutdown_timeout: Duration::from_secs(30),
            description: None,
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = Some(interval);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Context
// ─────────────────────────────────────────────────────────────────────────────

/// Context passed to service lifecycle methods
pub struct ServiceContext {
    pub service_id: String,

    /// Number of ticks completed so far, successful or not
    pub ticks: u64,
}

impl ServiceContext {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            ticks: 0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Trait
// ─────────────────────────────────────────────────────────────────────────────

/// The core Service trait with lifecycle hooks
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Returns the service specification
    fn spec(&self) -> ServiceSpec;

    /// Called when the service starts
    ///
    /// If this returns an error, the service will not be started.
    async fn on_start(&mut self, ctx: &ServiceContext) -> ServiceResult<()>;

    /// Called when the service stops
    ///
    /// The service will be stopped even if this returns an error.
    async fn on_stop(&mut self, ctx: &ServiceContext) -> ServiceResult<()>;

    /// Called on every tick when `ServiceSpec::tick_interval` is set
    async fn on_tick(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
