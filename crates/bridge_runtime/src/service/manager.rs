//! Service Manager
//!
//! Spawns services onto their own tasks and shuts them all down together.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use super::handle::StateCell;
use super::{Service, ServiceContext, ServiceError, ServiceHandle, ServiceResult, ServiceState};

/// Owner of every spawned service
pub struct ServiceManager {
    /// Spawned services indexed by service_id
    services: DashMap<String, ServiceHandle>,

    /// Broadcast channel for shutdown signal
    shutdown_tx: broadcast::Sender<()>,

    /// Upper bound on `shutdown_all`
    shutdown_timeout: Duration,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            services: DashMap::new(),
            shutdown_tx,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Spawn `service` onto its own task. Service ids are unique.
    pub async fn spawn<S: Service>(&self, service: S) -> ServiceResult<ServiceHandle> {
        let spec = service.spec();
        let service_id = spec.id.clone();

        if self.services.contains_key(&service_id) {
            return Err(ServiceError::AlreadyRunning(service_id));
        }

        let state = StateCell::new(ServiceState::Starting);
        let handle = ServiceHandle::new(service_id.clone(), state.clone());
        let ctx = ServiceContext::new(service_id.clone());
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(run_service_loop(
            service,
            ctx,
            shutdown_rx,
            state,
            spec.tick_interval,
            spec.shutdown_timeout,
        ));

        self.services.insert(service_id, handle.clone());
        Ok(handle)
    }

    /// Signal every service to stop and wait until all have stopped
    pub async fn shutdown_all(&self) -> ServiceResult<()> {
        tracing::info!(services = self.services.len(), "Initiating shutdown of all services");

        let _ = self.shutdown_tx.send(());

        let result = tokio::time::timeout(self.shutdown_timeout, async {
            while !self.services.is_empty() {
                self.services.retain(|_, handle| !handle.is_terminal());
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        if result.is_err() {
            tracing::warn!("Some services did not stop within timeout");
            return Err(ServiceError::ShutdownTimeout);
        }

        Ok(())
    }
}

async fn run_tick<S: Service>(service: &mut S, ctx: &mut ServiceContext) {
    if let Err(e) = service.on_tick(ctx).await {
        tracing::warn!(
            service_id = %ctx.service_id,
            tick = ctx.ticks,
            error = %e,
            "Error during tick"
        );
    }
    ctx.ticks += 1;
}

async fn run_service_loop<S: Service>(
    mut service: S,
    mut ctx: ServiceContext,
    mut shutdown_rx: broadcast::Receiver<()>,
    state: StateCell,
    tick_interval: Option<Duration>,
    shutdown_timeout: Duration,
) {
    if let Err(e) = service.on_start(&ctx).await {
        tracing::error!(
            service_id = %ctx.service_id,
            error = %e,
            "Service failed to start"
        );
        state.set(ServiceState::Failed);
        return;
    }

    state.set(ServiceState::Running);
    tracing::info!(service_id = %ctx.service_id, "Service started");

    // The first tick completes immediately; a late tick shifts the schedule
    // instead of bursting to catch up.
    let mut tick_timer = tick_interval.map(|period| {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!(service_id = %ctx.service_id, "Received shutdown signal");
                break;
            }

            _ = async {
                if let Some(ref mut timer) = tick_timer {
                    timer.tick().await
                } else {
                    std::future::pending::<tokio::time::Instant>().await
                }
            } => {
                run_tick(&mut service, &mut ctx).await;
            }
        }
    }

    state.set(ServiceState::Stopping);

    match tokio::time::timeout(shutdown_timeout, service.on_stop(&ctx)).await {
        Ok(Ok(())) => {
            state.set(ServiceState::Stopped);
            tracing::info!(service_id = %ctx.service_id, ticks = ctx.ticks, "Service stopped");
        }
        Ok(Err(e)) => {
            state.set(ServiceState::Failed);
            tracing::error!(service_id = %ctx.service_id, error = %e, "Service stop failed");
        }
        Err(_) => {
            state.set(ServiceState::Failed);
            tracing::error!(service_id = %ctx.service_id, "Service stop timed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        start: AtomicUsize,
        stop: AtomicUsize,
        tick: AtomicUsize,
    }

    struct CountingService {
        id: String,
        tick_interval: Option<Duration>,
        fail_ticks: bool,
        counters: Arc<Counters>,
    }

    impl CountingService {
        fn new(id: &str, tick_interval: Option<Duration>) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            (
                Self {
                    id: id.to_string(),
                    tick_interval,
                    fail_ticks: false,
                    counters: Arc::clone(&counters),
                },
                counters,
            )
        }

        fn failing(mut self) -> Self {
            self.fail_ticks = true;
            self
        }
    }

    #[async_trait::async_trait]
    impl Service for CountingService {
        fn spec(&self) -> ServiceSpec {
            let spec = ServiceSpec::new(&self.id, "Counting Service");
            match self.tick_interval {
                Some(interval) => spec.with_tick_interval(interval),
                None => spec,
            }
        }

        async fn on_start(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
            self.counters.start.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_stop(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
            self.counters.stop.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_tick(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
            self.counters.tick.fetch_add(1, Ordering::SeqCst);
            if self.fail_ticks {
                return Err(ServiceError::TickFailed("upstream unavailable".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let manager = ServiceManager::new();
        let (service, counters) = CountingService::new("test-service", None);

        let handle = manager.spawn(service).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counters.start.load(Ordering::SeqCst), 1);
        assert!(handle.is_running());
        assert_eq!(counters.tick.load(Ordering::SeqCst), 0);

        manager.shutdown_all().await.unwrap();

        assert_eq!(counters.stop.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn test_first_tick_fires_immediately() {
        let manager = ServiceManager::new();
        let (service, counters) =
            CountingService::new("kickoff", Some(Duration::from_secs(3600)));

        manager.spawn(service).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(counters.tick.load(Ordering::SeqCst), 1);

        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_ticks_repeat_on_interval() {
        let manager = ServiceManager::new();
        let (service, counters) =
            CountingService::new("ticker", Some(Duration::from_millis(20)));

        manager.spawn(service).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(counters.tick.load(Ordering::SeqCst) >= 3);

        manager.shutdown_all().await.unwrap();
        assert_eq!(counters.stop.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_tick_keeps_service_running() {
        let manager = ServiceManager::new();
        let (service, counters) =
            CountingService::new("flaky", Some(Duration::from_millis(20)));

        let handle = manager.spawn(service.failing()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(counters.tick.load(Ordering::SeqCst) >= 3);
        assert!(handle.is_running());

        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_service_id_rejected() {
        let manager = ServiceManager::new();
        let (first, _) = CountingService::new("pipeline", None);
        let (second, second_counters) = CountingService::new("pipeline", None);

        manager.spawn(first).await.unwrap();
        let result = manager.spawn(second).await;
        assert!(matches!(result, Err(ServiceError::AlreadyRunning(id)) if id == "pipeline"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(second_counters.start.load(Ordering::SeqCst), 0);

        manager.shutdown_all().await.unwrap();
    }
}
