//! Airbridge
//!
//! Polls facility air quality telemetry and serves it as BACnet points.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use airbridge::bridge_runtime::ServiceManager;
use airbridge::{ApiClient, BridgeConfig, LocalGateway, Pipeline};

/// Air quality telemetry to BACnet bridge
#[derive(Parser, Debug)]
#[command(name = "airbridge")]
#[command(about = "Air quality telemetry to BACnet bridge", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "airbridge.toml")]
    config: PathBuf,

    /// Run a single polling cycle, print the flattened record and exit
    #[arg(long)]
    once: bool,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    log: Option<String>,
}

fn main() -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    let filter = match &args.log {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("airbridge=info,bridge_runtime=info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting airbridge v{}", env!("CARGO_PKG_VERSION"));

    let config = BridgeConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;

    let gateway = Arc::new(LocalGateway::new(config.local_device()));
    let client = ApiClient::new(&config.api)?;

    info!(
        "Local device {} ({}) at {}",
        config.device.object_name,
        gateway.device().identifier(),
        config.device.address
    );

    let mut pipeline = match Pipeline::bootstrap(client, Arc::clone(&gateway), &config).await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Failed to create points for {}: {}", config.api.facility_id, e);
            return Err(e.into());
        }
    };

    if args.once {
        let report = pipeline.run_cycle().await?;
        println!("{}", serde_json::to_string_pretty(&report.record.to_json())?);
        return Ok(());
    }

    let service_manager = ServiceManager::new_shared();
    match service_manager.spawn(pipeline).await {
        Ok(handle) => info!("Service started: {}", handle.service_id),
        Err(e) => {
            error!("Failed to start polling pipeline: {}", e);
            return Err(e.into());
        }
    }

    shutdown_signal(service_manager).await;

    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal and cleanup
async fn shutdown_signal(service_manager: Arc<ServiceManager>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }

    info!("Shutting down services...");
    if let Err(e) = service_manager.shutdown_all().await {
        warn!("Some services did not shut down cleanly: {}", e);
    }
}
