//! Bridge Relayer - cross-chain transfer relay service
//!
//! Observes bridge contracts on every configured chain, waits for finality of
//! each locked transfer and completes it on its destination chain.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use bridge_relayer::api;
use bridge_relayer::chain::ChainRegistry;
use bridge_relayer::config::Settings;
use bridge_relayer::metrics::{self, MetricsServer};
use bridge_relayer::registry::TransferRegistry;
use bridge_relayer::signer::AttestationSigner;
use bridge_relayer::store::{MemoryStore, PostgresStore, TransferStore};
use bridge_relayer::BridgeService;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Bridge Relayer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        instance_id = %settings.relayer.instance_id,
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    // Transfer store, chosen once for the lifetime of the process
    let store: Arc<dyn TransferStore> = match &settings.database {
        Some(database) => {
            let store = PostgresStore::connect(database).await?;
            info!("Database connection established");
            store.run_migrations().await?;
            info!("Database migrations complete");
            Arc::new(store)
        }
        None => {
            warn!("No database configured - transfers are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let registry = Arc::new(TransferRegistry::open(store).await?);

    // Chain connectors; chains without a usable bridge are skipped
    let chains = ChainRegistry::from_settings(&settings);
    if chains.is_empty() {
        anyhow::bail!("No chain could be initialized");
    }
    info!(chains = ?chains.chain_ids(), "Chain connections initialized");

    let signer = AttestationSigner::from_env(&settings.wallet);

    let service = Arc::new(BridgeService::new(
        chains,
        registry,
        signer,
        settings.relayer.clone(),
        settings.fees.clone(),
    ));
    service.start().await?;

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let service = service.clone();
        async move {
            if let Err(e) = api::run_server(config, service).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = settings.metrics.enabled.then(|| {
        let server = MetricsServer::new(settings.metrics.port);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        })
    });

    // Health check loop
    let health_handle = tokio::spawn({
        let service = service.clone();
        let interval = settings.relayer.health_check_interval_secs.max(1);
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let mut healthy = true;

                // Check chain connections
                for (chain_id, chain_healthy) in service.chains().health_check().await {
                    if !chain_healthy {
                        warn!("Chain {} health check failed", chain_id);
                        healthy = false;
                    }
                }

                // Check transfer store
                if let Err(e) = service.registry().health_check().await {
                    warn!("Transfer store health check failed: {}", e);
                    healthy = false;
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Bridge Relayer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Graceful shutdown: in-flight relays finish or time out
    service.shutdown().await;

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Bridge Relayer stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,bridge_relayer=debug,sqlx=warn,hyper=warn")
    });

    let json = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
