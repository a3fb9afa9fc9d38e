use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use gdc_core::store::Store;
use gdc_events::{BrokerForwarder, EventBus, HttpBroker, MessageChannel};
use gdc_pipeline::{
    ContextLoader, FilesetFinalizer, GatewayConfig, HttpRegistryGateway, MessageRuntime, PipelineConfig,
    SagaOrchestrator, ValidationService,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default pool size when `DATABASE_MAX_CONNECTIONS` is unset.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gdc_worker=debug,gdc_pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    let gateway_config = GatewayConfig::from_env().context("Invalid registry configuration")?;
    tracing::info!(
        saga_workers = config.saga_workers,
        retry_attempts = config.retry.max_attempts,
        "Loaded pipeline configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("DATABASE_MAX_CONNECTIONS has invalid value '{raw}'"))?,
        Err(_) => DEFAULT_MAX_CONNECTIONS,
    };

    let pool = gdc_db::create_pool(&database_url, max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!(max_connections, "Database connection pool created");

    gdc_db::health_check(&pool).await.context("Database health check failed")?;
    gdc_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    let store: Arc<dyn Store> = Arc::new(gdc_db::PgStore::new(pool));

    // --- Messaging ---
    let cancel = CancellationToken::new();
    let bus = Arc::new(EventBus::default());
    let forwarder_handle = match std::env::var("BROKER_URL").ok().filter(|u| !u.trim().is_empty()) {
        Some(url) => {
            let broker = HttpBroker::new(url, gdc_events::broker::DEFAULT_TIMEOUT)
                .context("Failed to build broker client")?;
            Some(tokio::spawn(BrokerForwarder::run(broker, bus.subscribe(), cancel.clone())))
        }
        None => {
            tracing::info!("BROKER_URL not set, saga traffic stays in-process");
            None
        }
    };
    let channel: Arc<dyn MessageChannel> = bus.clone();

    // --- Services ---
    let gateway = Arc::new(HttpRegistryGateway::new(gateway_config).context("Failed to build registry client")?);
    let finalizer = Arc::new(FilesetFinalizer::new(Arc::clone(&store)));
    let orchestrator = Arc::new(SagaOrchestrator::new(
        Arc::clone(&store),
        Arc::clone(&channel),
        config.retry.clone(),
        Arc::clone(&finalizer),
    ));
    let loader = ContextLoader::new(gateway, Arc::clone(&store), config.retry.clone(), config.code_table_ttl);
    let validation = Arc::new(ValidationService::new(
        Arc::clone(&store),
        loader,
        Arc::clone(&channel),
        config.retry.clone(),
    ));
    let runtime = MessageRuntime::new(Arc::clone(&orchestrator), validation);

    // --- Background tasks ---
    let runtime_handle = {
        let receiver = bus.subscribe();
        let cancel = cancel.clone();
        tokio::spawn(async move { runtime.run(receiver, cancel).await })
    };
    let completion_handle = {
        let finalizer = Arc::clone(&finalizer);
        let interval = config.completion_check_interval;
        let cancel = cancel.clone();
        tokio::spawn(async move { finalizer.run(interval, cancel).await })
    };
    let purge_handle = tokio::spawn(gdc_pipeline::purge::run(
        Arc::clone(&store),
        config.stale_fileset_ttl,
        config.purge_interval,
        cancel.clone(),
    ));
    let sweeper_handle = tokio::spawn(gdc_pipeline::sweeper::run(
        Arc::clone(&orchestrator),
        config.clone(),
        cancel.clone(),
    ));
    tracing::info!("Worker started (message runtime, completion monitor, purge, saga sweeper)");

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    for (name, handle) in [
        ("message runtime", runtime_handle),
        ("completion monitor", completion_handle),
        ("purge", purge_handle),
        ("saga sweeper", sweeper_handle),
    ] {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            tracing::warn!(task = name, "Background task did not stop in time");
        }
    }
    if let Some(handle) = forwarder_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
