use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediagrab_core::{
    load_config, redact_proxy_url, validate_config, CommandRunner, FileRetentionManager,
    InMemoryJobRegistry, JobOrchestrator, JobRegistry, TokioCommandRunner,
};
use mediagrab_server::{create_router, AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::var("MEDIAGRAB_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        "mediagrab v{} starting (config {})",
        VERSION,
        &config_hash[..16]
    );
    info!("Output directory: {:?}", config.storage.output_dir);
    info!(
        "Max active jobs: {}, proxies: [{}]",
        config.admission.max_active_jobs,
        config
            .proxies
            .iter()
            .map(|p| redact_proxy_url(p))
            .collect::<Vec<_>>()
            .join(", ")
    );

    tokio::fs::create_dir_all(&config.storage.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory {:?}",
                config.storage.output_dir
            )
        })?;

    let registry: Arc<dyn JobRegistry> = Arc::new(InMemoryJobRegistry::new());
    let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner::new());
    let orchestrator = Arc::new(
        JobOrchestrator::new(&config, Arc::clone(&registry), runner)
            .context("Failed to create job orchestrator")?,
    );

    let retention = Arc::new(FileRetentionManager::from_config(
        &config.storage,
        Arc::clone(&registry),
    ));
    let retention_task = retention.start();

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, Arc::clone(&orchestrator)));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Shutting down");
    retention.stop();
    if let Some(task) = retention_task {
        if let Err(e) = task.await {
            warn!("Retention task ended abnormally: {}", e);
        }
    }
    orchestrator.drain().await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
    info!("Shutdown signal received");
}
