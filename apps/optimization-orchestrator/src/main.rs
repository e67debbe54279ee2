//! Optimization Orchestrator Binary
//!
//! Starts the optimization orchestrator HTTP service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin optimization-orchestrator
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `OPT_HTTP_PORT`: API server port (default: 8080)
//! - `OPT_METRICS_PORT`: Prometheus exporter port, 0 disables (default: 9090)
//! - `OPT_SHARED_SECRET`: secret required on internal endpoints
//! - `OPT_PARAM_SPACE_MAX`: largest allowed parameter space estimate (default: 500)
//! - `OPT_CONCURRENCY_LIMIT_MAX`: upper bound on per-job concurrency (default: 16)
//! - `OPT_TOP_N_LIMIT`: leaderboard size kept per job (default: 5)
//! - `OPT_MAX_RETRIES`: retry attempts for retryable task failures (default: 5)
//! - `OPT_RETRY_BASE_SECONDS`: base delay of the retry backoff (default: 2)
//! - `OPT_TASK_CAP`: hard cap on tasks materialized per job (default: 1000)
//! - `OPT_STATUS_RATE_LIMIT`: status requests per owner per minute (default: 90)
//! - `OPTIMIZATION_ORCHESTRATOR_URL`: delegate lifecycle calls to this remote
//!   orchestrator instead of the in-memory engine
//! - `OPTIMIZATION_ORCHESTRATOR_SECRET`: secret presented to the remote
//!   orchestrator (required with the URL)
//! - `RUST_LOG`: log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use optimization_orchestrator::config::OrchestratorConfig;
use optimization_orchestrator::observability::{MetricsConfig, init_metrics};
use optimization_orchestrator::orchestrator::{
    InMemoryOrchestrator, InMemoryVersionDirectory, RemoteOrchestratorClient, VersionDirectory,
};
use optimization_orchestrator::server::{AppState, create_internal_router, create_public_router};
use optimization_orchestrator::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry();

    tracing::info!("starting optimization orchestrator");

    let config = OrchestratorConfig::from_env()?;
    log_config(&config);

    start_metrics_exporter(&config)?;

    let app = create_app(&config)?;
    serve(&config, app).await?;

    tracing::info!("optimization orchestrator stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &OrchestratorConfig) {
    tracing::info!(
        http_port = config.server.http_port,
        metrics_port = config.server.metrics_port,
        param_space_max = config.scheduler.param_space_max,
        concurrency_limit_max = config.scheduler.concurrency_limit_max,
        task_cap = config.scheduler.task_cap,
        status_rate_limit = config.server.status_rate_limit,
        internal_auth = config.shared_secret.is_some(),
        remote_backend = config.remote.is_configured(),
        "configuration loaded"
    );
}

/// Install the Prometheus exporter unless the metrics port is 0.
fn start_metrics_exporter(config: &OrchestratorConfig) -> anyhow::Result<()> {
    if config.server.metrics_port == 0 {
        tracing::info!("metrics exporter disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.metrics_port));
    init_metrics(&MetricsConfig::with_addr(addr))?;
    Ok(())
}

/// Assemble the router around the configured lifecycle backend.
///
/// With a remote orchestrator configured only the public API is mounted;
/// the remote side owns the internal delegation surface. The in-memory
/// engine serves both.
fn create_app(config: &OrchestratorConfig) -> anyhow::Result<Router> {
    let versions: Arc<dyn VersionDirectory> = Arc::new(InMemoryVersionDirectory::permissive());

    if let (Some(base_url), Some(secret)) = (&config.remote.base_url, &config.remote.secret) {
        let client = RemoteOrchestratorClient::new(base_url.clone(), secret.clone())?;
        tracing::info!(orchestrator = %base_url, "lifecycle backend: remote delegation");

        let state = AppState::new(Arc::new(client), versions, config);
        return Ok(create_public_router(state));
    }

    tracing::info!("lifecycle backend: in-memory engine");
    let engine = Arc::new(InMemoryOrchestrator::new(config.scheduler.clone()));
    let state = AppState::new(engine, versions, config);
    Ok(create_public_router(state.clone()).merge(create_internal_router(state)))
}

/// Serve the router until a shutdown signal arrives.
async fn serve(config: &OrchestratorConfig, app: Router) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.http_port));

    tracing::info!(%addr, "http server starting");
    tracing::info!("endpoints:");
    tracing::info!("  GET  /health");
    tracing::info!("  POST /api/v1/optimizations");
    tracing::info!("  GET  /api/v1/optimizations/history");
    tracing::info!("  GET  /api/v1/optimizations/{{id}}/status");
    tracing::info!("  POST /api/v1/optimizations/{{id}}/cancel");
    tracing::info!("  POST /api/v1/optimizations/{{id}}/rerun");
    tracing::info!("  POST /api/v1/optimizations/{{id}}/export");
    if !config.remote.is_configured() {
        tracing::info!("  GET  /internal/health");
        tracing::info!("  POST /internal/optimizations");
    }

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Wait for SIGTERM or Ctrl+C.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; a process that cannot
/// respond to termination signals should fail at startup instead.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received ctrl+c, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
    }
}
