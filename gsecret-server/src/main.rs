use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;

use gsecret_api::{build_interface, build_router, Metrics};
use gsecret_core::config::{LoadedConfig, RootConfig};

#[derive(Parser, Debug)]
#[command(name = "gsecret", version, about = "gsecret — pluggable secret broker")]
struct Cli {
    /// Path to the chain configuration file
    #[arg(short, long, default_value = "/etc/gsecret/gsecret.yaml")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Address the HTTP server listens on
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Reject every write request before it reaches a chain, regardless of
    /// whether the chain has a write stage configured.
    #[arg(long)]
    write_blocked: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "gsecret starting");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!(path = %cli.config.display(), "loading chain configuration");
    let root = RootConfig::from_yaml_file(&cli.config)?;
    let loaded = LoadedConfig::new(root);

    let metrics = Arc::new(Metrics::new()?);
    let interface = build_interface(Arc::clone(&metrics))?;

    let gsecret_router = build_router(
        &interface,
        loaded.chains("gsecret"),
        cli.write_blocked,
        Arc::clone(&metrics),
    )?;

    let app = Router::new()
        .nest("/gsecret", gsecret_router)
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
        .layer(TraceLayer::new_for_http());

    info!(
        addr = %cli.bind,
        write_blocked = cli.write_blocked,
        chains = loaded.chains("gsecret").len(),
        "gsecret is ready — serving traffic"
    );

    let listener = tokio::net::TcpListener::bind(cli.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("gsecret stopped");
    Ok(())
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> String {
    metrics.gather_text()
}

/// Waits for SIGTERM (container stop) or SIGINT (Ctrl+C), whichever comes
/// first, so in-flight requests get to drain under axum's graceful shutdown
/// instead of the process dying mid-response.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining in-flight requests");
}
