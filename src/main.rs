use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use windowgate::config::WindowgateConfig;
use windowgate::http::HttpServer;
use windowgate::ratelimit::{spawn_sweeper, RateAccountingEngine};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Per-client fixed-window rate limiting in front of an HTTP service.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Requests allowed per client per window
    #[arg(long)]
    limit: Option<u64>,

    /// Window length in seconds
    #[arg(long)]
    window_secs: Option<u64>,

    /// Tracked clients above which all new traffic is refused
    #[arg(long)]
    max_clients: Option<usize>,

    /// Disable the background sweep of expired clients
    #[arg(long)]
    no_sweep: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!("Starting Windowgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = WindowgateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    let rate_limiting = &mut config.rate_limiting;
    if let Some(limit) = args.limit {
        rate_limiting.limit = limit;
    }
    if let Some(window_secs) = args.window_secs {
        rate_limiting.window_secs = window_secs;
    }
    if let Some(max_clients) = args.max_clients {
        rate_limiting.max_clients = Some(max_clients);
    }
    if args.no_sweep {
        rate_limiting.sweep_enabled = false;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        limit = config.rate_limiting.limit,
        window_secs = config.rate_limiting.window_secs,
        "Configuration loaded"
    );

    let engine = Arc::new(RateAccountingEngine::new(
        config.rate_limiting.engine_config()?,
    )?);
    let sweeper = spawn_sweeper(&engine);
    info!("Rate accounting engine initialized");

    let server = HttpServer::new(
        config.server.listen_addr,
        engine.clone(),
        config.rate_limiting.gate_options(),
    );
    server.serve_with_shutdown(shutdown_signal()).await?;

    engine.shutdown();
    if let Some(sweeper) = sweeper {
        sweeper.await?;
    }

    info!("Windowgate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
