use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use relay::broker::{self, BrokerPool};
use relay::config::{self, RelayConfig};
use relay::state::AppState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// WebSocket chat relay.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `server.bind`.
    #[arg(long)]
    bind: Option<String>,

    /// Broker URL (`memory://` or `redis://...`), overriding `broker.url`.
    #[arg(long)]
    broker_url: Option<String>,
}

fn main() -> ExitCode {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let cli = Cli::parse();
    let config = match resolve_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.server.workers {
        builder.worker_threads(workers);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "relay stopped");
            ExitCode::FAILURE
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<RelayConfig, config::ConfigError> {
    let mut config = match &cli.config {
        Some(path) => config::load_config_from_path(path)?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = &cli.bind {
        config.server.bind = config::parse_bind(bind)?;
    }
    if let Some(url) = &cli.broker_url {
        config.broker.url.clone_from(url);
    }
    Ok(config)
}

async fn run(config: RelayConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(url = %config.broker.url, "connecting to broker...");
    let broker = broker::connect(&config.broker.url).await?;
    let pool = BrokerPool::new(broker, config.broker.pool_size);
    let bind = config.server.bind;
    info!(
        topic = %config.broker.topic,
        pool_size = config.broker.pool_size,
        "broker ready"
    );

    let state = AppState::new(pool, config);
    let router = relay::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %bind, "relay listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown: Ctrl-C received");
            state.begin_shutdown();
        })
        .await?;

    // Upgraded sockets live outside axum's connection tracking; give their
    // sessions a moment to publish leave announcements.
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!("relay stopped");
    Ok(())
}
