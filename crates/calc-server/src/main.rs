mod config;
mod http;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use calc_core::agent::{AgentPool, LatencyTable, LocalExecutor};
use calc_core::dispatcher::Dispatcher;
use calc_db::pool;

use config::ServerConfig;

#[derive(Parser)]
#[command(
    name = "calc-server",
    about = "Asynchronous arithmetic calculation orchestrator"
)]
struct Cli {
    /// Database URL (overrides CALC_DATABASE_URL env var)
    #[arg(long)]
    database_url: Option<String>,

    /// Bind port (overrides CALC_BIND_PORT env var)
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::resolve(cli.database_url.as_deref(), cli.port)?;

    pool::ensure_database_exists(&config.db_config).await?;
    let db_pool = pool::create_pool(&config.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    let latency = LatencyTable {
        add: config.latency.addition,
        sub: config.latency.subtraction,
        mul: config.latency.multiplication,
        div: config.latency.division,
    };
    let agents = Arc::new(AgentPool::new(
        db_pool.clone(),
        Arc::new(LocalExecutor::new(latency)),
    ));
    agents.start(config.computing_power).await;

    let cancel = CancellationToken::new();
    let dispatcher = Arc::new(Dispatcher::new(
        db_pool.clone(),
        agents.clone(),
        config.computing_power,
    ));
    let dispatcher_handle = dispatcher.spawn(cancel.clone());

    install_shutdown_handler(cancel.clone());

    let app = http::build_router(db_pool.clone());
    let addr: SocketAddr = format!("{}:{}", config.bind_host, config.bind_port)
        .parse()
        .context("invalid bind address")?;
    tracing::info!(%addr, "calc-server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown_signal = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
        .await?;

    cancel.cancel();
    let _ = tokio::time::timeout(config.graceful_shutdown_timeout, dispatcher_handle).await;
    agents.stop().await;
    db_pool.close().await;

    tracing::info!("calc-server shut down");
    Ok(())
}

/// First Ctrl+C triggers graceful shutdown; a second forces immediate exit.
fn install_shutdown_handler(cancel: CancellationToken) {
    let got_first_signal = Arc::new(AtomicBool::new(false));
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_signal.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            cancel.cancel();
        }
    });
}
