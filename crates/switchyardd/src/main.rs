//! switchyardd — the Switchyard daemon.
//!
//! Single binary that assembles the blue/green control plane:
//! - State store (redb)
//! - Traffic router (in-memory weighted rule sets)
//! - Health monitor + alarm evaluation
//! - Deployment controller + group manager
//! - REST API
//!
//! # Usage
//!
//! ```text
//! switchyardd standalone --port 8443 --data-dir /var/lib/switchyard
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use switchyard_router::{MemoryRouter, TrafficRouter};

#[derive(Parser)]
#[command(name = "switchyardd", about = "Switchyard daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run in standalone mode (single-node, all subsystems in one process).
    Standalone {
        /// Port to listen on.
        #[arg(long, default_value = "8443")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/switchyard")]
        data_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,switchyardd=debug,switchyard=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone { port, data_dir } => run_standalone(port, data_dir).await,
    }
}

async fn run_standalone(port: u16, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("Switchyard daemon starting in standalone mode");

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("switchyard.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let state = switchyard_state::StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let router = Arc::new(MemoryRouter::new()) as Arc<dyn TrafficRouter>;
    info!("traffic router initialized");

    let monitor = switchyard_health::HealthMonitor::new();
    info!("health monitor initialized");

    let api_state = switchyard_api::ApiState::new(state, router, monitor);

    // Re-register listener rules and alarms for persisted groups, then
    // roll back any deployment interrupted by the previous shutdown.
    for group in api_state.store.list_groups()? {
        api_state.manager.reconcile(&group.spec)?;
    }
    let recovered = api_state.controller.recover()?;
    info!(recovered, "recovery pass complete");

    // ── Start API server ───────────────────────────────────────

    let router = switchyard_api::build_router(api_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install CTRL+C handler");
        }
        info!("shutdown signal received");
    });

    server.await?;

    info!("Switchyard daemon stopped");
    Ok(())
}
