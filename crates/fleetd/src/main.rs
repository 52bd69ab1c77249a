//! fleetd — the fleet control plane daemon.
//!
//! Single binary that assembles the fleet subsystems:
//! - State store (redb)
//! - Cluster tool invoker (kubectl / helm subprocesses)
//! - Control plane workflows
//! - Reachability sweep
//! - REST API
//!
//! # Usage
//!
//! ```text
//! fleetd serve --config /etc/fleet/fleetd.toml --port 18080
//! fleetd bootstrap-admin --name root --group operators
//! ```

mod config;
mod sweep;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use fleet_cluster::ControlPlane;
use fleet_state::{GROUP_ID_PREFIX, Group, StateStore, USER_ID_PREFIX, User, generate_id};
use fleet_tools::CommandTools;

use crate::config::FleetConfig;
use crate::sweep::ReachabilitySweep;

const DATABASE_FILE: &str = "fleet.redb";

#[derive(Parser)]
#[command(name = "fleetd", about = "Fleet control plane daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server and background tasks.
    Serve {
        /// Path to fleetd.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on (overrides the config file).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Create an administrator and print their token.
    BootstrapAdmin {
        /// User name of the administrator.
        #[arg(long)]
        name: String,

        /// Group to create (if needed) and add the administrator to.
        #[arg(long)]
        group: Option<String>,

        /// Path to fleetd.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state (overrides the config file).
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,fleetd=debug,fleet=debug"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_config(path: Option<PathBuf>, data_dir: Option<PathBuf>) -> anyhow::Result<FleetConfig> {
    let mut config = match path {
        Some(path) => FleetConfig::from_file(&path)?,
        None => FleetConfig::default(),
    };
    if let Some(data_dir) = data_dir {
        config.server.data_dir = data_dir;
    }
    Ok(config)
}

fn open_store(config: &FleetConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.server.data_dir)?;
    let db_path = config.server.data_dir.join(DATABASE_FILE);
    let store = StateStore::open(&db_path)?.with_reachability_ttl(config.reachability_ttl());
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Command::Serve {
            config,
            port,
            data_dir,
        } => {
            let mut config = load_config(config, data_dir)?;
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        }
        Command::BootstrapAdmin {
            name,
            group,
            config,
            data_dir,
        } => {
            let config = load_config(config, data_dir)?;
            bootstrap_admin(&config, &name, group.as_deref())
        }
    }
}

async fn serve(config: FleetConfig) -> anyhow::Result<()> {
    info!("fleet daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let store = open_store(&config)?;

    let tools = CommandTools::new()
        .with_kubectl(config.tools.kubectl.clone())
        .with_helm(config.tools.helm.clone())
        .with_timeout(config.tool_timeout());
    info!(kubectl = ?config.tools.kubectl, helm = ?config.tools.helm, "cluster tools configured");

    let control = ControlPlane::new(store, Arc::new(tools))
        .with_timings(config.registration_timings())
        .with_chart_repository(config.repair.chart_repository.clone());

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let sweep_handle = match config.sweep_interval() {
        Some(interval) => {
            let sweep = ReachabilitySweep::new(control.clone(), interval);
            let sweep_shutdown = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                sweep.run(sweep_shutdown).await;
            }))
        }
        None => {
            info!("reachability sweep disabled");
            None
        }
    };

    // ── Start API server ───────────────────────────────────────

    let router = fleet_api::build_router(control);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    if let Some(handle) = sweep_handle {
        let _ = handle.await;
    }

    info!("fleet daemon stopped");
    Ok(())
}

fn bootstrap_admin(config: &FleetConfig, name: &str, group: Option<&str>) -> anyhow::Result<()> {
    let store = open_store(config)?;

    let user = User {
        id: generate_id(USER_ID_PREFIX),
        name: name.to_string(),
        email: String::new(),
        token: uuid::Uuid::new_v4().simple().to_string(),
        admin: true,
    };
    store.put_user(&user)?;
    info!(user_id = %user.id, name = %user.name, "administrator created");

    if let Some(group_name) = group {
        let group = match store.find_group_by_name(group_name)? {
            Some(group) => group,
            None => {
                let group = Group {
                    id: generate_id(GROUP_ID_PREFIX),
                    name: group_name.to_string(),
                    email: String::new(),
                };
                store.put_group(&group)?;
                info!(group_id = %group.id, name = %group.name, "group created");
                group
            }
        };
        store.add_user_to_group(&user.id, &group.id)?;
    }

    println!("{}", user.token);
    Ok(())
}
