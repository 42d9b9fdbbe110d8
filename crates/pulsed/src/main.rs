//! pulsed — the PulseGrid daemon.
//!
//! One binary, four roles:
//! - `collector`: scrape loops + query API on one port
//! - `dashboard`: the visualization process on its own port and store
//! - `standalone`: both in one process (two listeners)
//! - `exporter`: a minimal instrumented process serving `/metrics/`
//!
//! Plus `init` (scaffold config files) and `topology check`.
//!
//! # Usage
//!
//! ```text
//! pulsed collector --config pulse.toml --port 9464 --data-dir /var/lib/pulsegrid
//! pulsed dashboard --port 3000 --data-dir /var/lib/pulsegrid
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use pulse_core::{PulseConfig, TopologyConfig};
use pulsegrid_exposition::MetricsRegistry;
use pulsegrid_scrape::Scraper;
use pulsegrid_store::MetricStore;

#[derive(Parser)]
#[command(name = "pulsed", about = "PulseGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the collector: scrape loops plus the query API.
    Collector {
        /// Scrape configuration file.
        #[arg(long, default_value = "pulse.toml")]
        config: PathBuf,

        /// Port for the query API and own-metrics exposition.
        #[arg(long, default_value = "9464")]
        port: u16,

        /// Data directory for the sample store.
        #[arg(long, default_value = "/var/lib/pulsegrid")]
        data_dir: PathBuf,

        /// Sample retention in hours.
        #[arg(long, default_value = "360")]
        retention_hours: u64,
    },

    /// Run the visualization process.
    Dashboard {
        /// Port for the dashboard UI.
        #[arg(long, default_value = "3000")]
        port: u16,

        /// Data directory; dashboards, data sources, and users persist here.
        #[arg(long, default_value = "/var/lib/pulsegrid")]
        data_dir: PathBuf,
    },

    /// Run collector and dashboard in one process (two listeners).
    Standalone {
        #[arg(long, default_value = "pulse.toml")]
        config: PathBuf,

        #[arg(long, default_value = "9464")]
        api_port: u16,

        #[arg(long, default_value = "3000")]
        dashboard_port: u16,

        #[arg(long, default_value = "/var/lib/pulsegrid")]
        data_dir: PathBuf,

        #[arg(long, default_value = "360")]
        retention_hours: u64,
    },

    /// Run a minimal instrumented process exposing `/metrics/`.
    Exporter {
        #[arg(long, default_value = "9100")]
        port: u16,
    },

    /// Scaffold pulse.toml and topology.toml.
    Init {
        #[arg(long, default_value = "pulse.toml")]
        config: PathBuf,

        #[arg(long, default_value = "topology.toml")]
        topology: PathBuf,
    },

    /// Topology file operations.
    Topology {
        #[command(subcommand)]
        command: TopologyCommand,
    },
}

#[derive(Subcommand)]
enum TopologyCommand {
    /// Validate a topology file and print the resolved plan.
    Check {
        #[arg(long, default_value = "topology.toml")]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pulsed=debug,pulsegrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Collector {
            config,
            port,
            data_dir,
            retention_hours,
        } => run_collector(&config, port, &data_dir, retention_hours).await,
        Command::Dashboard { port, data_dir } => run_dashboard(port, &data_dir).await,
        Command::Standalone {
            config,
            api_port,
            dashboard_port,
            data_dir,
            retention_hours,
        } => run_standalone(&config, api_port, dashboard_port, &data_dir, retention_hours).await,
        Command::Exporter { port } => run_exporter(port).await,
        Command::Init { config, topology } => run_init(&config, &topology),
        Command::Topology {
            command: TopologyCommand::Check { file },
        } => run_topology_check(&file),
    }
}

// ── Collector ───────────────────────────────────────────────────

async fn run_collector(
    config_path: &Path,
    port: u16,
    data_dir: &Path,
    retention_hours: u64,
) -> anyhow::Result<()> {
    info!("collector starting");

    std::fs::create_dir_all(data_dir)?;
    let store = MetricStore::open(&data_dir.join("pulse.redb"))?;
    info!(path = ?data_dir, "sample store opened");

    let config = PulseConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(
        jobs = config.scrape_jobs.len(),
        "scrape configuration loaded"
    );

    let registry = Arc::new(MetricsRegistry::new());
    registry.register_process_metrics();

    let scraper = Scraper::new(store.clone(), registry.clone());
    scraper.apply_config(&config).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention_handle = tokio::spawn(run_retention(
        store.clone(),
        Duration::from_secs(retention_hours * 3600),
        shutdown_rx.clone(),
    ));

    let router = pulsegrid_api::build_router(store, registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "collector API starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    scraper.stop_all().await;
    let _ = retention_handle.await;
    info!("collector stopped");
    Ok(())
}

/// Hourly retention sweep until shutdown.
async fn run_retention(
    store: MetricStore,
    retention: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(3600)) => {
                let cutoff = epoch_ms().saturating_sub(retention.as_millis() as u64);
                match store.prune_samples_before(cutoff) {
                    Ok(0) => {}
                    Ok(count) => info!(count, "retention sweep pruned samples"),
                    Err(e) => warn!(error = %e, "retention sweep failed"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

// ── Dashboard ───────────────────────────────────────────────────

async fn run_dashboard(port: u16, data_dir: &Path) -> anyhow::Result<()> {
    info!("dashboard starting");

    std::fs::create_dir_all(data_dir)?;
    let store = MetricStore::open(&data_dir.join("dashboard.redb"))?;
    store.ensure_default_admin(epoch_ms())?;

    let state = pulsegrid_dashboard::DashboardState::new(store);
    let router = pulsegrid_dashboard::dashboard_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "dashboard starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    info!("dashboard stopped");
    Ok(())
}

// ── Standalone ──────────────────────────────────────────────────

async fn run_standalone(
    config_path: &Path,
    api_port: u16,
    dashboard_port: u16,
    data_dir: &Path,
    retention_hours: u64,
) -> anyhow::Result<()> {
    info!("standalone mode starting");

    std::fs::create_dir_all(data_dir)?;
    let store = MetricStore::open(&data_dir.join("pulsegrid.redb"))?;
    store.ensure_default_admin(epoch_ms())?;

    let config = PulseConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let registry = Arc::new(MetricsRegistry::new());
    registry.register_process_metrics();

    let scraper = Scraper::new(store.clone(), registry.clone());
    scraper.apply_config(&config).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention_handle = tokio::spawn(run_retention(
        store.clone(),
        Duration::from_secs(retention_hours * 3600),
        shutdown_rx.clone(),
    ));

    let api_router = pulsegrid_api::build_router(store.clone(), registry);
    let dashboard_router =
        pulsegrid_dashboard::dashboard_router(pulsegrid_dashboard::DashboardState::new(store));

    let api_addr = SocketAddr::from(([0, 0, 0, 0], api_port));
    let dashboard_addr = SocketAddr::from(([0, 0, 0, 0], dashboard_port));
    info!(%api_addr, %dashboard_addr, "standalone listeners starting");

    let api_listener = tokio::net::TcpListener::bind(api_addr).await?;
    let dashboard_listener = tokio::net::TcpListener::bind(dashboard_addr).await?;

    tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let api_server = axum::serve(api_listener, api_router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));
    let dashboard_server = axum::serve(dashboard_listener, dashboard_router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));

    tokio::try_join!(
        async { api_server.await },
        async { dashboard_server.await }
    )?;

    scraper.stop_all().await;
    let _ = retention_handle.await;
    info!("standalone mode stopped");
    Ok(())
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.changed().await;
}

// ── Exporter ────────────────────────────────────────────────────

#[derive(Clone)]
struct ExporterState {
    registry: Arc<MetricsRegistry>,
    started: Instant,
}

/// GET /metrics/ — process self-metrics in the text exposition format.
/// Reading never mutates anything beyond the point-in-time refresh.
async fn exporter_metrics(State(state): State<ExporterState>) -> impl IntoResponse {
    state.registry.refresh_process_metrics();
    state.registry.set_gauge(
        "process_uptime_seconds",
        &[],
        state.started.elapsed().as_secs_f64(),
    );
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.registry.render(),
    )
}

fn exporter_router() -> Router {
    let registry = Arc::new(MetricsRegistry::new());
    registry.register_process_metrics();
    registry.register_gauge(
        "process_uptime_seconds",
        "Seconds since the exporter started.",
    );
    let state = ExporterState {
        registry,
        started: Instant::now(),
    };
    // Trailing slash is part of the route; scrape configs must match it.
    Router::new()
        .route("/metrics/", get(exporter_metrics))
        .with_state(state)
}

async fn run_exporter(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "exporter starting, route /metrics/");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, exporter_router())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
        })
        .await?;

    info!("exporter stopped");
    Ok(())
}

// ── Scaffolding and topology ────────────────────────────────────

fn run_init(config_path: &Path, topology_path: &Path) -> anyhow::Result<()> {
    anyhow::ensure!(
        !config_path.exists(),
        "{} already exists",
        config_path.display()
    );
    anyhow::ensure!(
        !topology_path.exists(),
        "{} already exists",
        topology_path.display()
    );

    std::fs::write(config_path, PulseConfig::scaffold().to_toml_string()?)?;
    std::fs::write(topology_path, TopologyConfig::scaffold().to_toml_string()?)?;
    info!(
        config = %config_path.display(),
        topology = %topology_path.display(),
        "scaffolded configuration files"
    );
    println!(
        "wrote {} and {}",
        config_path.display(),
        topology_path.display()
    );
    Ok(())
}

fn run_topology_check(file: &Path) -> anyhow::Result<()> {
    let topology = TopologyConfig::from_file(file)
        .with_context(|| format!("validating {}", file.display()))?;

    println!(
        "topology OK: {} process(es), {} network(s), {} volume(s)",
        topology.processes.len(),
        topology.networks.len(),
        topology.volumes.len()
    );
    for p in &topology.processes {
        let source = p
            .image
            .clone()
            .or_else(|| p.build.as_ref().map(|b| format!("build {b}")))
            .unwrap_or_default();
        println!(
            "  {:<16} {:<32} ports {:?} networks {:?} restart {:?} volumes {:?}",
            p.name, source, p.ports, p.networks, p.restart, p.volumes
        );
    }
    Ok(())
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
