use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gantry::config::{DatabaseConfig, GatewayConfig, JobConfigFile, WorkerConfig};
use gantry::gateway::{self, GatewayService};
use gantry::provider;
use gantry::shutdown::install_shutdown_handler;
use gantry::store::{SqliteStore, StateStore};
use gantry::worker::{self, WorkerService};

#[derive(Parser, Debug)]
#[command(name = "gantry")]
#[command(about = "A multi-tenant batch-job orchestrator")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the gateway: authentication, classification, and routing
    Gateway,
    /// Start a worker: job ownership, provider submission, and polling
    Worker,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Command::Gateway => run_gateway().await,
        Command::Worker => run_worker().await,
    }
}

fn sqlite_url(db: &DatabaseConfig) -> String {
    format!("sqlite://{}", db.database)
}

async fn run_gateway() -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting gateway");

    let config = GatewayConfig::from_env()?;

    let store: Arc<dyn StateStore> =
        Arc::new(SqliteStore::connect(&sqlite_url(&config.database)).await?);
    tracing::info!(database = %config.database.database, "Connected to database");

    tracing::info!(workers = ?config.worker_ips, "Initialized consistent hashing router");
    let service = Arc::new(GatewayService::new(
        store,
        config.worker_ips.clone(),
        config.worker_port,
    )?);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.server_port).parse()?;
    let shutdown = install_shutdown_handler("gateway");

    gateway::serve(service, &config.allowed_origins, addr, shutdown).await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn run_worker() -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Starting worker");

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        provider = %config.batch_provider.provider,
        region = %config.batch_provider.region,
        "Loaded configuration"
    );

    let store: Arc<dyn StateStore> =
        Arc::new(SqliteStore::connect(&sqlite_url(&config.database)).await?);
    tracing::info!(database = %config.database.database, "Connected to database");

    provider::register_builtin();
    let batch_provider = provider::create(&config.batch_provider)?;
    tracing::info!(provider = %config.batch_provider.provider, "Initialized batch provider");

    let job_config = match JobConfigFile::load(&config.job_config_path) {
        Ok(loaded) => {
            tracing::info!(path = %config.job_config_path, "Loaded job config");
            loaded
        }
        Err(e) => {
            tracing::warn!(path = %config.job_config_path, error = %e, "Falling back to built-in resource presets");
            JobConfigFile::default()
        }
    };

    let service = Arc::new(WorkerService::new(
        store,
        batch_provider,
        job_config,
        config.worker_id.clone(),
        config.lease_ttl,
        config.claim_interval,
    ));
    tracing::info!(
        worker_id = %config.worker_id,
        lease_ttl = ?config.lease_ttl,
        claim_interval = ?config.claim_interval,
        "Worker identity"
    );

    let shutdown = install_shutdown_handler("worker");

    // Re-attach ownership of jobs from before a restart.
    if let Err(e) = service.reconcile_active_job_leases(true).await {
        tracing::warn!(error = %e, "Failed to resume job pollers on startup");
    }
    service.clone().start_lease_reconciler(shutdown.clone());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.server_port).parse()?;
    worker::serve(service, addr, shutdown).await?;

    tracing::info!("Worker stopped");
    Ok(())
}
