//! TreeDrive Server — hierarchical file storage engine.
//!
//! Main entry point: loads configuration, connects to PostgreSQL,
//! constructs the object store, and runs the background worker until
//! a shutdown signal arrives.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt};

use treedrive_core::config::AppConfig;
use treedrive_core::error::AppError;
use treedrive_database::DatabasePool;
use treedrive_database::repositories::bundle::BundleRepository;
use treedrive_database::repositories::job::JobRepository;
use treedrive_entity::job::model::CreateJob;
use treedrive_storage::ArchiveBuilder;
use treedrive_worker::executor::JobExecutor;
use treedrive_worker::jobs::{BundleExpiryHandler, BundleHandler};
use treedrive_worker::queue::JobQueue;
use treedrive_worker::runner::WorkerRunner;

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}

/// Load configuration from files and environment.
fn load_configuration() -> Result<AppConfig, AppError> {
    let env = std::env::var("TREEDRIVE_ENV").unwrap_or_else(|_| "development".to_string());
    AppConfig::load(&env)
}

/// Initialize tracing/logging.
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).pretty().init();
        }
    }
}

/// Wire everything together and run until shutdown.
async fn run(config: AppConfig) -> Result<(), AppError> {
    tracing::info!("Starting TreeDrive server...");

    let database = DatabasePool::connect(&config.database).await?;
    database.health_check().await?;
    treedrive_database::migration::run_migrations(database.pool()).await?;

    tokio::fs::create_dir_all(&config.storage.spool_dir).await?;
    let store = treedrive_storage::create_object_store(&config.storage).await?;
    tracing::info!(provider = store.provider_name(), "Object store ready");

    let pool = database.pool().clone();
    let bundle_repo = Arc::new(BundleRepository::new(pool.clone()));
    let job_repo = Arc::new(JobRepository::new(pool.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut worker_handle = None;
    let mut sweep_handle = None;

    if config.worker.enabled {
        let queue = Arc::new(JobQueue::new(Arc::clone(&job_repo)));

        let builder = ArchiveBuilder::new(
            Arc::clone(&store),
            config.storage.spool_dir.clone(),
            config.storage.block_size_bytes as usize,
        );

        let mut executor = JobExecutor::new();
        executor.register(Arc::new(BundleHandler::new(
            Arc::<BundleRepository>::clone(&bundle_repo),
            builder,
        )));
        executor.register(Arc::new(BundleExpiryHandler::new(
            Arc::clone(&bundle_repo),
            Arc::clone(&job_repo),
            Arc::clone(&store),
        )));

        let runner = WorkerRunner::new(
            Arc::clone(&queue),
            Arc::new(executor),
            config.worker.clone(),
        );
        let rx = shutdown_rx.clone();
        worker_handle = Some(tokio::spawn(async move {
            runner.run(rx).await;
        }));

        sweep_handle = Some(tokio::spawn(expiry_sweep_loop(
            queue,
            config.worker.cleanup_interval_seconds,
            config.worker.max_attempts,
            shutdown_rx,
        )));
    } else {
        tracing::info!("Worker disabled by configuration");
    }

    tracing::info!("TreeDrive server started");

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);

    if let Some(handle) = sweep_handle {
        handle.abort();
    }
    if let Some(handle) = worker_handle {
        if let Err(e) = tokio::time::timeout(std::time::Duration::from_secs(35), handle).await {
            tracing::warn!("Worker did not stop in time: {e}");
        }
    }

    database.close().await;
    tracing::info!("TreeDrive server stopped");
    Ok(())
}

/// Periodically enqueue a `bundle_expiry` job so expired archives get
/// deleted and old terminal jobs pruned.
async fn expiry_sweep_loop(
    queue: Arc<JobQueue>,
    interval_seconds: u64,
    max_attempts: i32,
    mut cancel: watch::Receiver<bool>,
) {
    let interval = std::time::Duration::from_secs(interval_seconds);
    loop {
        tokio::select! {
            _ = cancel.changed() => {
                if *cancel.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(interval) => {
                let params = CreateJob {
                    job_type: "bundle_expiry".to_string(),
                    payload: serde_json::json!({}),
                    max_attempts,
                    scheduled_at: None,
                };
                if let Err(e) = queue.enqueue(params).await {
                    tracing::error!(error = %e, "Failed to enqueue expiry sweep");
                }
            }
        }
    }
}

/// Wait for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install CTRL+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
