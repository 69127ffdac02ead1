//! Worker tier: job ownership and provider orchestration.
//!
//! Each worker hosts the five job RPCs, owns a map of per-job pollers, and
//! runs a lease reconciler so jobs migrate between workers on failure:
//!
//! - [`handlers`]: SubmitJob / ListJobs / GetJob / CancelJob / DeleteJob
//! - [`poller`]: per-job status polling loop, lease-guarded
//! - [`reconciler`]: startup + periodic lease claim scan
//!
//! The lease row in the store is the only cross-worker synchronization
//! primitive; at most one worker polls a given active job at any time.

pub mod handlers;
pub mod poller;
pub mod reconciler;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::config::JobConfigFile;
use crate::model::JobStatus;
use crate::provider::Provider;
use crate::store::StateStore;

use poller::JobPoller;

const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 10;

/// Handle to a running poller. The stop token is idempotent, so concurrent
/// cancel/delete/shutdown paths can all signal it safely.
pub(crate) struct PollerHandle {
    stop: CancellationToken,
}

/// Worker service hosting the job RPC handlers and the poller pool.
pub struct WorkerService {
    store: Arc<dyn StateStore>,
    provider: Arc<dyn Provider>,
    job_config: JobConfigFile,
    worker_id: String,
    lease_ttl: Duration,
    claim_interval: Duration,
    polling_interval: Duration,
    max_failed_attempts: u32,
    pollers: Mutex<HashMap<(String, String), PollerHandle>>,
}

impl WorkerService {
    pub fn new(
        store: Arc<dyn StateStore>,
        provider: Arc<dyn Provider>,
        job_config: JobConfigFile,
        worker_id: impl Into<String>,
        lease_ttl: Duration,
        claim_interval: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            job_config,
            worker_id: worker_id.into(),
            lease_ttl,
            claim_interval,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            pollers: Mutex::new(HashMap::new()),
        }
    }

    /// Override the poll cadence and failure budget (integration tests use
    /// millisecond intervals).
    pub fn with_polling(mut self, interval: Duration, max_failed_attempts: u32) -> Self {
        self.polling_interval = interval;
        self.max_failed_attempts = max_failed_attempts;
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Spawn a background poller for a job this worker owns. A no-op when a
    /// poller for the job is already registered here.
    pub(crate) fn start_job_poller(
        self: &Arc<Self>,
        tenant_id: &str,
        job_id: &str,
        cloud_resource_path: &str,
        initial_status: JobStatus,
    ) {
        let key = (tenant_id.to_string(), job_id.to_string());
        let stop = CancellationToken::new();

        {
            let mut pollers = self.pollers.lock().expect("poller map poisoned");
            if pollers.contains_key(&key) {
                return;
            }
            pollers.insert(key.clone(), PollerHandle { stop: stop.clone() });
        }

        tracing::info!(
            job_id = %job_id,
            tenant_id = %tenant_id,
            worker_id = %self.worker_id,
            "Starting poller"
        );

        let poller = JobPoller {
            tenant_id: tenant_id.to_string(),
            job_id: job_id.to_string(),
            cloud_resource_path: cloud_resource_path.to_string(),
            current_status: initial_status,
            store: self.store.clone(),
            provider: self.provider.clone(),
            worker_id: self.worker_id.clone(),
            lease_ttl: self.lease_ttl,
            polling_interval: self.polling_interval,
            max_failed_attempts: self.max_failed_attempts,
        };

        // Detached from any request context; the poller outlives the RPC
        // that created the job.
        let service = self.clone();
        tokio::spawn(async move {
            poller.run(stop).await;
            service.unregister_poller(&key.0, &key.1);
        });
    }

    /// Stop and remove the poller for a specific job, if one runs here.
    pub(crate) fn stop_poller_for_job(&self, tenant_id: &str, job_id: &str) {
        let key = (tenant_id.to_string(), job_id.to_string());
        let mut pollers = self.pollers.lock().expect("poller map poisoned");
        if let Some(handle) = pollers.remove(&key) {
            tracing::info!(job_id = %job_id, "Stopping poller");
            handle.stop.cancel();
        }
    }

    /// Signal every active poller to exit. Leases are not yielded; expiry
    /// and preferred-worker handback reclaim them.
    pub fn stop_all_pollers(&self) {
        let mut pollers = self.pollers.lock().expect("poller map poisoned");
        tracing::info!(count = pollers.len(), "Stopping all active pollers");
        for (_, handle) in pollers.drain() {
            handle.stop.cancel();
        }
    }

    /// Number of pollers currently registered on this worker.
    pub fn active_poller_count(&self) -> usize {
        self.pollers.lock().expect("poller map poisoned").len()
    }

    fn unregister_poller(&self, tenant_id: &str, job_id: &str) {
        let key = (tenant_id.to_string(), job_id.to_string());
        self.pollers.lock().expect("poller map poisoned").remove(&key);
    }
}

/// Build the worker RPC router.
pub fn router(service: Arc<WorkerService>) -> Router {
    Router::new()
        .route("/SubmitJob", post(handlers::submit_job))
        .route("/ListJobs", post(handlers::list_jobs))
        .route("/GetJob", post(handlers::get_job))
        .route("/CancelJob", post(handlers::cancel_job))
        .route("/DeleteJob", post(handlers::delete_job))
        .route("/health", get(handlers::health))
        .with_state(service)
}

/// Serve the worker until the shutdown token fires, then stop accepting and
/// signal all pollers to exit.
pub async fn serve(
    service: Arc<WorkerService>,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> crate::error::Result<()> {
    let app = router(service.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| crate::error::GantryError::Internal(format!("failed to bind {addr}: {e}")))?;

    tracing::info!(addr = %addr, worker_id = %service.worker_id, "Worker listening");

    let graceful_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful_shutdown.cancelled().await })
        .await
        .map_err(|e| crate::error::GantryError::Internal(format!("worker server failed: {e}")))?;

    service.stop_all_pollers();
    Ok(())
}
