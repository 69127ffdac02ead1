use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::worker::WorkerService;

impl WorkerService {
    /// Scan all active jobs with a cloud resource path and try to claim each
    /// lease; spawn a poller for every win.
    ///
    /// Run once at startup to re-attach ownership after a restart (the
    /// preferred-worker predicate takes this worker's jobs back even from an
    /// unexpired owner), then on every claim-interval tick so a crashed
    /// worker's jobs migrate here once their leases expire.
    pub async fn reconcile_active_job_leases(self: &Arc<Self>, startup: bool) -> Result<()> {
        if startup {
            tracing::info!(worker_id = %self.worker_id, "Scanning active jobs to claim poller leases");
        }

        let jobs = self.store.list_active_jobs().await?;

        let mut claimed = 0;
        for job in jobs {
            let Some(path) = job.cloud_resource_path.as_deref() else {
                continue;
            };

            let lease_until = Utc::now()
                + chrono::Duration::from_std(self.lease_ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(30));
            let owned = match self
                .store
                .try_claim_or_renew(&job.tenant_id, &job.job_id, &self.worker_id, lease_until)
                .await
            {
                Ok(owned) => owned,
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id, error = %e, "Lease claim failed");
                    continue;
                }
            };

            if !owned {
                continue;
            }

            self.start_job_poller(&job.tenant_id, &job.job_id, path, job.status);
            claimed += 1;
        }

        if startup {
            tracing::info!(
                worker_id = %self.worker_id,
                claimed,
                "Lease reconcile complete"
            );
        }

        Ok(())
    }

    /// Run the steady-state reconcile loop until shutdown.
    pub fn start_lease_reconciler(self: Arc<Self>, shutdown: CancellationToken) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.claim_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!(worker_id = %self.worker_id, "Lease reconciler stopped");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                if let Err(e) = self.reconcile_active_job_leases(false).await {
                    tracing::warn!(worker_id = %self.worker_id, error = %e, "Lease reconcile tick failed");
                }
            }
        });
    }
}
