use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::model::{JobStateTransition, JobStatus};
use crate::provider::Provider;
use crate::store::StateStore;

/// Per-job polling loop. One poller exists per active job per worker; the
/// lease renewal at the top of each tick guarantees only the current owner
/// ever writes status.
pub(crate) struct JobPoller {
    pub tenant_id: String,
    pub job_id: String,
    pub cloud_resource_path: String,
    pub current_status: JobStatus,
    pub store: Arc<dyn StateStore>,
    pub provider: Arc<dyn Provider>,
    pub worker_id: String,
    pub lease_ttl: Duration,
    pub polling_interval: Duration,
    pub max_failed_attempts: u32,
}

impl JobPoller {
    pub async fn run(mut self, stop: CancellationToken) {
        let mut ticker = tokio::time::interval(self.polling_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; consume it so each iteration
        // below waits one full interval.
        ticker.tick().await;

        let mut failed_attempts: u32 = 0;

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    tracing::info!(job_id = %self.job_id, tenant_id = %self.tenant_id, "Poller stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            // Renew the lease before touching the provider. Losing it means
            // another worker took over; exit without writing anything.
            let lease_until = Utc::now()
                + chrono::Duration::from_std(self.lease_ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(30));
            match self
                .store
                .try_claim_or_renew(&self.tenant_id, &self.job_id, &self.worker_id, lease_until)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(
                        job_id = %self.job_id,
                        worker_id = %self.worker_id,
                        "Lease ownership lost; stopping local poller"
                    );
                    return;
                }
                Err(e) => {
                    // Conservative: without a confirmed lease, skip this tick.
                    tracing::warn!(job_id = %self.job_id, error = %e, "Error renewing lease");
                    continue;
                }
            }

            let status = match self.provider.get_status(&self.cloud_resource_path).await {
                Ok(status) => {
                    failed_attempts = 0;
                    status
                }
                Err(e) => {
                    failed_attempts += 1;
                    tracing::warn!(
                        job_id = %self.job_id,
                        attempt = failed_attempts,
                        max_attempts = self.max_failed_attempts,
                        error = %e,
                        "Error polling job status"
                    );
                    if failed_attempts >= self.max_failed_attempts {
                        tracing::error!(
                            job_id = %self.job_id,
                            "Max failed attempts reached, stopping poller"
                        );
                        return;
                    }
                    continue;
                }
            };

            // UNKNOWN carries no information; leave the job untouched.
            if status == JobStatus::Unknown {
                continue;
            }

            if status != self.current_status {
                let old_status = self.current_status;
                tracing::info!(
                    job_id = %self.job_id,
                    from = %old_status,
                    to = %status,
                    "Job status changed"
                );

                if let Err(e) = self
                    .store
                    .set_status(&self.tenant_id, &self.job_id, status)
                    .await
                {
                    tracing::error!(job_id = %self.job_id, error = %e, "Error updating job status");
                }

                // Audit record follows the status write; a crash between the
                // two yields an unaudited transition, tolerated and rare.
                let transition = JobStateTransition {
                    tenant_id: self.tenant_id.clone(),
                    job_id: self.job_id.clone(),
                    transition_id: Uuid::new_v4().to_string(),
                    from_status: Some(old_status),
                    to_status: status,
                    transitioned_at: Utc::now(),
                    note: Some("status observed from provider".to_string()),
                };
                if let Err(e) = self.store.append_transition(&transition).await {
                    tracing::error!(job_id = %self.job_id, error = %e, "Error recording state transition");
                }

                self.current_status = status;

                if status.is_terminal() {
                    tracing::info!(
                        job_id = %self.job_id,
                        status = %status,
                        "Job reached terminal status, stopping poller"
                    );
                    return;
                }
            }
        }
    }
}
