//! Transactional state store shared by the gateway and every worker.
//!
//! The engine behind [`StateStore`] is pluggable; the orchestrator relies
//! only on this contract: serializable single-row semantics for
//! [`StateStore::try_claim_or_renew`], read-your-writes within a session for
//! everything else, and tenant scoping enforced at query time. Listings need
//! not be strongly consistent across workers.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{Job, JobStateTransition, JobStatus, Tenant};

pub use sqlite::SqliteStore;

#[async_trait]
pub trait StateStore: Send + Sync {
    // ── Tenants ──────────────────────────────────────────────────────────

    async fn insert_tenant(&self, tenant: &Tenant) -> Result<()>;

    async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    /// Look up a tenant by its external identity pair.
    async fn find_tenant_by_identity(
        &self,
        oauth_provider: &str,
        oauth_user_id: &str,
    ) -> Result<Option<Tenant>>;

    async fn list_tenants(&self) -> Result<Vec<Tenant>>;

    /// Remove a tenant together with all of its jobs and transitions.
    async fn delete_tenant(&self, tenant_id: &str) -> Result<()>;

    // ── Jobs ─────────────────────────────────────────────────────────────

    /// Insert a fully-specified job row, lease fields included.
    async fn insert_job(&self, job: &Job) -> Result<()>;

    async fn get_job(&self, tenant_id: &str, job_id: &str) -> Result<Option<Job>>;

    /// All jobs for a tenant, newest first.
    async fn list_jobs(&self, tenant_id: &str) -> Result<Vec<Job>>;

    async fn list_jobs_by_status(&self, tenant_id: &str, status: JobStatus) -> Result<Vec<Job>>;

    /// Active jobs across all tenants that already have a cloud resource
    /// path; this is the reconciler's scan set.
    async fn list_active_jobs(&self) -> Result<Vec<Job>>;

    /// Persist a status change. Scheduling / start / completion timestamps
    /// are stamped on first entry into the corresponding status. Rejects the
    /// UNKNOWN sentinel.
    async fn set_status(&self, tenant_id: &str, job_id: &str, status: JobStatus) -> Result<()>;

    /// Persist a status change together with the provider's resource path.
    async fn set_status_and_cloud_path(
        &self,
        tenant_id: &str,
        job_id: &str,
        status: JobStatus,
        cloud_resource_path: &str,
    ) -> Result<()>;

    async fn mark_failed(&self, tenant_id: &str, job_id: &str, error_message: &str) -> Result<()>;

    async fn mark_completed(&self, tenant_id: &str, job_id: &str) -> Result<()>;

    async fn mark_cancelled(&self, tenant_id: &str, job_id: &str) -> Result<()>;

    /// Remove a job row; its transitions cascade.
    async fn delete_job(&self, tenant_id: &str, job_id: &str) -> Result<()>;

    // ── Transitions ──────────────────────────────────────────────────────

    async fn append_transition(&self, transition: &JobStateTransition) -> Result<()>;

    /// Transitions for one job in observation order.
    async fn list_transitions(
        &self,
        tenant_id: &str,
        job_id: &str,
    ) -> Result<Vec<JobStateTransition>>;

    // ── Lease ────────────────────────────────────────────────────────────

    /// Claim or renew the per-job lease for `worker_id` in one serialized
    /// read-modify-write. Returns `true` when the caller owns the lease
    /// afterwards.
    ///
    /// Never writes a terminal row. The claim succeeds when the caller is
    /// already the owner, the row is unowned, the lease has expired, or the
    /// caller is the job's preferred worker (deterministic handback after a
    /// failover).
    async fn try_claim_or_renew(
        &self,
        tenant_id: &str,
        job_id: &str,
        worker_id: &str,
        new_expiry: DateTime<Utc>,
    ) -> Result<bool>;
}
