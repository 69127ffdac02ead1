use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical job status shared by the store, the pollers, and every provider.
///
/// `Unknown` is a provider-side sentinel ("could not determine the state");
/// it is never persisted and pollers treat it as "no transition".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
    Unknown,
}

impl JobStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// A job can be cancelled only while PENDING, SCHEDULED, or RUNNING.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Scheduled | JobStatus::Running
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "SCHEDULED" => Some(JobStatus::Scheduled),
            "RUNNING" => Some(JobStatus::Running),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            "UNKNOWN" => Some(JobStatus::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a user or organization. Created on first authenticated
/// request; uniquely identified by id or by `(oauth_provider, oauth_user_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub tenant_id: String,
    pub user_email: String,
    pub oauth_provider: String,
    pub oauth_user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-job lease granting one worker exclusive polling authority.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Lease {
    pub owner_worker_id: Option<String>,
    pub preferred_worker_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// A request to run one container image, keyed `(tenant_id, job_id)`.
///
/// Fields up to `created_at` are immutable after insert; the rest are owned
/// by the polling worker, the cancel/delete handlers, and the reconciler
/// (lease fields only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub tenant_id: String,
    pub job_id: String,
    pub image_uri: String,
    pub commands: Vec<String>,
    pub env_vars_json: Option<String>,
    pub name: Option<String>,
    pub resource_profile: Option<String>,
    pub machine_type: Option<String>,
    pub boot_disk_size_gb: Option<i64>,
    pub use_spot_vms: Option<bool>,
    pub service_account: Option<String>,
    pub max_retries: i64,
    pub created_at: DateTime<Utc>,

    pub status: JobStatus,
    pub cloud_resource_path: Option<String>,
    pub task_group: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i64,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub lease: Lease,
}

/// Append-only audit record for a single status change.
/// `from_status` is None for the implicit initial transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStateTransition {
    pub tenant_id: String,
    pub job_id: String,
    pub transition_id: String,
    pub from_status: Option<JobStatus>,
    pub to_status: JobStatus,
    pub transitioned_at: DateTime<Utc>,
    pub note: Option<String>,
}
