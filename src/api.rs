//! Wire types for the JSON-over-HTTP RPC surface.
//!
//! Both tiers speak the same request/response pairs; field names are
//! camelCase on the wire. The gateway forwards `SubmitJobRequest` to a worker
//! after filling in `job_id`, and decorates the worker's response with its
//! routing decision.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ResourceOverride;
use crate::model::{Job, Tenant};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmitJobRequest {
    /// Internal job id. Minted by the gateway; workers only generate one as a
    /// fallback for direct calls.
    pub job_id: String,
    pub image_uri: String,
    pub env_vars: HashMap<String, String>,
    pub resource_profile: String,
    pub resource_override: Option<ResourceOverride>,
    pub name: String,
    pub machine_type: String,
    pub boot_disk_size_gb: i64,
    pub use_spot_vms: bool,
    pub service_account: String,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub worker_assigned: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub complexity_level: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub assigned_service: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub routing_reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetJobRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetJobResponse {
    pub job: JobView,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CancelJobRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CancelJobResponse {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteJobRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteJobResponse {
    pub job_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetCurrentTenantResponse {
    pub tenant_id: String,
    pub user_email: String,
    pub oauth_provider: String,
    pub created_at: String,
}

impl From<&Tenant> for GetCurrentTenantResponse {
    fn from(tenant: &Tenant) -> Self {
        Self {
            tenant_id: tenant.tenant_id.clone(),
            user_email: tenant.user_email.clone(),
            oauth_provider: tenant.oauth_provider.clone(),
            created_at: tenant.created_at.to_rfc3339(),
        }
    }
}

/// Wire representation of a persisted job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub tenant_id: String,
    pub job_id: String,
    pub status: String,
    pub image_uri: String,
    pub commands: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_vars_json: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_disk_size_gb: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_spot_vms: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_resource_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_group: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            tenant_id: job.tenant_id.clone(),
            job_id: job.job_id.clone(),
            status: job.status.to_string(),
            image_uri: job.image_uri.clone(),
            commands: job.commands.clone(),
            env_vars_json: job.env_vars_json.clone(),
            name: job.name.clone(),
            resource_profile: job.resource_profile.clone(),
            machine_type: job.machine_type.clone(),
            boot_disk_size_gb: job.boot_disk_size_gb,
            use_spot_vms: job.use_spot_vms,
            service_account: job.service_account.clone(),
            cloud_resource_path: job.cloud_resource_path.clone(),
            task_group: job.task_group.clone(),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            scheduled_at: job.scheduled_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

/// Error body returned by both tiers: `{"error": "..."}` with the mapped
/// HTTP status code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
