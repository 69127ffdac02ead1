//! AWS Batch provider.
//!
//! The state mapping is complete; the API surface itself is a stub pending a
//! SigV4-signed client. Submitting through this provider fails cleanly and
//! the worker records the job as FAILED.

use std::sync::Arc;

use crate::config::ProviderSettings;
use crate::error::{GantryError, Result};
use crate::model::JobStatus;
use crate::provider::{JobSpec, Provider, SubmitOutcome};

#[derive(Debug)]
pub struct AwsBatchProvider {
    #[allow(dead_code)]
    account_id: String,
    #[allow(dead_code)]
    region: String,
    #[allow(dead_code)]
    job_queue: String,
}

impl AwsBatchProvider {
    /// Registry constructor.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
        let account_id = settings
            .options
            .get("account_id")
            .cloned()
            .unwrap_or_default();
        if account_id.is_empty() {
            return Err(GantryError::InvalidArgument(
                "account_id is required for the aws batch provider".to_string(),
            ));
        }

        let job_queue = settings
            .options
            .get("job_queue")
            .cloned()
            .unwrap_or_default();
        if job_queue.is_empty() {
            return Err(GantryError::InvalidArgument(
                "job_queue is required for the aws batch provider".to_string(),
            ));
        }

        if settings.region.is_empty() {
            return Err(GantryError::InvalidArgument(
                "region is required for the aws batch provider".to_string(),
            ));
        }

        Ok(Arc::new(Self {
            account_id,
            region: settings.region.clone(),
            job_queue,
        }))
    }

    fn unimplemented<T>() -> Result<T> {
        Err(GantryError::Provider(
            "AWS Batch provider not fully implemented yet".to_string(),
        ))
    }
}

#[async_trait::async_trait]
impl Provider for AwsBatchProvider {
    async fn submit(&self, _spec: &JobSpec) -> Result<SubmitOutcome> {
        // TODO(aws): RegisterJobDefinition + SubmitJob via a SigV4 client;
        // the job ARN becomes the cloud resource path.
        Self::unimplemented()
    }

    async fn get_status(&self, _cloud_resource_path: &str) -> Result<JobStatus> {
        Self::unimplemented()
    }

    async fn cancel(&self, _cloud_resource_path: &str) -> Result<()> {
        Self::unimplemented()
    }

    async fn delete(&self, _cloud_resource_path: &str) -> Result<()> {
        Self::unimplemented()
    }

    async fn list_jobs(&self) -> Result<Vec<String>> {
        Self::unimplemented()
    }
}

/// Map an AWS Batch job state onto the canonical set.
pub fn map_aws_state(state: &str) -> JobStatus {
    match state {
        "SUBMITTED" | "PENDING" => JobStatus::Pending,
        "RUNNABLE" | "STARTING" => JobStatus::Scheduled,
        "RUNNING" => JobStatus::Running,
        "SUCCEEDED" => JobStatus::Completed,
        "FAILED" => JobStatus::Failed,
        "CANCELLED" => JobStatus::Cancelled,
        _ => JobStatus::Unknown,
    }
}
