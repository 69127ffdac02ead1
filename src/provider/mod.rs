//! Cloud batch provider abstraction.
//!
//! A [`Provider`] offers a uniform submit / get-status / cancel / delete /
//! list surface over heterogeneous cloud batch APIs and maps each native
//! state onto the canonical [`JobStatus`] set. Concrete providers register a
//! constructor under a name ("gcp", "aws") at startup; selection is by
//! configuration. The provider is the only worker component that performs
//! cloud-API I/O.

pub mod aws;
pub mod gcp;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use once_cell::sync::Lazy;

use crate::config::{ProviderSettings, ResourceProfile};
use crate::error::{GantryError, Result};
use crate::model::JobStatus;

/// Task-group options within a job. Defaults match a single-task job
/// scheduled as soon as possible.
#[derive(Debug, Clone)]
pub struct TaskGroupOptions {
    pub task_count: i64,
    /// Max concurrent tasks; 0 means unlimited.
    pub parallelism: i64,
    /// "AS_SOON_AS_POSSIBLE" or "IN_ORDER".
    pub scheduling_policy: String,
}

impl Default for TaskGroupOptions {
    fn default() -> Self {
        Self {
            task_count: 1,
            parallelism: 0,
            scheduling_policy: "AS_SOON_AS_POSSIBLE".to_string(),
        }
    }
}

/// Cloud-agnostic configuration for submitting one batch job.
#[derive(Debug, Clone, Default)]
pub struct JobSpec {
    /// Provider-compatible job identifier (sanitised, length-bounded).
    pub provider_job_id: String,
    /// Idempotency key at the provider's create API. Two submits with the
    /// same key within the provider's dedup window return the same job.
    pub request_id: String,
    pub image_uri: String,
    pub commands: Vec<String>,
    pub env_vars: HashMap<String, String>,
    pub resources: Option<ResourceProfile>,
    /// Specific machine type; empty lets the provider auto-select.
    pub machine_type: String,
    pub boot_disk_size_gb: i64,
    pub use_spot_vms: bool,
    pub service_account: String,
    pub task_group: TaskGroupOptions,
}

/// Result of a successful submission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Opaque provider handle, e.g. `projects/.../locations/.../jobs/...`
    /// or an ARN. Once persisted it is never cleared.
    pub cloud_resource_path: String,
    pub initial_status: JobStatus,
}

/// Uniform surface over a cloud batch API.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    /// Submit a new batch job. Idempotent under `request_id`.
    async fn submit(&self, spec: &JobSpec) -> Result<SubmitOutcome>;

    /// Current canonical status of a submitted job.
    async fn get_status(&self, cloud_resource_path: &str) -> Result<JobStatus>;

    /// Ask the provider to drive the job toward a terminal state.
    async fn cancel(&self, cloud_resource_path: &str) -> Result<()>;

    /// Reclaim provider-side resources. Not-found counts as success.
    async fn delete(&self, cloud_resource_path: &str) -> Result<()>;

    /// Cloud resource paths of all jobs in the configured project/account.
    async fn list_jobs(&self) -> Result<Vec<String>>;
}

type ProviderFactory = fn(&ProviderSettings) -> Result<Arc<dyn Provider>>;

static REGISTRY: Lazy<RwLock<HashMap<&'static str, ProviderFactory>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a provider constructor under a name. Later registrations under
/// the same name win; call this before serving traffic.
pub fn register(name: &'static str, factory: ProviderFactory) {
    REGISTRY
        .write()
        .expect("provider registry poisoned")
        .insert(name, factory);
}

/// Register the built-in providers. Idempotent.
pub fn register_builtin() {
    register("gcp", gcp::GcpBatchProvider::from_settings);
    register("aws", aws::AwsBatchProvider::from_settings);
}

/// Construct the provider named by `settings.provider`.
pub fn create(settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
    let factory = {
        let registry = REGISTRY.read().expect("provider registry poisoned");
        registry.get(settings.provider.as_str()).copied()
    };

    match factory {
        Some(factory) => factory(settings),
        None => Err(GantryError::InvalidArgument(format!(
            "unsupported batch provider: {}",
            settings.provider
        ))),
    }
}
