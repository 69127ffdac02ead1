//! Google Cloud Batch provider, speaking the Batch v1 REST API.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::ProviderSettings;
use crate::error::{GantryError, Result};
use crate::model::JobStatus;
use crate::provider::{JobSpec, Provider, SubmitOutcome};

const BATCH_API_BASE: &str = "https://batch.googleapis.com/v1";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Cached OAuth token with its expiry deadline.
#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct GcpBatchProvider {
    http: reqwest::Client,
    project_id: String,
    region: String,
    /// Static token from `GCP_ACCESS_TOKEN`; when absent, tokens are fetched
    /// from the GCE metadata server and cached until shortly before expiry.
    static_token: Option<String>,
    cached_token: Mutex<Option<CachedToken>>,
}

impl GcpBatchProvider {
    /// Registry constructor.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
        if settings.project_id.is_empty() {
            return Err(GantryError::InvalidArgument(
                "project_id is required for the gcp batch provider".to_string(),
            ));
        }
        if settings.region.is_empty() {
            return Err(GantryError::InvalidArgument(
                "region is required for the gcp batch provider".to_string(),
            ));
        }

        let static_token = std::env::var("GCP_ACCESS_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        Ok(Arc::new(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .map_err(GantryError::Upstream)?,
            project_id: settings.project_id.clone(),
            region: settings.region.clone(),
            static_token,
            cached_token: Mutex::new(None),
        }))
    }

    fn parent(&self) -> String {
        format!(
            "projects/{}/locations/{}",
            self.project_id, self.region
        )
    }

    async fn bearer_token(&self) -> Result<String> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        let mut cached = self.cached_token.lock().await;
        if let Some(entry) = cached.as_ref() {
            if entry.expires_at > Instant::now() {
                return Ok(entry.token.clone());
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: u64,
        }

        let response = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .error_for_status()?;
        let token: TokenResponse = response.json().await?;

        // Refresh one minute early so in-flight calls never carry a token
        // that expires mid-request.
        let expires_at =
            Instant::now() + Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at,
        });

        Ok(token.access_token)
    }

    async fn read_error_body(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        format!("gcp batch api returned {status}: {body}")
    }
}

#[async_trait::async_trait]
impl Provider for GcpBatchProvider {
    async fn submit(&self, spec: &JobSpec) -> Result<SubmitOutcome> {
        let token = self.bearer_token().await?;
        let url = format!("{BATCH_API_BASE}/{}/jobs", self.parent());

        let body = build_job_body(spec);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .query(&[
                ("job_id", spec.provider_job_id.as_str()),
                ("request_id", spec.request_id.as_str()),
            ])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GantryError::Provider(
                Self::read_error_body(response).await,
            ));
        }

        let job: GcpJob = response.json().await?;
        let initial_status = map_gcp_state(job.status.as_ref().map(|s| s.state.as_str()));

        Ok(SubmitOutcome {
            cloud_resource_path: job.name,
            initial_status,
        })
    }

    async fn get_status(&self, cloud_resource_path: &str) -> Result<JobStatus> {
        let token = self.bearer_token().await?;
        let url = format!("{BATCH_API_BASE}/{cloud_resource_path}");

        let response = self.http.get(&url).bearer_auth(&token).send().await?;
        if !response.status().is_success() {
            return Err(GantryError::Provider(
                Self::read_error_body(response).await,
            ));
        }

        let job: GcpJob = response.json().await?;
        Ok(map_gcp_state(job.status.as_ref().map(|s| s.state.as_str())))
    }

    async fn cancel(&self, cloud_resource_path: &str) -> Result<()> {
        let token = self.bearer_token().await?;
        let url = format!("{BATCH_API_BASE}/{cloud_resource_path}:cancel");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GantryError::Provider(
                Self::read_error_body(response).await,
            ));
        }
        Ok(())
    }

    async fn delete(&self, cloud_resource_path: &str) -> Result<()> {
        let token = self.bearer_token().await?;
        let url = format!("{BATCH_API_BASE}/{cloud_resource_path}");

        let response = self.http.delete(&url).bearer_auth(&token).send().await?;

        // A job the provider no longer knows about is already deleted.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(GantryError::Provider(
                Self::read_error_body(response).await,
            ));
        }
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<String>> {
        let token = self.bearer_token().await?;
        let url = format!("{BATCH_API_BASE}/{}/jobs", self.parent());

        let mut paths = Vec::new();
        let mut page_token = String::new();

        loop {
            let mut request = self.http.get(&url).bearer_auth(&token);
            if !page_token.is_empty() {
                request = request.query(&[("page_token", page_token.as_str())]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(GantryError::Provider(
                    Self::read_error_body(response).await,
                ));
            }

            let page: GcpJobList = response.json().await?;
            paths.extend(page.jobs.into_iter().map(|job| job.name));

            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = next,
                _ => break,
            }
        }

        Ok(paths)
    }
}

/// Map a GCP Batch job state onto the canonical set. States the API may add
/// later fall through to UNKNOWN, which callers treat as "no transition".
fn map_gcp_state(state: Option<&str>) -> JobStatus {
    match state {
        Some("QUEUED") => JobStatus::Pending,
        Some("SCHEDULED") => JobStatus::Scheduled,
        Some("RUNNING") => JobStatus::Running,
        Some("SUCCEEDED") => JobStatus::Completed,
        Some("FAILED") => JobStatus::Failed,
        Some("CANCELLED") | Some("CANCELLATION_IN_PROGRESS") | Some("DELETION_IN_PROGRESS") => {
            JobStatus::Cancelled
        }
        _ => JobStatus::Unknown,
    }
}

// Minimal wire shapes for the Batch v1 API; only the fields Gantry reads or
// writes are modelled.

#[derive(Debug, Deserialize)]
struct GcpJob {
    name: String,
    status: Option<GcpJobStatus>,
}

#[derive(Debug, Deserialize)]
struct GcpJobStatus {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GcpJobList {
    #[serde(default)]
    jobs: Vec<GcpJob>,
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobBody {
    task_groups: Vec<TaskGroupBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allocation_policy: Option<AllocationPolicyBody>,
    logs_policy: LogsPolicyBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskGroupBody {
    task_spec: TaskSpecBody,
    task_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallelism: Option<i64>,
    scheduling_policy: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskSpecBody {
    runnables: Vec<RunnableBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    compute_resource: Option<ComputeResourceBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_run_duration: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunnableBody {
    container: ContainerBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<EnvironmentBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerBody {
    image_uri: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    commands: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EnvironmentBody {
    variables: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ComputeResourceBody {
    cpu_milli: i64,
    memory_mib: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AllocationPolicyBody {
    instances: Vec<InstancePolicyOrTemplateBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service_account: Option<ServiceAccountBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstancePolicyOrTemplateBody {
    policy: InstancePolicyBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InstancePolicyBody {
    #[serde(skip_serializing_if = "String::is_empty")]
    machine_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    provisioning_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    boot_disk: Option<BootDiskBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BootDiskBody {
    size_gb: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServiceAccountBody {
    email: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LogsPolicyBody {
    destination: String,
}

fn build_job_body(spec: &JobSpec) -> JobBody {
    let environment = if spec.env_vars.is_empty() {
        None
    } else {
        Some(EnvironmentBody {
            variables: spec.env_vars.clone(),
        })
    };

    let compute_resource = spec.resources.map(|r| ComputeResourceBody {
        cpu_milli: r.cpu_millis,
        memory_mib: r.memory_mib,
    });

    let max_run_duration = spec
        .resources
        .filter(|r| r.max_run_duration_seconds > 0)
        .map(|r| format!("{}s", r.max_run_duration_seconds));

    let needs_allocation_policy = !spec.machine_type.is_empty()
        || spec.use_spot_vms
        || spec.boot_disk_size_gb > 0
        || !spec.service_account.is_empty();

    let allocation_policy = needs_allocation_policy.then(|| AllocationPolicyBody {
        instances: vec![InstancePolicyOrTemplateBody {
            policy: InstancePolicyBody {
                machine_type: spec.machine_type.clone(),
                provisioning_model: spec.use_spot_vms.then(|| "SPOT".to_string()),
                boot_disk: (spec.boot_disk_size_gb > 0).then(|| BootDiskBody {
                    size_gb: spec.boot_disk_size_gb,
                }),
            },
        }],
        service_account: (!spec.service_account.is_empty()).then(|| ServiceAccountBody {
            email: spec.service_account.clone(),
        }),
    });

    JobBody {
        task_groups: vec![TaskGroupBody {
            task_spec: TaskSpecBody {
                runnables: vec![RunnableBody {
                    container: ContainerBody {
                        image_uri: spec.image_uri.clone(),
                        commands: spec.commands.clone(),
                    },
                    environment,
                }],
                compute_resource,
                max_run_duration,
            },
            task_count: spec.task_group.task_count.max(1),
            parallelism: (spec.task_group.parallelism > 0).then_some(spec.task_group.parallelism),
            scheduling_policy: spec.task_group.scheduling_policy.clone(),
        }],
        allocation_policy,
        logs_policy: LogsPolicyBody {
            destination: "CLOUD_LOGGING".to_string(),
        },
    }
}
