use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::api::{
    CancelJobRequest, CancelJobResponse, DeleteJobRequest, DeleteJobResponse, GetJobRequest,
    GetJobResponse, JobView, ListJobsResponse, SubmitJobRequest, SubmitJobResponse,
};
use crate::error::{GantryError, Result};
use crate::model::{Job, JobStateTransition, JobStatus, Lease};
use crate::provider::{JobSpec, TaskGroupOptions};
use crate::worker::WorkerService;

/// Boot disk size applied when the request leaves it unset.
const DEFAULT_BOOT_DISK_GB: i64 = 50;
/// Providers reject boot disks below this size.
const MIN_BOOT_DISK_GB: i64 = 10;

pub async fn health() -> &'static str {
    "OK"
}

fn tenant_id_from(headers: &HeaderMap) -> Result<String> {
    headers
        .get("X-Tenant-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GantryError::InvalidArgument("X-Tenant-Id header is required".to_string()))
}

pub async fn submit_job(
    State(service): State<Arc<WorkerService>>,
    headers: HeaderMap,
    Json(req): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>> {
    let tenant_id = tenant_id_from(&headers)?;
    tracing::info!(tenant_id = %tenant_id, "Received SubmitJob request");

    if req.image_uri.is_empty() {
        return Err(GantryError::InvalidArgument(
            "imageUri is required".to_string(),
        ));
    }
    if req.boot_disk_size_gb > 0 && req.boot_disk_size_gb < MIN_BOOT_DISK_GB {
        return Err(GantryError::InvalidArgument(format!(
            "bootDiskSizeGb must be at least {MIN_BOOT_DISK_GB} GB (got {})",
            req.boot_disk_size_gb
        )));
    }

    // The gateway mints the internal job id; generating one here is only a
    // fallback for direct worker calls.
    let internal_job_id = if req.job_id.is_empty() {
        let id = Uuid::new_v4().to_string();
        tracing::info!(job_id = %id, "Generated internal job ID (fallback)");
        id
    } else {
        req.job_id.clone()
    };

    let provider_job_id = derive_provider_job_id(&req.name, &internal_job_id);

    let env_vars_json = if req.env_vars.is_empty() {
        None
    } else {
        Some(serde_json::to_string(&req.env_vars)?)
    };

    // Insert the row as PENDING with a self-lease; this worker is both the
    // owner and the preferred worker for later handback.
    let now = Utc::now();
    let lease_until = now
        + chrono::Duration::from_std(service.lease_ttl())
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
    let job = Job {
        tenant_id: tenant_id.clone(),
        job_id: internal_job_id.clone(),
        image_uri: req.image_uri.clone(),
        commands: req.commands.clone(),
        env_vars_json,
        name: opt_string(&req.name),
        resource_profile: opt_string(&req.resource_profile),
        machine_type: opt_string(&req.machine_type),
        boot_disk_size_gb: opt_i64(req.boot_disk_size_gb),
        use_spot_vms: req.use_spot_vms.then_some(true),
        service_account: opt_string(&req.service_account),
        max_retries: 3,
        created_at: now,
        status: JobStatus::Pending,
        cloud_resource_path: None,
        task_group: None,
        scheduled_at: None,
        started_at: None,
        completed_at: None,
        retry_count: 0,
        error_message: None,
        updated_at: now,
        lease: Lease {
            owner_worker_id: Some(service.worker_id().to_string()),
            preferred_worker_id: Some(service.worker_id().to_string()),
            lease_expires_at: Some(lease_until),
            last_heartbeat_at: Some(now),
        },
    };
    service.store().insert_job(&job).await?;
    append_transition(&service, &tenant_id, &internal_job_id, None, JobStatus::Pending, "job created").await;

    let overrides = req.resource_override.unwrap_or_default();
    let resources =
        service
            .job_config
            .resolve_resources(&req.machine_type, &req.resource_profile, &overrides);

    let boot_disk_size_gb = if req.boot_disk_size_gb == 0 {
        DEFAULT_BOOT_DISK_GB
    } else {
        req.boot_disk_size_gb
    };

    let spec = JobSpec {
        provider_job_id,
        // The internal job id doubles as the idempotency key, so a retried
        // submission cannot create a second provider job.
        request_id: internal_job_id.clone(),
        image_uri: req.image_uri.clone(),
        commands: req.commands.clone(),
        env_vars: req.env_vars.clone(),
        resources: Some(resources),
        machine_type: req.machine_type.clone(),
        boot_disk_size_gb,
        use_spot_vms: req.use_spot_vms,
        service_account: req.service_account.clone(),
        task_group: TaskGroupOptions::default(),
    };

    let outcome = match service.provider.submit(&spec).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(job_id = %internal_job_id, error = %e, "Error submitting job to batch provider");
            if let Err(fail_err) = service
                .store()
                .mark_failed(&tenant_id, &internal_job_id, &e.to_string())
                .await
            {
                tracing::error!(job_id = %internal_job_id, error = %fail_err, "Error updating job status to FAILED");
            }
            append_transition(
                &service,
                &tenant_id,
                &internal_job_id,
                Some(JobStatus::Pending),
                JobStatus::Failed,
                "submission to batch provider failed",
            )
            .await;
            return Err(GantryError::Internal(format!(
                "failed to submit batch job: {e}"
            )));
        }
    };
    tracing::info!(
        job_id = %internal_job_id,
        cloud_resource_path = %outcome.cloud_resource_path,
        "Batch job created"
    );

    // Providers that cannot report an initial state get RUNNING: the job was
    // accepted and is progressing somewhere.
    let status = if outcome.initial_status == JobStatus::Unknown {
        JobStatus::Running
    } else {
        outcome.initial_status
    };

    service
        .store()
        .set_status_and_cloud_path(&tenant_id, &internal_job_id, status, &outcome.cloud_resource_path)
        .await?;
    if status != JobStatus::Pending {
        append_transition(
            &service,
            &tenant_id,
            &internal_job_id,
            Some(JobStatus::Pending),
            status,
            "submitted to batch provider",
        )
        .await;
    }

    service.start_job_poller(&tenant_id, &internal_job_id, &outcome.cloud_resource_path, status);

    tracing::info!(job_id = %internal_job_id, tenant_id = %tenant_id, status = %status, "Job submitted");
    Ok(Json(SubmitJobResponse {
        job_id: internal_job_id,
        status: status.to_string(),
        ..Default::default()
    }))
}

pub async fn list_jobs(
    State(service): State<Arc<WorkerService>>,
    headers: HeaderMap,
) -> Result<Json<ListJobsResponse>> {
    let tenant_id = tenant_id_from(&headers)?;

    let jobs = service.store().list_jobs(&tenant_id).await?;
    tracing::info!(tenant_id = %tenant_id, count = jobs.len(), "Listed jobs");

    Ok(Json(ListJobsResponse {
        jobs: jobs.iter().map(JobView::from).collect(),
    }))
}

pub async fn get_job(
    State(service): State<Arc<WorkerService>>,
    headers: HeaderMap,
    Json(req): Json<GetJobRequest>,
) -> Result<Json<GetJobResponse>> {
    let tenant_id = tenant_id_from(&headers)?;
    if req.job_id.is_empty() {
        return Err(GantryError::InvalidArgument("jobId is required".to_string()));
    }

    let job = service
        .store()
        .get_job(&tenant_id, &req.job_id)
        .await?
        .ok_or_else(|| GantryError::NotFound(format!("job not found: {}", req.job_id)))?;

    Ok(Json(GetJobResponse {
        job: JobView::from(&job),
    }))
}

pub async fn cancel_job(
    State(service): State<Arc<WorkerService>>,
    headers: HeaderMap,
    Json(req): Json<CancelJobRequest>,
) -> Result<Json<CancelJobResponse>> {
    let tenant_id = tenant_id_from(&headers)?;
    if req.job_id.is_empty() {
        return Err(GantryError::InvalidArgument("jobId is required".to_string()));
    }
    tracing::info!(job_id = %req.job_id, tenant_id = %tenant_id, "Received CancelJob request");

    let job = service
        .store()
        .get_job(&tenant_id, &req.job_id)
        .await?
        .ok_or_else(|| GantryError::NotFound(format!("job not found: {}", req.job_id)))?;

    if !job.status.is_cancellable() {
        return Err(GantryError::InvalidArgument(format!(
            "cannot cancel job with status {}; only PENDING, SCHEDULED, or RUNNING jobs can be cancelled",
            job.status
        )));
    }

    if let Some(path) = job.cloud_resource_path.as_deref() {
        service.provider.cancel(path).await?;
        tracing::info!(job_id = %req.job_id, "Job cancelled at the batch provider");
    }

    service
        .store()
        .mark_cancelled(&tenant_id, &req.job_id)
        .await?;
    append_transition(
        &service,
        &tenant_id,
        &req.job_id,
        Some(job.status),
        JobStatus::Cancelled,
        "job cancelled by user request",
    )
    .await;

    service.stop_poller_for_job(&tenant_id, &req.job_id);

    tracing::info!(job_id = %req.job_id, "Job cancelled");
    Ok(Json(CancelJobResponse {
        job_id: req.job_id,
        status: JobStatus::Cancelled.to_string(),
    }))
}

pub async fn delete_job(
    State(service): State<Arc<WorkerService>>,
    headers: HeaderMap,
    Json(req): Json<DeleteJobRequest>,
) -> Result<Json<DeleteJobResponse>> {
    let tenant_id = tenant_id_from(&headers)?;
    if req.job_id.is_empty() {
        return Err(GantryError::InvalidArgument("jobId is required".to_string()));
    }
    tracing::info!(job_id = %req.job_id, tenant_id = %tenant_id, "Received DeleteJob request");

    let job = service
        .store()
        .get_job(&tenant_id, &req.job_id)
        .await?
        .ok_or_else(|| GantryError::NotFound(format!("job not found: {}", req.job_id)))?;

    if let Some(path) = job.cloud_resource_path.as_deref() {
        service.provider.delete(path).await?;
        tracing::info!(job_id = %req.job_id, "Job deleted at the batch provider");
    }

    // Cascades to the job's transitions.
    service.store().delete_job(&tenant_id, &req.job_id).await?;

    service.stop_poller_for_job(&tenant_id, &req.job_id);

    tracing::info!(job_id = %req.job_id, "Job deleted");
    Ok(Json(DeleteJobResponse {
        job_id: req.job_id,
        message: "Job successfully deleted".to_string(),
    }))
}

async fn append_transition(
    service: &Arc<WorkerService>,
    tenant_id: &str,
    job_id: &str,
    from: Option<JobStatus>,
    to: JobStatus,
    note: &str,
) {
    let transition = JobStateTransition {
        tenant_id: tenant_id.to_string(),
        job_id: job_id.to_string(),
        transition_id: Uuid::new_v4().to_string(),
        from_status: from,
        to_status: to,
        transitioned_at: Utc::now(),
        note: Some(note.to_string()),
    };
    if let Err(e) = service.store().append_transition(&transition).await {
        tracing::error!(job_id = %job_id, error = %e, "Error recording state transition");
    }
}

/// Derive a provider-compatible job id from the optional human-friendly name.
///
/// The name is lowercased, runs of non-alphanumeric characters collapse to
/// single hyphens, leading/trailing hyphens are trimmed, and the result is
/// prefixed with a letter when needed. A short suffix derived from the
/// internal job id guarantees uniqueness; the total stays within the
/// provider's 63-character limit. An empty name falls back to
/// `gantry-{uuid[..8]}`.
fn derive_provider_job_id(name: &str, internal_job_id: &str) -> String {
    const MAX_LEN: usize = 63;

    let short_id: String = internal_job_id
        .chars()
        .filter(|c| *c != '-')
        .take(8)
        .collect::<String>()
        .to_lowercase();

    if name.is_empty() {
        return format!("gantry-{short_id}");
    }

    let mut sanitized = String::new();
    let mut prev_hyphen = false;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            sanitized.push(c);
            prev_hyphen = false;
        } else if !prev_hyphen && !sanitized.is_empty() {
            sanitized.push('-');
            prev_hyphen = true;
        }
    }
    let mut sanitized = sanitized.trim_end_matches('-').to_string();

    if !sanitized.starts_with(|c: char| c.is_ascii_lowercase()) {
        sanitized.insert(0, 'g');
    }

    let suffix = format!("-{short_id}");
    let max_name_len = MAX_LEN - suffix.len();
    if sanitized.len() > max_name_len {
        sanitized.truncate(max_name_len);
        sanitized = sanitized.trim_end_matches('-').to_string();
    }

    format!("{sanitized}{suffix}")
}

fn opt_string(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

fn opt_i64(v: i64) -> Option<i64> {
    if v == 0 {
        None
    } else {
        Some(v)
    }
}
