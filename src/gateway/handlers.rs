use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::api::{
    CancelJobRequest, CancelJobResponse, DeleteJobRequest, DeleteJobResponse,
    GetCurrentTenantResponse, GetJobRequest, GetJobResponse, JobView, ListJobsResponse,
    SubmitJobRequest, SubmitJobResponse,
};
use crate::classifier::evaluate_job_complexity;
use crate::error::{GantryError, Result};
use crate::gateway::GatewayService;
use crate::model::Tenant;

/// External identity carried on the OAuth headers.
struct OAuthUser {
    email: String,
    user_id: String,
    provider: String,
}

pub async fn health() -> &'static str {
    "OK"
}

fn extract_oauth_user(headers: &HeaderMap) -> Result<OAuthUser> {
    let header = |name: &str| -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    match (
        header("X-OAuth-Email"),
        header("X-OAuth-UserId"),
        header("X-OAuth-Provider"),
    ) {
        (Some(email), Some(user_id), Some(provider)) => Ok(OAuthUser {
            email,
            user_id,
            provider,
        }),
        _ => Err(GantryError::Unauthenticated(
            "missing or invalid OAuth headers".to_string(),
        )),
    }
}

/// Resolve the tenant for the request's external identity, creating it on
/// first sight.
async fn resolve_tenant(service: &GatewayService, headers: &HeaderMap) -> Result<String> {
    let user = extract_oauth_user(headers)?;

    if let Some(tenant) = service
        .store()
        .find_tenant_by_identity(&user.provider, &user.user_id)
        .await?
    {
        return Ok(tenant.tenant_id);
    }

    let now = Utc::now();
    let tenant = Tenant {
        tenant_id: Uuid::new_v4().to_string(),
        user_email: user.email,
        oauth_provider: user.provider.clone(),
        oauth_user_id: user.user_id.clone(),
        created_at: now,
        updated_at: now,
    };

    match service.store().insert_tenant(&tenant).await {
        Ok(()) => {
            tracing::info!(tenant_id = %tenant.tenant_id, "Created tenant on first authenticated request");
            Ok(tenant.tenant_id)
        }
        // A concurrent first request may have created the tenant between the
        // lookup and the insert; the unique identity index makes the retry
        // read authoritative.
        Err(insert_err) => service
            .store()
            .find_tenant_by_identity(&user.provider, &user.user_id)
            .await?
            .map(|t| t.tenant_id)
            .ok_or(insert_err),
    }
}

pub async fn get_current_tenant(
    State(service): State<Arc<GatewayService>>,
    headers: HeaderMap,
) -> Result<Json<GetCurrentTenantResponse>> {
    let tenant_id = resolve_tenant(&service, &headers).await?;

    let tenant = service
        .store()
        .get_tenant(&tenant_id)
        .await?
        .ok_or_else(|| GantryError::Internal(format!("tenant vanished: {tenant_id}")))?;

    Ok(Json(GetCurrentTenantResponse::from(&tenant)))
}

pub async fn submit_job(
    State(service): State<Arc<GatewayService>>,
    headers: HeaderMap,
    Json(mut req): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>> {
    tracing::info!("Received job submission");

    let tenant_id = resolve_tenant(&service, &headers).await?;

    if req.image_uri.is_empty() {
        return Err(GantryError::InvalidArgument(
            "imageUri is required".to_string(),
        ));
    }

    // The gateway always mints the internal job id; it doubles as the
    // routing key so load spreads independently of tenant.
    let job_id = Uuid::new_v4().to_string();
    let worker_ip = service.worker_for(&job_id)?;

    let overrides = req.resource_override.unwrap_or_default();
    let decision = evaluate_job_complexity(&req.machine_type, &overrides);
    tracing::info!(
        job_id = %job_id,
        worker = %worker_ip,
        complexity = %decision.complexity,
        service = %decision.assigned_service,
        reason = %decision.reason,
        "Routing decision"
    );

    req.job_id = job_id;
    let mut response: SubmitJobResponse = service
        .forward(&worker_ip, "/SubmitJob", &tenant_id, &req)
        .await?;

    response.worker_assigned = worker_ip;
    response.complexity_level = decision.complexity.to_string();
    response.assigned_service = decision.assigned_service.to_string();
    response.routing_reason = decision.reason;

    tracing::info!(
        job_id = %response.job_id,
        status = %response.status,
        worker = %response.worker_assigned,
        "Job submitted"
    );
    Ok(Json(response))
}

/// Listing is a pure read, so it bypasses the workers entirely.
pub async fn list_jobs(
    State(service): State<Arc<GatewayService>>,
    headers: HeaderMap,
) -> Result<Json<ListJobsResponse>> {
    let tenant_id = resolve_tenant(&service, &headers).await?;

    let jobs = service.store().list_jobs(&tenant_id).await?;
    tracing::info!(tenant_id = %tenant_id, count = jobs.len(), "Listed jobs from store");

    Ok(Json(ListJobsResponse {
        jobs: jobs.iter().map(JobView::from).collect(),
    }))
}

pub async fn get_job(
    State(service): State<Arc<GatewayService>>,
    headers: HeaderMap,
    Json(req): Json<GetJobRequest>,
) -> Result<Json<GetJobResponse>> {
    if req.job_id.is_empty() {
        return Err(GantryError::InvalidArgument("jobId is required".to_string()));
    }
    let tenant_id = resolve_tenant(&service, &headers).await?;

    let worker_ip = service.worker_for(&req.job_id)?;
    let response: GetJobResponse = service
        .forward(&worker_ip, "/GetJob", &tenant_id, &req)
        .await?;
    Ok(Json(response))
}

pub async fn cancel_job(
    State(service): State<Arc<GatewayService>>,
    headers: HeaderMap,
    Json(req): Json<CancelJobRequest>,
) -> Result<Json<CancelJobResponse>> {
    if req.job_id.is_empty() {
        return Err(GantryError::InvalidArgument("jobId is required".to_string()));
    }
    let tenant_id = resolve_tenant(&service, &headers).await?;

    let worker_ip = service.worker_for(&req.job_id)?;
    let response: CancelJobResponse = service
        .forward(&worker_ip, "/CancelJob", &tenant_id, &req)
        .await?;

    tracing::info!(job_id = %req.job_id, tenant_id = %tenant_id, worker = %worker_ip, "Job cancelled");
    Ok(Json(response))
}

pub async fn delete_job(
    State(service): State<Arc<GatewayService>>,
    headers: HeaderMap,
    Json(req): Json<DeleteJobRequest>,
) -> Result<Json<DeleteJobResponse>> {
    if req.job_id.is_empty() {
        return Err(GantryError::InvalidArgument("jobId is required".to_string()));
    }
    let tenant_id = resolve_tenant(&service, &headers).await?;

    let worker_ip = service.worker_for(&req.job_id)?;
    let response: DeleteJobResponse = service
        .forward(&worker_ip, "/DeleteJob", &tenant_id, &req)
        .await?;

    tracing::info!(job_id = %req.job_id, tenant_id = %tenant_id, worker = %worker_ip, "Job deleted");
    Ok(Json(response))
}
