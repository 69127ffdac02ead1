//! Gateway tier: authentication, tenant resolution, classification, routing.
//!
//! The gateway is stateless. It authenticates each request from the OAuth
//! identity headers, resolves (or creates) the tenant, classifies
//! submissions, picks a worker on the consistent-hash ring, and forwards the
//! RPC with the resolved `X-Tenant-Id`. Read-only listing is served straight
//! from the store; there is no worker hop for it.

pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::api::ErrorResponse;
use crate::error::{GantryError, Result};
use crate::hashing::HashRouter;
use crate::store::StateStore;

/// Per-call deadline for gateway → worker RPCs.
const WORKER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct GatewayService {
    store: Arc<dyn StateStore>,
    router: HashRouter,
    /// One shared client for all workers; reqwest clients are safe for
    /// concurrent use.
    http: reqwest::Client,
    worker_port: u16,
}

impl GatewayService {
    pub fn new(
        store: Arc<dyn StateStore>,
        worker_ips: Vec<String>,
        worker_port: u16,
    ) -> Result<Self> {
        let router = HashRouter::new(worker_ips);
        let http = reqwest::Client::builder()
            .timeout(WORKER_CALL_TIMEOUT)
            .build()
            .map_err(GantryError::Upstream)?;

        Ok(Self {
            store,
            router,
            http,
            worker_port,
        })
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// The worker responsible for a routing key.
    pub(crate) fn worker_for(&self, routing_key: &str) -> Result<String> {
        self.router
            .worker_for(routing_key)
            .map(str::to_string)
            .ok_or_else(|| {
                GantryError::Internal("no worker found for routing key".to_string())
            })
    }

    /// Forward an RPC to a worker, carrying the resolved tenant id. Worker
    /// error responses keep their kind (invalid argument / not found) so the
    /// caller sees the same status the worker produced.
    pub(crate) async fn forward<Req, Resp>(
        &self,
        worker_ip: &str,
        path: &str,
        tenant_id: &str,
        body: &Req,
    ) -> Result<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("http://{}:{}{}", worker_ip, self.worker_port, path);

        let response = self
            .http
            .post(&url)
            .header("X-Tenant-Id", tenant_id)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| format!("worker returned {status}"));
        tracing::error!(worker = %worker_ip, path, status = %status, error = %message, "Worker call failed");

        Err(match status.as_u16() {
            400 => GantryError::InvalidArgument(message),
            404 => GantryError::NotFound(message),
            _ => GantryError::Internal(format!("worker failed: {message}")),
        })
    }
}

/// Build the gateway router with the CORS preflight allow-list.
pub fn router(service: Arc<GatewayService>, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            "x-oauth-email".parse().expect("valid header name"),
            "x-oauth-userid".parse().expect("valid header name"),
            "x-oauth-provider".parse().expect("valid header name"),
        ])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/SubmitJob", post(handlers::submit_job))
        .route("/ListJobs", post(handlers::list_jobs))
        .route("/GetJob", post(handlers::get_job))
        .route("/CancelJob", post(handlers::cancel_job))
        .route("/DeleteJob", post(handlers::delete_job))
        .route("/GetCurrentTenant", post(handlers::get_current_tenant))
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(service)
}

/// Serve the gateway until the shutdown token fires.
pub async fn serve(
    service: Arc<GatewayService>,
    allowed_origins: &[String],
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(service, allowed_origins);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| GantryError::Internal(format!("failed to bind {addr}: {e}")))?;

    tracing::info!(addr = %addr, "Gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| GantryError::Internal(format!("gateway server failed: {e}")))?;

    Ok(())
}
