//! Gateway tests: authentication, tenant resolution, routing decoration,
//! and direct-store listing.


use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use gantry::gateway::{self, GatewayService};
use gantry::model::JobStatus;
use gantry::store::{SqliteStore, StateStore};

use test_harness::{
    gateway_request, seed_tenant, spawn_worker_server, test_store, test_worker, SimBatchProvider,
};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Gateway wired to one real worker server on an ephemeral port.
async fn gateway_with_worker(
    store: Arc<SqliteStore>,
    provider: Arc<SimBatchProvider>,
) -> axum::Router {
    let worker_service = test_worker(store.clone(), provider, "w1");
    let (addr, _handle) = spawn_worker_server(worker_service).await;

    let service = Arc::new(
        GatewayService::new(
            store as Arc<dyn StateStore>,
            vec!["127.0.0.1".to_string()],
            addr.port(),
        )
        .unwrap(),
    );
    gateway::router(service, &[])
}

/// Gateway whose worker set points nowhere; store reads must still work.
fn gateway_without_worker(store: Arc<SqliteStore>) -> axum::Router {
    let service = Arc::new(
        GatewayService::new(
            store as Arc<dyn StateStore>,
            vec!["203.0.113.1".to_string()],
            1,
        )
        .unwrap(),
    );
    gateway::router(service, &[])
}

#[tokio::test]
async fn test_missing_oauth_headers_is_unauthenticated() {
    let (store, _dir) = test_store().await;
    let app = gateway_without_worker(store);

    for path in ["/SubmitJob", "/ListJobs", "/GetCurrentTenant"] {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(json!({ "imageUri": "img:1" }).to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{path}");
    }
}

#[tokio::test]
async fn test_partial_oauth_headers_are_rejected() {
    let (store, _dir) = test_store().await;
    let app = gateway_without_worker(store);

    let request = Request::builder()
        .method("POST")
        .uri("/GetCurrentTenant")
        .header("content-type", "application/json")
        .header("X-OAuth-Email", "dev@example.com")
        .header("X-OAuth-Provider", "google")
        .body(Body::from("{}"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tenant_created_on_first_request_and_reused() {
    let (store, _dir) = test_store().await;
    let app = gateway_without_worker(store.clone());

    let response = app
        .clone()
        .oneshot(gateway_request("/GetCurrentTenant", "dev@example.com", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;
    assert_eq!(first["userEmail"], "dev@example.com");
    assert_eq!(first["oauthProvider"], "google");
    let tenant_id = first["tenantId"].as_str().unwrap().to_string();

    // Same identity resolves to the same tenant, not a new one.
    let response = app
        .oneshot(gateway_request("/GetCurrentTenant", "dev@example.com", json!({})))
        .await
        .unwrap();
    let second = body_json(response).await;
    assert_eq!(second["tenantId"], tenant_id.as_str());

    assert_eq!(store.list_tenants().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_submit_forwards_and_decorates_response() {
    let (store, _dir) = test_store().await;
    let provider = SimBatchProvider::new();
    let app = gateway_with_worker(store.clone(), provider).await;

    let response = app
        .oneshot(gateway_request(
            "/SubmitJob",
            "dev@example.com",
            json!({ "imageUri": "img:1", "commands": ["echo"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    assert_eq!(body["status"], "RUNNING");
    assert_eq!(body["workerAssigned"], "127.0.0.1");
    assert_eq!(body["complexityLevel"], "SIMPLE");
    assert_eq!(body["assignedService"], "LIGHT");
    assert!(!body["routingReason"].as_str().unwrap().is_empty());

    // The worker persisted the job under the resolved tenant with the
    // gateway-minted id.
    let job_id = body["jobId"].as_str().unwrap();
    let tenant = store
        .find_tenant_by_identity("google", "uid-dev@example.com")
        .await
        .unwrap()
        .expect("tenant created");
    let job = store.get_job(&tenant.tenant_id, job_id).await.unwrap();
    assert!(job.is_some());
}

#[tokio::test]
async fn test_submit_with_machine_type_classifies_heavy() {
    let (store, _dir) = test_store().await;
    let provider = SimBatchProvider::new();
    let app = gateway_with_worker(store, provider).await;

    let response = app
        .oneshot(gateway_request(
            "/SubmitJob",
            "dev@example.com",
            json!({ "imageUri": "img:1", "machineType": "e2-standard-4" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["complexityLevel"], "COMPLEX");
    assert_eq!(body["assignedService"], "HEAVY");
    assert!(body["routingReason"]
        .as_str()
        .unwrap()
        .contains("e2-standard-4"));
}

#[tokio::test]
async fn test_submit_requires_image_uri() {
    let (store, _dir) = test_store().await;
    let app = gateway_without_worker(store);

    let response = app
        .oneshot(gateway_request("/SubmitJob", "dev@example.com", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_jobs_reads_store_without_worker_hop() {
    let (store, _dir) = test_store().await;
    // The worker set is unreachable; listing must still succeed because the
    // gateway reads the store directly.
    let app = gateway_without_worker(store.clone());

    // Resolve the tenant first so we can seed jobs under it.
    let response = app
        .clone()
        .oneshot(gateway_request("/GetCurrentTenant", "dev@example.com", json!({})))
        .await
        .unwrap();
    let tenant_id = body_json(response).await["tenantId"]
        .as_str()
        .unwrap()
        .to_string();

    let provider = SimBatchProvider::new();
    let worker_service = test_worker(store.clone(), provider, "w1");
    for job_id in ["l1", "l2"] {
        let response = gantry::worker::router(worker_service.clone())
            .oneshot(test_harness::worker_request(
                "/SubmitJob",
                &tenant_id,
                json!({ "imageUri": "img:1", "jobId": job_id }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    worker_service.stop_all_pollers();

    let response = app
        .oneshot(gateway_request("/ListJobs", "dev@example.com", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j["tenantId"] == tenant_id.as_str()));
}

#[tokio::test]
async fn test_list_jobs_is_tenant_scoped() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "other-tenant").await;

    // Seed a job for a different tenant directly.
    let provider = SimBatchProvider::new();
    let worker_service = test_worker(store.clone(), provider, "w1");
    let response = gantry::worker::router(worker_service.clone())
        .oneshot(test_harness::worker_request(
            "/SubmitJob",
            "other-tenant",
            json!({ "imageUri": "img:1", "jobId": "foreign" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    worker_service.stop_all_pollers();

    let app = gateway_without_worker(store);
    let response = app
        .oneshot(gateway_request("/ListJobs", "dev@example.com", json!({})))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert!(body["jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancel_unknown_job_propagates_not_found() {
    let (store, _dir) = test_store().await;
    let provider = SimBatchProvider::new();
    let app = gateway_with_worker(store, provider).await;

    let response = app
        .oneshot(gateway_request(
            "/CancelJob",
            "dev@example.com",
            json!({ "jobId": "ghost" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_through_gateway() {
    let (store, _dir) = test_store().await;
    let provider = SimBatchProvider::new();
    let app = gateway_with_worker(store.clone(), provider).await;

    let response = app
        .clone()
        .oneshot(gateway_request(
            "/SubmitJob",
            "dev@example.com",
            json!({ "imageUri": "img:1" }),
        ))
        .await
        .unwrap();
    let job_id = body_json(response).await["jobId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .oneshot(gateway_request(
            "/CancelJob",
            "dev@example.com",
            json!({ "jobId": job_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "CANCELLED");

    let tenant = store
        .find_tenant_by_identity("google", "uid-dev@example.com")
        .await
        .unwrap()
        .unwrap();
    let job = store
        .get_job(&tenant.tenant_id, &job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_get_job_through_gateway() {
    let (store, _dir) = test_store().await;
    let provider = SimBatchProvider::new();
    let app = gateway_with_worker(store, provider).await;

    let response = app
        .clone()
        .oneshot(gateway_request(
            "/SubmitJob",
            "dev@example.com",
            json!({ "imageUri": "img:1", "name": "probe" }),
        ))
        .await
        .unwrap();
    let job_id = body_json(response).await["jobId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .oneshot(gateway_request(
            "/GetJob",
            "dev@example.com",
            json!({ "jobId": job_id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["job"]["jobId"], job_id.as_str());
    assert_eq!(body["job"]["name"], "probe");
    assert_eq!(body["job"]["imageUri"], "img:1");
}

#[tokio::test]
async fn test_empty_job_id_is_invalid() {
    let (store, _dir) = test_store().await;
    let app = gateway_without_worker(store);

    for path in ["/GetJob", "/CancelJob", "/DeleteJob"] {
        let response = app
            .clone()
            .oneshot(gateway_request(path, "dev@example.com", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{path}");
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let (store, _dir) = test_store().await;
    let app = gateway_without_worker(store);

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK");
}
