//! Worker RPC tests: submission through poller completion, cancellation,
//! deletion, and validation failures.


use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use gantry::config::JobConfigFile;
use gantry::model::JobStatus;
use gantry::provider::Provider;
use gantry::store::StateStore;
use gantry::worker::{self, WorkerService};

use test_harness::{
    assert_eventually, seed_tenant, test_store, test_worker, worker_request, SimBatchProvider,
    TEST_CLAIM_INTERVAL, TEST_LEASE_TTL,
};

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_submit_happy_path_to_completion() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let provider =
        SimBatchProvider::with_script(JobStatus::Running, vec![JobStatus::Running, JobStatus::Completed]);
    let service = test_worker(store.clone(), provider.clone(), "w1");
    let app = worker::router(service.clone());

    let response = app
        .clone()
        .oneshot(worker_request(
            "/SubmitJob",
            "t1",
            json!({ "imageUri": "img:1", "commands": ["echo", "hi"] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let job_id = body["jobId"].as_str().unwrap().to_string();
    assert_eq!(body["status"], "RUNNING");

    // The row carries the cloud path and a self-lease for this worker.
    let job = store.get_job("t1", &job_id).await.unwrap().unwrap();
    assert!(job.cloud_resource_path.as_deref().unwrap().starts_with("sim/jobs/gantry-"));
    assert_eq!(job.lease.owner_worker_id.as_deref(), Some("w1"));
    assert_eq!(job.lease.preferred_worker_id.as_deref(), Some("w1"));

    // The poller drives the job to COMPLETED and then exits.
    let store_for_wait = store.clone();
    let job_for_wait = job_id.clone();
    assert_eventually(
        || {
            let store = store_for_wait.clone();
            let job_id = job_for_wait.clone();
            async move {
                store.get_job("t1", &job_id).await.unwrap().unwrap().status
                    == JobStatus::Completed
            }
        },
        Duration::from_secs(3),
        "job should reach COMPLETED",
    )
    .await;

    let service_for_wait = service.clone();
    assert_eventually(
        || {
            let service = service_for_wait.clone();
            async move { service.active_poller_count() == 0 }
        },
        Duration::from_secs(2),
        "poller should unregister after the terminal state",
    )
    .await;

    // Audit trail: created, submitted, observed-completed.
    let transitions = store.list_transitions("t1", &job_id).await.unwrap();
    let pairs: Vec<(Option<JobStatus>, JobStatus)> = transitions
        .iter()
        .map(|t| (t.from_status, t.to_status))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (None, JobStatus::Pending),
            (Some(JobStatus::Pending), JobStatus::Running),
            (Some(JobStatus::Running), JobStatus::Completed),
        ]
    );
    assert_eq!(
        transitions[2].note.as_deref(),
        Some("status observed from provider")
    );

    let job = store.get_job("t1", &job_id).await.unwrap().unwrap();
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn test_submit_observes_scheduled_then_running() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let provider = SimBatchProvider::with_script(
        JobStatus::Pending,
        vec![
            JobStatus::Scheduled,
            JobStatus::Running,
            JobStatus::Completed,
        ],
    );
    let service = test_worker(store.clone(), provider, "w1");
    let app = worker::router(service);

    let response = app
        .oneshot(worker_request("/SubmitJob", "t1", json!({ "imageUri": "img:1" })))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "PENDING");
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let store_for_wait = store.clone();
    let job_for_wait = job_id.clone();
    assert_eventually(
        || {
            let store = store_for_wait.clone();
            let job_id = job_for_wait.clone();
            async move {
                store.get_job("t1", &job_id).await.unwrap().unwrap().status
                    == JobStatus::Completed
            }
        },
        Duration::from_secs(3),
        "job should complete",
    )
    .await;

    // The full observed path is a valid walk of the state machine.
    let transitions = store.list_transitions("t1", &job_id).await.unwrap();
    let tos: Vec<JobStatus> = transitions.iter().map(|t| t.to_status).collect();
    assert_eq!(
        tos,
        vec![
            JobStatus::Pending,
            JobStatus::Scheduled,
            JobStatus::Running,
            JobStatus::Completed,
        ]
    );

    let job = store.get_job("t1", &job_id).await.unwrap().unwrap();
    assert!(job.scheduled_at.is_some());
    assert!(job.started_at.is_some());
}

#[tokio::test]
async fn test_submit_defaults_unknown_initial_status_to_running() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let provider = SimBatchProvider::with_script(JobStatus::Unknown, vec![JobStatus::Running]);
    let service = test_worker(store.clone(), provider, "w1");
    let app = worker::router(service);

    let response = app
        .oneshot(worker_request("/SubmitJob", "t1", json!({ "imageUri": "img:1" })))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "RUNNING");
}

#[tokio::test]
async fn test_submit_requires_tenant_header() {
    let (store, _dir) = test_store().await;
    let service = test_worker(store, SimBatchProvider::new(), "w1");
    let app = worker::router(service);

    let request = Request::builder()
        .method("POST")
        .uri("/SubmitJob")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "imageUri": "img:1" }).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_requires_image_uri() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let service = test_worker(store, SimBatchProvider::new(), "w1");
    let app = worker::router(service);

    let response = app
        .oneshot(worker_request("/SubmitJob", "t1", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_rejects_undersized_boot_disk() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let service = test_worker(store, SimBatchProvider::new(), "w1");
    let app = worker::router(service);

    let response = app
        .oneshot(worker_request(
            "/SubmitJob",
            "t1",
            json!({ "imageUri": "img:1", "bootDiskSizeGb": 5 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_provider_failure_marks_job_failed() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let provider = SimBatchProvider::new();
    provider.fail_submits("quota exceeded");
    let service = test_worker(store.clone(), provider, "w1");
    let app = worker::router(service.clone());

    let response = app
        .oneshot(worker_request(
            "/SubmitJob",
            "t1",
            json!({ "imageUri": "img:1", "jobId": "fail-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let job = store.get_job("t1", "fail-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.as_deref().unwrap().contains("quota exceeded"));
    assert!(job.cloud_resource_path.is_none());
    assert_eq!(service.active_poller_count(), 0);

    let transitions = store.list_transitions("t1", "fail-1").await.unwrap();
    assert_eq!(transitions.last().unwrap().to_status, JobStatus::Failed);
}

#[tokio::test]
async fn test_resubmitting_same_job_id_creates_no_second_provider_job() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let provider = SimBatchProvider::new();
    let service = test_worker(store.clone(), provider.clone(), "w1");
    let app = worker::router(service);

    let body = json!({ "imageUri": "img:1", "jobId": "dup-1" });
    let first = app
        .clone()
        .oneshot(worker_request("/SubmitJob", "t1", body.clone()))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // The second insert collides on the primary key and fails before any
    // provider call; exactly one provider job exists.
    let second = app
        .oneshot(worker_request("/SubmitJob", "t1", body))
        .await
        .unwrap();
    assert_ne!(second.status(), StatusCode::OK);
    assert_eq!(provider.submit_count(), 1);
}

#[tokio::test]
async fn test_provider_submit_is_idempotent_on_request_id() {
    let provider = SimBatchProvider::new();
    let spec = gantry::provider::JobSpec {
        provider_job_id: "gantry-abc12345".to_string(),
        request_id: "same-request".to_string(),
        image_uri: "img:1".to_string(),
        ..Default::default()
    };

    let first = provider.submit(&spec).await.unwrap();
    let second = provider.submit(&spec).await.unwrap();
    assert_eq!(first.cloud_resource_path, second.cloud_resource_path);
    assert_eq!(provider.submit_count(), 1);
}

#[tokio::test]
async fn test_cancel_in_flight_job() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let provider = SimBatchProvider::new();
    let service = test_worker(store.clone(), provider.clone(), "w1");
    let app = worker::router(service.clone());

    let response = app
        .clone()
        .oneshot(worker_request(
            "/SubmitJob",
            "t1",
            json!({ "imageUri": "img:1", "jobId": "cancel-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(service.active_poller_count(), 1);

    let response = app
        .oneshot(worker_request("/CancelJob", "t1", json!({ "jobId": "cancel-1" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "CANCELLED");

    let job = store.get_job("t1", "cancel-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.completed_at.is_some());

    // The provider cancel ran against the job's cloud path.
    let path = job.cloud_resource_path.unwrap();
    assert!(provider.cancelled_paths().contains(&path));

    // Poller stopped; the transition is audited.
    assert_eq!(service.active_poller_count(), 0);
    let transitions = store.list_transitions("t1", "cancel-1").await.unwrap();
    let last = transitions.last().unwrap();
    assert_eq!(last.from_status, Some(JobStatus::Running));
    assert_eq!(last.to_status, JobStatus::Cancelled);
}

#[tokio::test]
async fn test_cancel_terminal_job_is_invalid() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let provider =
        SimBatchProvider::with_script(JobStatus::Running, vec![JobStatus::Completed]);
    let service = test_worker(store.clone(), provider, "w1");
    let app = worker::router(service);

    let response = app
        .clone()
        .oneshot(worker_request(
            "/SubmitJob",
            "t1",
            json!({ "imageUri": "img:1", "jobId": "done-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let store_for_wait = store.clone();
    assert_eventually(
        || {
            let store = store_for_wait.clone();
            async move {
                store.get_job("t1", "done-1").await.unwrap().unwrap().status
                    == JobStatus::Completed
            }
        },
        Duration::from_secs(3),
        "job should complete",
    )
    .await;

    let response = app
        .oneshot(worker_request("/CancelJob", "t1", json!({ "jobId": "done-1" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cancel_missing_job_is_not_found() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let service = test_worker(store, SimBatchProvider::new(), "w1");
    let app = worker::router(service);

    let response = app
        .oneshot(worker_request("/CancelJob", "t1", json!({ "jobId": "ghost" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_job_removes_row_and_provider_job() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let provider = SimBatchProvider::new();
    let service = test_worker(store.clone(), provider.clone(), "w1");
    let app = worker::router(service.clone());

    let response = app
        .clone()
        .oneshot(worker_request(
            "/SubmitJob",
            "t1",
            json!({ "imageUri": "img:1", "jobId": "del-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let path = store
        .get_job("t1", "del-1")
        .await
        .unwrap()
        .unwrap()
        .cloud_resource_path
        .unwrap();

    let response = app
        .clone()
        .oneshot(worker_request("/DeleteJob", "t1", json!({ "jobId": "del-1" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["message"], "Job successfully deleted");

    assert!(store.get_job("t1", "del-1").await.unwrap().is_none());
    assert!(store.list_transitions("t1", "del-1").await.unwrap().is_empty());
    assert!(provider.deleted_paths().contains(&path));
    assert_eq!(service.active_poller_count(), 0);

    // Deleting again: the row is gone.
    let response = app
        .oneshot(worker_request("/DeleteJob", "t1", json!({ "jobId": "del-1" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_job_and_list_jobs() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    seed_tenant(&store, "t2").await;
    let service = test_worker(store.clone(), SimBatchProvider::new(), "w1");
    let app = worker::router(service);

    for (tenant, job_id) in [("t1", "a"), ("t1", "b"), ("t2", "c")] {
        let response = app
            .clone()
            .oneshot(worker_request(
                "/SubmitJob",
                tenant,
                json!({ "imageUri": "img:1", "jobId": job_id }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .clone()
        .oneshot(worker_request("/GetJob", "t1", json!({ "jobId": "a" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["job"]["jobId"], "a");
    assert_eq!(body["job"]["tenantId"], "t1");

    // Listing never leaks another tenant's jobs.
    let response = app
        .oneshot(worker_request("/ListJobs", "t1", json!({})))
        .await
        .unwrap();
    let body = body_json(response).await;
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j["tenantId"] == "t1"));
}

#[tokio::test]
async fn test_poller_stops_after_failure_budget() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let provider = SimBatchProvider::new();
    let service = Arc::new(
        WorkerService::new(
            store.clone() as Arc<dyn StateStore>,
            provider.clone() as Arc<dyn Provider>,
            JobConfigFile::default(),
            "w1",
            TEST_LEASE_TTL,
            TEST_CLAIM_INTERVAL,
        )
        .with_polling(Duration::from_millis(25), 3),
    );
    let app = worker::router(service.clone());

    let response = app
        .oneshot(worker_request(
            "/SubmitJob",
            "t1",
            json!({ "imageUri": "img:1", "jobId": "flaky-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let path = store
        .get_job("t1", "flaky-1")
        .await
        .unwrap()
        .unwrap()
        .cloud_resource_path
        .unwrap();
    provider.fail_status_for(&path);

    // Three consecutive failures exhaust the budget; the poller exits and
    // leaves the job in its last-known state.
    let service_for_wait = service.clone();
    assert_eventually(
        || {
            let service = service_for_wait.clone();
            async move { service.active_poller_count() == 0 }
        },
        Duration::from_secs(2),
        "poller should stop after the failure budget",
    )
    .await;

    let job = store.get_job("t1", "flaky-1").await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
}

#[tokio::test]
async fn test_unknown_status_makes_no_transition() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let provider = SimBatchProvider::with_script(
        JobStatus::Running,
        vec![JobStatus::Unknown, JobStatus::Unknown, JobStatus::Completed],
    );
    let service = test_worker(store.clone(), provider, "w1");
    let app = worker::router(service);

    let response = app
        .oneshot(worker_request(
            "/SubmitJob",
            "t1",
            json!({ "imageUri": "img:1", "jobId": "unk-1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let store_for_wait = store.clone();
    assert_eventually(
        || {
            let store = store_for_wait.clone();
            async move {
                store.get_job("t1", "unk-1").await.unwrap().unwrap().status
                    == JobStatus::Completed
            }
        },
        Duration::from_secs(3),
        "job should complete after the UNKNOWN gap",
    )
    .await;

    // No transition record ever carries UNKNOWN.
    let transitions = store.list_transitions("t1", "unk-1").await.unwrap();
    assert!(transitions
        .iter()
        .all(|t| t.to_status != JobStatus::Unknown));
}

#[tokio::test]
async fn test_health_endpoint() {
    let (store, _dir) = test_store().await;
    let service = test_worker(store, SimBatchProvider::new(), "w1");
    let app = worker::router(service);

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

#[tokio::test]
async fn test_provider_job_id_is_derived_from_name() {
    let (store, _dir) = test_store().await;
    seed_tenant(&store, "t1").await;
    let service = test_worker(store.clone(), SimBatchProvider::new(), "w1");
    let app = worker::router(service);

    let response = app
        .oneshot(worker_request(
            "/SubmitJob",
            "t1",
            json!({
                "imageUri": "img:1",
                "jobId": "name-1",
                "name": "My Nightly Build!! #42"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let path = store
        .get_job("t1", "name-1")
        .await
        .unwrap()
        .unwrap()
        .cloud_resource_path
        .unwrap();
    // Sanitised name plus a short uniqueness suffix from the internal id.
    let provider_id = path.strip_prefix("sim/jobs/").unwrap();
    assert!(provider_id.starts_with("my-nightly-build-42-"));
    assert!(provider_id.len() <= 63);
    assert!(provider_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
}
