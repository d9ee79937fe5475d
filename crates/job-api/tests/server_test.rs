use axum::http::StatusCode;
use chrono::{DateTime, TimeZone, Utc};
use indexer_job_api::{
    config::Config,
    jobs::JobService,
    kubernetes::InMemoryOrchestrator,
    server::Server,
};
use k8s_openapi::api::batch::v1::JobStatus;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn fixed_clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn test_server(orchestrator: Arc<InMemoryOrchestrator>) -> axum_test::TestServer {
    let mut config = Config::default();
    config.kube.namespace = "search".to_string();
    config.kube.delete_poll_interval = Duration::from_millis(5);
    config.kube.delete_wait_timeout = Duration::from_secs(2);

    let jobs = Arc::new(JobService::new(orchestrator, &config).with_clock(fixed_clock));
    let app = Server::new(&config, jobs).build_router();
    axum_test::TestServer::new(app).unwrap()
}

#[tokio::test]
async fn test_health_endpoints() {
    let client = test_server(Arc::new(InMemoryOrchestrator::new()));

    let response = client.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");

    let response = client.get("/readiness").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "ready");
}

#[tokio::test]
async fn test_job_lifecycle() {
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let client = test_server(orchestrator.clone());

    // Create
    let response = client
        .post("/api/jobs")
        .json(&json!({
            "job_name": "nightly-reindex",
            "parallelism": 2,
            "env": { "BATCH_SIZE": 100 }
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["message"], "Job created successfully");
    assert_eq!(body["job_name"], "nightly-reindex");
    assert_eq!(body["namespace"], "search");
    assert_eq!(body["replaced_existing"], false);
    assert_eq!(body["configuration"]["parallelism"], 2);
    assert_eq!(body["configuration"]["completions"], 1);
    assert_eq!(body["configuration"]["backoff_limit"], 5);
    assert_eq!(body["configuration"]["active_deadline_seconds"], 3600);
    assert_eq!(body["configuration"]["ttl_seconds_after_finished"], 86400);
    assert_eq!(body["status_url"], "/api/jobs/nightly-reindex/status?namespace=search");
    assert!(body["created_at"].is_string());

    // Status while pods run
    orchestrator.set_job_status(
        "search",
        "nightly-reindex",
        JobStatus {
            active: Some(2),
            ..Default::default()
        },
    );
    orchestrator.add_job_pod(
        "search",
        "nightly-reindex",
        "nightly-reindex-x1",
        "Running",
        Some("node-a"),
        &[0],
    );
    orchestrator.set_pod_logs("search", "nightly-reindex-x1", "starting\nindexed 5 documents");

    let response = client.get("/api/jobs/nightly-reindex/status").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["name"], "nightly-reindex");
    assert_eq!(body["namespace"], "search");
    assert_eq!(body["status"], "Running");
    assert_eq!(body["metrics"]["active"], 2);
    assert_eq!(body["metrics"]["total_pods"], 1);
    assert_eq!(body["configuration"]["parallelism"], 2);
    assert_eq!(body["pods"][0]["name"], "nightly-reindex-x1");
    assert_eq!(body["pods"][0]["node"], "node-a");
    assert_eq!(body["pods"][0]["logs"], "starting\nindexed 5 documents");

    // List
    let response = client.get("/api/jobs").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["jobs"][0]["name"], "nightly-reindex");
    assert_eq!(body["jobs"][0]["status"], "Running");
    assert_eq!(body["jobs"][0]["labels"]["job-type"], "indexing");

    // Delete, then delete again
    let response = client.delete("/api/jobs/nightly-reindex").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["message"], "Job deleted successfully");
    assert_eq!(body["job_name"], "nightly-reindex");

    let response = client.delete("/api/jobs/nightly-reindex").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["job_name"], "nightly-reindex");

    let response = client.get("/api/jobs/nightly-reindex/status").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_validation() {
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let client = test_server(orchestrator.clone());

    let response = client.post("/api/jobs").json(&json!({ "parallelism": 0 })).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert!(body["message"].as_str().unwrap().contains("Parallelism"));

    let response = client.post("/api/jobs").json(&json!({ "completions": 1.5 })).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = client
        .post("/api/jobs")
        .json(&json!({ "env": { "NAMESPACE": "elsewhere" } }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = client
        .post("/api/jobs")
        .text("{not json")
        .content_type("application/json")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = client
        .post("/api/jobs")
        .json(&json!({ "job_type": "re index" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = client
        .get("/api/jobs")
        .add_query_param("job_type", "a,managed-by=x")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    assert_eq!(orchestrator.call_count(), 0);
}

#[tokio::test]
async fn test_status_url_reaches_jobs_outside_default_namespace() {
    let client = test_server(Arc::new(InMemoryOrchestrator::new()));

    let response = client
        .post("/api/jobs")
        .json(&json!({ "job_name": "x", "namespace": "team-a" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let created: serde_json::Value = response.json();
    let status_url = created["status_url"].as_str().unwrap().to_string();
    assert_eq!(status_url, "/api/jobs/x/status?namespace=team-a");

    let response = client.get(&status_url).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: serde_json::Value = response.json();
    assert_eq!(body["name"], "x");
    assert_eq!(body["namespace"], "team-a");

    let response = client
        .post("/api/jobs")
        .json(&json!({ "job_name": "x", "namespace": "team-a" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let conflict: serde_json::Value = response.json();
    assert_eq!(conflict["status_url"], status_url.as_str());
}

#[tokio::test]
async fn test_conflict_and_replace() {
    let orchestrator = Arc::new(InMemoryOrchestrator::new().with_deletion_lag(2));
    let client = test_server(orchestrator.clone());

    let response = client.post("/api/jobs").json(&json!({ "job_name": "reindex" })).await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let first: serde_json::Value = response.json();
    let original = orchestrator.job("search", "reindex").unwrap();

    let response = client
        .post("/api/jobs")
        .json(&json!({ "job_name": "reindex", "parallelism": 9 }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "Job already exists");
    assert_eq!(body["job_name"], "reindex");
    assert_eq!(body["current_status"], "Pending");
    assert_eq!(body["status_url"], "/api/jobs/reindex/status?namespace=search");
    assert_eq!(orchestrator.job("search", "reindex"), Some(original));

    let response = client
        .post("/api/jobs")
        .json(&json!({ "job_name": "reindex", "replace_existing": true }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let second: serde_json::Value = response.json();
    assert_eq!(second["replaced_existing"], true);

    let first_created: DateTime<Utc> = first["created_at"].as_str().unwrap().parse().unwrap();
    let second_created: DateTime<Utc> = second["created_at"].as_str().unwrap().parse().unwrap();
    assert!(second_created > first_created);
}

#[tokio::test]
async fn test_generated_names_collide_for_identical_bodies() {
    let client = test_server(Arc::new(InMemoryOrchestrator::new()));
    let body = json!({ "job_type": "indexing", "parallelism": 1 });

    let response = client.post("/api/jobs").json(&body).await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let created: serde_json::Value = response.json();
    let name = created["job_name"].as_str().unwrap().to_string();
    assert!(name.starts_with("indexing-job-1714564800-"));

    // Same body, same (fixed) second: same name, so the second submit conflicts.
    let response = client.post("/api/jobs").json(&body).await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let conflict: serde_json::Value = response.json();
    assert_eq!(conflict["job_name"], name.as_str());
}

#[tokio::test]
async fn test_list_filters() {
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let client = test_server(orchestrator.clone());

    for body in [
        json!({ "job_name": "done" }),
        json!({ "job_name": "broken", "backoff_limit": 2 }),
        json!({ "job_name": "embed", "job_type": "embedding" }),
    ] {
        let response = client.post("/api/jobs").json(&body).await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
    }
    orchestrator.set_job_status(
        "search",
        "done",
        JobStatus {
            succeeded: Some(1),
            active: Some(1),
            ..Default::default()
        },
    );
    orchestrator.set_job_status(
        "search",
        "broken",
        JobStatus {
            failed: Some(2),
            ..Default::default()
        },
    );

    let response = client
        .get("/api/jobs")
        .add_query_param("status", "completed")
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["jobs"][0]["name"], "done");
    assert_eq!(body["filters"]["status"], "completed");

    let response = client.get("/api/jobs").add_query_param("status", "FAILED").await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["jobs"][0]["name"], "broken");

    let response = client
        .get("/api/jobs")
        .add_query_param("job_type", "embedding")
        .await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["jobs"][0]["name"], "embed");
    assert_eq!(body["filters"]["job_type"], "embedding");
}

#[tokio::test]
async fn test_unknown_job_status_is_not_found() {
    let client = test_server(Arc::new(InMemoryOrchestrator::new()));

    let response = client.get("/api/jobs/ghost/status").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "Job not found");
    assert_eq!(body["job_name"], "ghost");
}

#[tokio::test]
async fn test_completed_job_status() {
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let client = test_server(orchestrator.clone());
    client
        .post("/api/jobs")
        .json(&json!({ "job_name": "once", "backoff_limit": 5 }))
        .await;

    orchestrator.set_job_status(
        "search",
        "once",
        JobStatus {
            succeeded: Some(1),
            failed: Some(0),
            active: Some(0),
            ..Default::default()
        },
    );

    let response = client.get("/api/jobs/once/status").await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "Completed");
    assert!(body["duration_seconds"].is_null());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let client = test_server(Arc::new(InMemoryOrchestrator::new()));
    client.get("/api/jobs/missing/status").await;

    let response = client.get("/metrics").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    assert!(response.text().contains("indexer_job_api_operations_total"));
}
