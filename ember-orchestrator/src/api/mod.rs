//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific concern.

pub mod error;
pub mod health;
pub mod job;
pub mod queue;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::backend::DistributedBackend;
use crate::service::{Dispatcher, StatusQuery};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub status: StatusQuery,
    /// Set only when the distributed backend is active
    pub queue: Option<Arc<DistributedBackend>>,
    pub service_name: Arc<str>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Job endpoints
        .route("/submit", post(job::submit_job))
        .route("/status/{job_id}", get(job::get_status))
        .route("/jobs", get(job::list_jobs))
        // Runner endpoints
        .route("/queue/lease", post(queue::lease_delivery))
        .route(
            "/queue/{delivery_id}/complete",
            post(queue::complete_delivery),
        )
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{Broken, Gated, Upper};
    use crate::backend::{
        AdmissionPolicy, BackendSettings, ExecutionBackend, QueueSettings, WorkerPoolBackend,
    };
    use crate::repository::{InMemoryBroker, JobStore};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use ember_core::Worker;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct TestApp {
        router: Router,
        store: Arc<JobStore>,
    }

    fn pool_app(worker: Arc<dyn Worker>, slots: usize, queue_depth: usize) -> TestApp {
        let store = Arc::new(JobStore::new());
        let backend = WorkerPoolBackend::spawn(
            Arc::clone(&store),
            worker,
            BackendSettings {
                slots,
                queue_depth,
                admission: AdmissionPolicy::Reject,
                job_timeout: Duration::from_secs(5),
            },
        );
        app(store, Arc::new(backend), None)
    }

    fn queue_app() -> (TestApp, Arc<DistributedBackend>) {
        let store = Arc::new(JobStore::new());
        let backend = Arc::new(DistributedBackend::new(
            Arc::clone(&store),
            Arc::new(InMemoryBroker::new()),
            QueueSettings {
                visibility_timeout: Duration::from_secs(30),
                max_attempts: 3,
                max_backlog: 100,
                job_timeout: Duration::from_secs(60),
            },
        ));
        let app = app(
            store,
            Arc::clone(&backend) as Arc<dyn ExecutionBackend>,
            Some(Arc::clone(&backend)),
        );
        (app, backend)
    }

    fn app(
        store: Arc<JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        queue: Option<Arc<DistributedBackend>>,
    ) -> TestApp {
        let state = AppState {
            dispatcher: Arc::new(Dispatcher::new(Arc::clone(&store), backend, 1000)),
            status: StatusQuery::new(Arc::clone(&store)),
            queue,
            service_name: Arc::from("ember-test"),
        };
        TestApp {
            router: create_router(state),
            store,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn poll_until_terminal(router: &Router, job_id: &str) -> Value {
        for _ in 0..500 {
            let (status, body) = send(router, get(&format!("/status/{}", job_id))).await;
            assert_eq!(status, StatusCode::OK);
            if body["status"] == "completed" || body["status"] == "failed" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} never finished", job_id);
    }

    #[tokio::test]
    async fn test_submit_then_poll_to_completion() {
        let app = pool_app(Arc::new(Upper), 2, 4);

        let (status, body) = send(&app.router, post_json("/submit", json!({"input": "hello"}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id = body["job_id"].as_str().unwrap().to_string();
        assert!(body["status"] == "pending" || body["status"] == "processing");

        let body = poll_until_terminal(&app.router, &job_id).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["result"], "HELLO");
        assert!(body.get("error").is_none());
        assert!(body["completed_at"].is_string());
        assert!(body["created_at"].is_string());
    }

    #[tokio::test]
    async fn test_submit_accepts_text_alias() {
        let app = pool_app(Arc::new(Upper), 1, 1);

        let (status, body) = send(
            &app.router,
            post_json("/submit", json!({"text": "bonjour", "target_language": "en"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let job_id: Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
        let job = app.store.get(job_id).unwrap();
        assert_eq!(job.payload.input, "bonjour");
        assert_eq!(job.payload.parameter_str("target_language"), Some("en"));
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected_without_a_record() {
        let app = pool_app(Arc::new(Upper), 1, 1);

        let (status, body) = send(&app.router, post_json("/submit", json!({"input": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("empty"));

        let (status, _) = send(&app.router, post_json("/submit", json!({"style": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(app.store.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = pool_app(Arc::new(Upper), 1, 1);

        let request = Request::post("/submit")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = send(&app.router, post_json("/submit", json!(["hello"]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(app.store.is_empty());
    }

    #[tokio::test]
    async fn test_failing_worker_reports_error() {
        let app = pool_app(Arc::new(Broken), 1, 1);

        let (_, body) = send(&app.router, post_json("/submit", json!({"input": "hello"}))).await;
        let body = poll_until_terminal(&app.router, body["job_id"].as_str().unwrap()).await;

        assert_eq!(body["status"], "failed");
        assert_eq!(body["error"], "model exploded");
        assert!(body.get("result").is_none());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_ids_are_not_found() {
        let app = pool_app(Arc::new(Upper), 1, 1);

        let (status, body) =
            send(&app.router, get(&format!("/status/{}", Uuid::new_v4()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Job not found"}));

        let (status, body) = send(&app.router, get("/status/not-a-uuid")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"error": "Job not found"}));
    }

    #[tokio::test]
    async fn test_capacity_exhausted_returns_503() {
        let (worker, gate) = Gated::new();
        let app = pool_app(Arc::new(worker), 1, 0);

        let (first, _) = send(&app.router, post_json("/submit", json!({"input": "a"}))).await;
        let (second, body) = send(&app.router, post_json("/submit", json!({"input": "b"}))).await;

        assert_eq!(first, StatusCode::ACCEPTED);
        assert_eq!(second, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["error"].is_string());
        assert_eq!(app.store.len(), 1);

        gate.send(()).unwrap();
    }

    #[tokio::test]
    async fn test_health_reports_backend() {
        let app = pool_app(Arc::new(Upper), 1, 1);

        let (status, body) = send(&app.router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "ember-test");
        assert_eq!(body["backend"], "pool");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_list_jobs_filters_by_status() {
        let app = pool_app(Arc::new(Upper), 1, 4);
        let (_, body) = send(&app.router, post_json("/submit", json!({"input": "a"}))).await;
        poll_until_terminal(&app.router, body["job_id"].as_str().unwrap()).await;

        let (status, body) = send(&app.router, get("/jobs?status=completed")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, body) = send(&app.router, get("/jobs?status=pending")).await;
        assert!(body.as_array().unwrap().is_empty());

        let (status, _) = send(&app.router, get("/jobs?status=bogus")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_queue_endpoints_require_distributed_backend() {
        let app = pool_app(Arc::new(Upper), 1, 1);

        let (status, _) = send(
            &app.router,
            post_json("/queue/lease", json!({"runner_id": "r1"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_runner_round_trip_over_http() {
        let (app, _backend) = queue_app();

        let (_, body) = send(&app.router, post_json("/submit", json!({"input": "hello"}))).await;
        let job_id = body["job_id"].as_str().unwrap().to_string();

        let (status, delivery) = send(
            &app.router,
            post_json("/queue/lease", json!({"runner_id": "r1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(delivery["job_id"], job_id.as_str());
        assert_eq!(delivery["payload"]["input"], "hello");
        assert_eq!(delivery["attempt"], 1);

        let (status, _) = send(
            &app.router,
            post_json("/queue/lease", json!({"runner_id": "r2"})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let uri = format!(
            "/queue/{}/complete",
            delivery["delivery_id"].as_str().unwrap()
        );
        let report = json!({
            "job_id": job_id,
            "outcome": {"status": "completed", "result": "HELLO"}
        });
        let (status, _) = send(&app.router, post_json(&uri, report)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // duplicate report is acknowledged but changes nothing
        let duplicate = json!({
            "job_id": job_id,
            "outcome": {"status": "failed", "error": "late"}
        });
        let (status, _) = send(&app.router, post_json(&uri, duplicate)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, body) = send(&app.router, get(&format!("/status/{}", job_id))).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["result"], "HELLO");
    }

    #[tokio::test]
    async fn test_queue_endpoints_reject_malformed_bodies_as_json() {
        let (app, _backend) = queue_app();

        let request = Request::post("/queue/lease")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"runner\": 1}"))
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let uri = format!("/queue/{}/complete", Uuid::new_v4());
        let (status, body) = send(&app.router, post_json(&uri, json!({"job_id": "nope"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let report = json!({
            "job_id": Uuid::new_v4(),
            "outcome": {"status": "completed", "result": "x"}
        });
        let (status, body) = send(&app.router, post_json("/queue/not-a-uuid/complete", report)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_complete_with_wrong_job_is_rejected() {
        let (app, _backend) = queue_app();

        let (_, first) = send(&app.router, post_json("/submit", json!({"input": "a"}))).await;
        let (_, second) = send(&app.router, post_json("/submit", json!({"input": "b"}))).await;

        let (_, delivery) = send(
            &app.router,
            post_json("/queue/lease", json!({"runner_id": "r1"})),
        )
        .await;
        assert_eq!(delivery["job_id"], first["job_id"]);

        let uri = format!(
            "/queue/{}/complete",
            delivery["delivery_id"].as_str().unwrap()
        );
        let report = json!({
            "job_id": second["job_id"],
            "outcome": {"status": "completed", "result": "B"}
        });
        let (status, body) = send(&app.router, post_json(&uri, report)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("belongs to job"));

        let second_id = second["job_id"].as_str().unwrap();
        let (_, body) = send(&app.router, get(&format!("/status/{}", second_id))).await;
        assert_eq!(body["status"], "pending");
    }
}
