//! HTTP API tests against the axum router.

mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use demo_forge::api;
use demo_forge::jobs::{Job, JobStatus, JobSummary};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn submit(source: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/jobs")
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "source_reference": source }).to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(common::offline_service(&dir));

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["jobs"], 0);
}

#[tokio::test]
async fn test_submit_then_poll_until_completed() {
    let dir = tempfile::tempdir().unwrap();
    let service = common::offline_service(&dir);
    let app = api::router(service.clone());

    let response = app.clone().oneshot(submit("https://acme.example")).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let job: Job = tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let response = app
                .clone()
                .oneshot(get(&format!("/api/jobs/{}", job_id)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let job: Job = serde_json::from_slice(&body_bytes(response).await).unwrap();
            if job.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.overall_progress, 100.0);

    let response = app.oneshot(get("/api/jobs")).await.unwrap();
    let list: Vec<JobSummary> = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].job_id, job_id);
    assert_eq!(list[0].display_name.as_deref(), Some("Acme Rockets"));
}

#[tokio::test]
async fn test_invalid_submissions_are_bad_requests() {
    let dir = tempfile::tempdir().unwrap();
    let service = common::offline_service(&dir);
    let app = api::router(service.clone());

    for source in ["", "   ", "ftp://acme.example", "not a url"] {
        let response = app.clone().oneshot(submit(source)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "source {:?}", source);
        assert_eq!(
            response.headers()["content-type"],
            "application/problem+json"
        );
        let problem = body_json(response).await;
        assert_eq!(problem["status"], 400);
        assert!(problem["detail"].as_str().unwrap().contains("source reference"));
    }

    let malformed = Request::builder()
        .uri("/api/jobs")
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from("{\"url\": 1}"))
        .unwrap();
    let response = app.oneshot(malformed).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let app = api::router(common::offline_service(&dir));

    for uri in ["/api/jobs/missing", "/api/jobs/missing/stream"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
        let problem = body_json(response).await;
        assert_eq!(problem["title"], "Not Found");
        assert_eq!(problem["type"], "/problems/not-found");
    }

    let delete = Request::builder()
        .uri("/api/jobs/missing")
        .method("DELETE")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stream_of_finished_job_ends_with_terminal_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let service = common::offline_service(&dir);
    let (handle, _) = service
        .run_to_completion("https://acme.example")
        .await
        .unwrap();
    let app = api::router(service.clone());

    let response = app
        .oneshot(get(&format!("/api/jobs/{}/stream", handle.job_id())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");

    let body = tokio::time::timeout(Duration::from_secs(5), body_bytes(response))
        .await
        .expect("stream did not end");
    let text = String::from_utf8(body).unwrap();
    let events: Vec<&str> = text
        .split("\n\n")
        .filter(|chunk| chunk.contains("event: snapshot"))
        .collect();
    assert_eq!(events.len(), 1);

    let data = events[0]
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap();
    let job: Job = serde_json::from_str(data).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.job_id, handle.job_id());
}

#[tokio::test]
async fn test_delete_removes_job() {
    let dir = tempfile::tempdir().unwrap();
    let service = common::offline_service(&dir);
    let (handle, _) = service
        .run_to_completion("https://acme.example")
        .await
        .unwrap();
    let app = api::router(service.clone());

    let delete = Request::builder()
        .uri(format!("/api/jobs/{}", handle.job_id()))
        .method("DELETE")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(delete).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(get(&format!("/api/jobs/{}", handle.job_id())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    demo_forge::metrics::init_metrics().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let service = common::offline_service(&dir);
    service.run_to_completion("https://acme.example").await.unwrap();
    let app = api::router(service);

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("demo_forge_jobs_submitted_total"));
    assert!(text.contains("demo_forge_stage_duration_seconds"));
}
