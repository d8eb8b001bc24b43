//! Kubernetes Job scheduler tests against a mock API server

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::init_test_tracing;
use phren_ingest::dispatcher::{JobDispatcher, JobTemplate};
use phren_ingest::error::SchedulerError;
use phren_ingest::planner::Range;
use phren_ingest::scheduler::{BatchScheduler, KubernetesConfig, KubernetesScheduler};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JOBS_PATH: &str = "/apis/batch/v1/namespaces/ingest/jobs";

fn scheduler(server: &MockServer) -> KubernetesScheduler {
    let config = KubernetesConfig::new(server.uri(), "ingest").with_token("s3cr3t");
    KubernetesScheduler::new(config).unwrap()
}

fn job_list(items: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "apiVersion": "batch/v1",
        "kind": "JobList",
        "metadata": {"resourceVersion": "1"},
        "items": items
    }))
}

#[tokio::test]
async fn test_list_returns_unfinished_jobs() {
    init_test_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(JOBS_PATH))
        .and(header("authorization", "Bearer s3cr3t"))
        .respond_with(job_list(json!([
            {"metadata": {"name": "phren-1-100"}, "status": {"active": 1}},
            {"metadata": {"name": "phren-101-200"}, "status": {
                "succeeded": 1,
                "conditions": [{"type": "Complete", "status": "True"}]
            }},
            {"metadata": {"name": "other"}, "status": {
                "conditions": [{"type": "Failed", "status": "True"}]
            }},
            {"metadata": {"name": "pending"}}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let active = scheduler(&server).list_active_jobs().await.unwrap();
    assert_eq!(active, vec!["phren-1-100", "pending"]);
}

#[tokio::test]
async fn test_list_forbidden_surfaces_status() {
    init_test_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(JOBS_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("jobs.batch is forbidden"))
        .mount(&server)
        .await;

    let err = scheduler(&server).list_active_jobs().await.unwrap_err();
    match err {
        SchedulerError::Status { status, body } => {
            assert_eq!(status, 403);
            assert!(body.contains("forbidden"));
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_dispatch_posts_job_manifests() {
    init_test_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(JOBS_PATH))
        .respond_with(job_list(json!([])))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path(JOBS_PATH))
        .and(body_partial_json(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": "phren-501-530"},
            "spec": {
                "ttlSecondsAfterFinished": 60,
                "template": {"spec": {
                    "restartPolicy": "Never",
                    "serviceAccountName": "phren"
                }}
            }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"kind": "Job"})))
        .expect(1)
        .mount(&server)
        .await;

    let template = JobTemplate {
        image: "ghcr.io/example/phren:1.0".into(),
        service_account: "phren".into(),
        rekor_url: "http://rekor.local".into(),
        table: "rekor".into(),
        bucket: "rekor-entries".into(),
        env_secret: None,
        ttl_seconds_after_finished: 60,
    };
    let dispatcher = JobDispatcher::new(Arc::new(scheduler(&server)));
    let report = dispatcher
        .dispatch(&[Range::new(501, 530).unwrap()], &template)
        .await
        .unwrap();

    assert_eq!(report.submitted, vec!["phren-501-530"]);
    assert!(report.failed.is_empty());
}

#[tokio::test]
async fn test_conflicting_create_is_reported_per_range() {
    init_test_tracing();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(JOBS_PATH))
        .respond_with(job_list(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(JOBS_PATH))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "kind": "Status",
            "reason": "AlreadyExists"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let template = JobTemplate {
        image: "img".into(),
        service_account: "phren".into(),
        rekor_url: "http://rekor.local".into(),
        table: "rekor".into(),
        bucket: "rekor-entries".into(),
        env_secret: None,
        ttl_seconds_after_finished: 0,
    };
    let ranges = [Range::single(4), Range::single(9)];
    let report = JobDispatcher::new(Arc::new(scheduler(&server)))
        .dispatch(&ranges, &template)
        .await
        .unwrap();

    assert!(report.submitted.is_empty());
    assert_eq!(report.failed.len(), 2);
    assert!(report.failed[1].1.contains("AlreadyExists"));
}
