//! Remediation dispatch over real HTTP against a local mock service.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use posture_engine::{
    EngineConfig, EngineError, EvaluationScheduler, Finding, HttpTransport, RemediationDispatcher,
    RemediationOutcome, RetryPolicy, TransportError,
};
use posture_graph::Check;
use posture_test_utils::{seeded_store, standard_buckets};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Service {
    received: Vec<(String, Value)>,
    flaky_failures: usize,
}

type Shared = Arc<Mutex<Service>>;

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

async fn remediate(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, String) {
    let resource = body["resource_id"].as_str().unwrap_or_default().to_string();
    state.lock().unwrap().received.push((content_type(&headers), body));
    (StatusCode::OK, format!("Remediation triggered for {resource}"))
}

async fn flaky(State(state): State<Shared>, Json(body): Json<Value>) -> (StatusCode, String) {
    let mut service = state.lock().unwrap();
    service.received.push((String::new(), body));
    if service.flaky_failures > 0 {
        service.flaky_failures -= 1;
        (StatusCode::SERVICE_UNAVAILABLE, "warming up".to_string())
    } else {
        (StatusCode::ACCEPTED, "queued".to_string())
    }
}

async fn reject(State(state): State<Shared>, Json(body): Json<Value>) -> (StatusCode, String) {
    state.lock().unwrap().received.push((String::new(), body));
    (StatusCode::UNPROCESSABLE_ENTITY, "unknown resource".to_string())
}

async fn slow() -> StatusCode {
    tokio::time::sleep(Duration::from_secs(5)).await;
    StatusCode::OK
}

async fn spawn_service(flaky_failures: usize) -> (SocketAddr, Shared) {
    let state: Shared = Arc::new(Mutex::new(Service {
        flaky_failures,
        ..Service::default()
    }));
    let app = Router::new()
        .route("/remediate", post(remediate))
        .route("/flaky", post(flaky))
        .route("/reject", post(reject))
        .route("/slow", post(slow))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn finding() -> Finding {
    Finding::from_document(
        &Check::new("public-bucket", "q"),
        json!({ "resource_id": "bucket-A", "message": "public", "region": "eu-west-1" }),
    )
    .unwrap()
}

fn dispatcher(addr: SocketAddr, path: &str, timeout: Duration) -> RemediationDispatcher {
    let url = reqwest::Url::parse(&format!("http://{addr}{path}")).unwrap();
    RemediationDispatcher::with_transport(url, Arc::new(HttpTransport::new(timeout).unwrap()))
        .with_timeout(timeout)
        .with_retry(
            RetryPolicy::default()
                .with_delays(Duration::from_millis(20), Duration::from_millis(100))
                .without_jitter(),
        )
}

#[tokio::test]
async fn engine_posts_finding_as_json() {
    let (addr, state) = spawn_service(0).await;
    let store = seeded_store(&standard_buckets()).await;
    let config = EngineConfig::default().with_remediation_url(format!("http://{addr}/remediate"));

    let scheduler = EvaluationScheduler::from_config(&config, store).unwrap();
    let report = scheduler.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.dispatched, 1);
    let service = state.lock().unwrap();
    assert_eq!(service.received.len(), 1);
    assert_eq!(service.received[0].0, "application/json");
    assert_eq!(
        service.received[0].1,
        json!({
            "resource_id": "bucket-A",
            "message": "S3 bucket 'bucket-A' is public and tagged as sensitive."
        })
    );
}

#[tokio::test]
async fn response_is_reported_verbatim() {
    let (addr, _state) = spawn_service(0).await;

    let outcome = dispatcher(addr, "/remediate", Duration::from_secs(5))
        .dispatch(&finding(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        RemediationOutcome::Delivered {
            status: 200,
            body: "Remediation triggered for bucket-A".to_string(),
            attempts: 1,
        }
    );
}

#[tokio::test]
async fn unavailable_service_is_retried() {
    let (addr, state) = spawn_service(2).await;

    let outcome = dispatcher(addr, "/flaky", Duration::from_secs(5))
        .dispatch(&finding(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(matches!(outcome, RemediationOutcome::Delivered { status: 202, attempts: 3, .. }));
    let service = state.lock().unwrap();
    assert_eq!(service.received.len(), 3);
    assert!(service.received.iter().all(|(_, body)| body["region"] == "eu-west-1"));
}

#[tokio::test]
async fn rejection_is_not_retried() {
    let (addr, state) = spawn_service(0).await;

    let err = dispatcher(addr, "/reject", Duration::from_secs(5))
        .dispatch(&finding(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        EngineError::DispatchTransportError {
            source: TransportError::Status { status, body },
            attempts,
        } => {
            assert_eq!(status, 422);
            assert_eq!(body, "unknown resource");
            assert_eq!(attempts, 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(state.lock().unwrap().received.len(), 1);
}

#[tokio::test]
async fn slow_service_times_out() {
    let (addr, _state) = spawn_service(0).await;

    let err = dispatcher(addr, "/slow", Duration::from_millis(200))
        .with_retry(RetryPolicy::none())
        .dispatch(&finding(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::DispatchTransportError { source: TransportError::Timeout, attempts: 1 }
    ));
}

#[tokio::test]
async fn unreachable_service_is_a_dispatch_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = dispatcher(addr, "/remediate", Duration::from_secs(2))
        .with_retry(RetryPolicy::none())
        .dispatch(&finding(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::DispatchTransportError { source: TransportError::Request(_), attempts: 1 }
    ));
    assert!(err.is_retryable());
}
