//! ArangoDB REST contract, exercised against a local mock server.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use posture_graph::{
    collect_all, ArangoConfig, ArangoStore, BindVars, CollectionKind, GraphStore, InsertOutcome,
    StoreError,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CURSOR_ID: &str = "4711";

#[derive(Default)]
struct Recorder {
    rows: Vec<Value>,
    batch_size: usize,
    served: usize,
    cursor_bodies: Vec<Value>,
    auth_headers: Vec<String>,
    fetches: usize,
    deleted: Vec<String>,
    collections: HashSet<String>,
    created_collections: Vec<Value>,
    document_keys: HashSet<String>,
}

type Shared = Arc<Mutex<Recorder>>;

fn next_batch(recorder: &mut Recorder) -> Value {
    let end = (recorder.served + recorder.batch_size).min(recorder.rows.len());
    let batch = recorder.rows[recorder.served..end].to_vec();
    recorder.served = end;
    let has_more = end < recorder.rows.len();
    json!({ "result": batch, "hasMore": has_more, "id": CURSOR_ID, "error": false, "code": 201 })
}

async fn open_cursor(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut recorder = state.lock().unwrap();
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        recorder.auth_headers.push(auth.to_string());
    }
    recorder.cursor_bodies.push(body.clone());

    match body["query"].as_str().unwrap_or_default() {
        "FOR broken" => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": true, "errorNum": 1501, "errorMessage": "syntax error, unexpected end of query" })),
        ),
        "FOR down" => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": true, "errorMessage": "shutdown in progress" })),
        ),
        _ => {
            recorder.batch_size = body["batchSize"].as_u64().unwrap_or(100) as usize;
            recorder.served = 0;
            (StatusCode::CREATED, Json(next_batch(&mut recorder)))
        }
    }
}

async fn read_cursor(
    State(state): State<Shared>,
    Path((_db, id)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    let mut recorder = state.lock().unwrap();
    if id != CURSOR_ID {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": true, "errorMessage": "cursor not found" })));
    }
    recorder.fetches += 1;
    (StatusCode::OK, Json(next_batch(&mut recorder)))
}

async fn delete_cursor(
    State(state): State<Shared>,
    Path((_db, id)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    state.lock().unwrap().deleted.push(id.clone());
    (StatusCode::ACCEPTED, Json(json!({ "id": id, "error": false })))
}

async fn get_collection(
    State(state): State<Shared>,
    Path((_db, name)): Path<(String, String)>,
) -> (StatusCode, Json<Value>) {
    if state.lock().unwrap().collections.contains(&name) {
        (StatusCode::OK, Json(json!({ "name": name })))
    } else {
        (StatusCode::NOT_FOUND, Json(json!({ "error": true, "errorNum": 1203 })))
    }
}

async fn create_collection(
    State(state): State<Shared>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut recorder = state.lock().unwrap();
    let name = body["name"].as_str().unwrap_or_default().to_string();
    recorder.created_collections.push(body.clone());
    recorder.collections.insert(name);
    (StatusCode::OK, Json(body))
}

async fn create_document(
    State(state): State<Shared>,
    Path((_db, collection)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut recorder = state.lock().unwrap();
    if !recorder.collections.contains(&collection) {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": true, "errorNum": 1203 })));
    }
    let key = format!("{collection}/{}", body["_key"].as_str().unwrap_or_default());
    if recorder.document_keys.insert(key) {
        (StatusCode::CREATED, Json(json!({ "_key": body["_key"] })))
    } else {
        (StatusCode::CONFLICT, Json(json!({ "error": true, "errorNum": 1210 })))
    }
}

async fn spawn_mock(rows: usize) -> (ArangoStore, Shared) {
    let state: Shared = Arc::new(Mutex::new(Recorder {
        rows: (0..rows).map(|i| json!({ "resource_id": format!("bucket-{i}") })).collect(),
        ..Recorder::default()
    }));

    let app = Router::new()
        .route("/_db/{db}/_api/cursor", post(open_cursor))
        .route("/_db/{db}/_api/cursor/{id}", put(read_cursor).delete(delete_cursor))
        .route("/_db/{db}/_api/collection", post(create_collection))
        .route("/_db/{db}/_api/collection/{name}", get(get_collection))
        .route("/_db/{db}/_api/document/{collection}", post(create_document))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let store = ArangoStore::new(
        ArangoConfig::new(format!("http://{addr}"))
            .with_credentials("root", "prowler")
            .with_batch_size(2)
            .with_request_timeout(Duration::from_secs(5)),
    )
    .unwrap();
    (store, state)
}

#[tokio::test]
async fn cursor_pages_through_all_batches() {
    let (store, state) = spawn_mock(5).await;

    let cursor = store.query("FOR b IN S3Bucket RETURN b", BindVars::new()).await.unwrap();
    let docs = collect_all(cursor).await.unwrap();

    assert_eq!(docs.len(), 5);
    assert_eq!(docs[4]["resource_id"], json!("bucket-4"));

    let recorder = state.lock().unwrap();
    assert_eq!(recorder.fetches, 2);
    assert!(recorder.deleted.is_empty(), "exhausted cursors are released by the server");
    assert_eq!(recorder.cursor_bodies[0]["batchSize"], json!(2));
    assert_eq!(recorder.cursor_bodies[0]["bindVars"], json!({}));
    assert!(recorder.auth_headers[0].starts_with("Basic "));
}

#[tokio::test]
async fn closing_early_deletes_server_cursor() {
    let (store, state) = spawn_mock(5).await;

    let mut cursor = store.query("FOR b IN S3Bucket RETURN b", BindVars::new()).await.unwrap();
    assert!(cursor.next_document().await.unwrap().is_some());
    cursor.close().await.unwrap();
    cursor.close().await.unwrap();

    assert_eq!(state.lock().unwrap().deleted, vec![CURSOR_ID.to_string()]);
}

#[tokio::test]
async fn dropping_open_cursor_releases_it_in_background() {
    let (store, state) = spawn_mock(5).await;

    let cursor = store.query("FOR b IN S3Bucket RETURN b", BindVars::new()).await.unwrap();
    drop(cursor);

    for _ in 0..50 {
        if !state.lock().unwrap().deleted.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.lock().unwrap().deleted, vec![CURSOR_ID.to_string()]);
}

#[tokio::test]
async fn rejected_query_carries_server_message() {
    let (store, _state) = spawn_mock(0).await;

    let err = store.query("FOR broken", BindVars::new()).await.err().unwrap();
    match err {
        StoreError::Query(message) => assert!(message.contains("syntax error")),
        other => panic!("expected Query, got {other:?}"),
    }
}

#[tokio::test]
async fn server_failure_is_unavailable() {
    let (store, _state) = spawn_mock(0).await;

    let err = store.query("FOR down", BindVars::new()).await.err().unwrap();
    assert!(matches!(err, StoreError::Unavailable(_)));
}

#[tokio::test]
async fn unreachable_server_is_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = ArangoStore::new(
        ArangoConfig::new(format!("http://{addr}")).with_request_timeout(Duration::from_secs(2)),
    )
    .unwrap();
    let err = store.query("FOR c IN Checks RETURN c", BindVars::new()).await.err().unwrap();
    assert!(err.is_transient());
}

#[tokio::test]
async fn ensure_collection_creates_only_when_missing() {
    let (store, state) = spawn_mock(0).await;

    store.ensure_collection("has_tag", CollectionKind::Edge).await.unwrap();
    store.ensure_collection("has_tag", CollectionKind::Edge).await.unwrap();

    let recorder = state.lock().unwrap();
    assert_eq!(recorder.created_collections.len(), 1);
    assert_eq!(recorder.created_collections[0], json!({ "name": "has_tag", "type": 3 }));
}

#[tokio::test]
async fn duplicate_document_is_already_exists() {
    let (store, _state) = spawn_mock(0).await;
    store.ensure_collection("S3Bucket", CollectionKind::Document).await.unwrap();

    let doc = json!({ "_key": "bucket-A", "name": "bucket-A", "is_public": true });
    assert_eq!(
        store.insert_document("S3Bucket", doc.clone()).await.unwrap(),
        InsertOutcome::Created
    );
    assert_eq!(
        store.insert_document("S3Bucket", doc).await.unwrap(),
        InsertOutcome::AlreadyExists
    );
}

#[tokio::test]
async fn insert_into_missing_collection_is_reported() {
    let (store, _state) = spawn_mock(0).await;

    let err = store
        .insert_document("Nope", json!({ "_key": "x" }))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::CollectionNotFound(_)));
}
