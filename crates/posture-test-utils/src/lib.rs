//! Testing utilities for the posture workspace
//!
//! Graph fixtures, an in-memory rendition of the built-in check, and a
//! transport that records what would have been sent.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use posture_engine::{
    CheckRepository, EvaluationScheduler, QueryExecutor, RemediationDispatcher, RemediationTransport,
    RetryPolicy, SchedulerConfig, TransportError, TransportResponse,
};
use posture_graph::{
    public_sensitive_bucket_check, Check, GraphSnapshot, Ingestor, MemoryGraphStore, NodeRef,
    ResourceNode, Schema,
};
use reqwest::Url;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

pub const SENSITIVE_TAG: &str = "sensitivity:high";
pub const REMEDIATION_URL: &str = "http://remediation.test/remediate";

#[derive(Debug, Clone)]
pub struct BucketFixture {
    pub name: String,
    pub is_public: bool,
    pub tags: Vec<String>,
}

pub fn bucket(name: &str, is_public: bool, tags: &[&str]) -> BucketFixture {
    BucketFixture {
        name: name.to_string(),
        is_public,
        tags: tags.iter().map(|t| (*t).to_string()).collect(),
    }
}

/// bucket-A public + sensitive, bucket-B private + sensitive, bucket-C public + low
pub fn standard_buckets() -> Vec<BucketFixture> {
    vec![
        bucket("bucket-A", true, &[SENSITIVE_TAG]),
        bucket("bucket-B", false, &[SENSITIVE_TAG]),
        bucket("bucket-C", true, &["sensitivity:low"]),
    ]
}

pub fn public_sensitive_check() -> Check {
    public_sensitive_bucket_check(&Schema::default())
}

/// Serve the built-in check's query text from the snapshot
pub fn register_public_sensitive_query(store: &MemoryGraphStore) {
    let schema = Schema::default();
    let query = public_sensitive_bucket_check(&schema).query;
    store.register_query(&query, move |snapshot, _| {
        Ok(public_sensitive_matches(snapshot, &schema))
    });
}

fn public_sensitive_matches(snapshot: &GraphSnapshot<'_>, schema: &Schema) -> Vec<Value> {
    let mut matches = Vec::new();
    for bucket in snapshot.documents(&schema.resources) {
        if bucket.get("is_public") != Some(&Value::Bool(true)) {
            continue;
        }
        let (Some(key), Some(name)) = (
            bucket.get("_key").and_then(Value::as_str),
            bucket.get("name").and_then(Value::as_str),
        ) else {
            continue;
        };

        let from = NodeRef::new(schema.resources.as_str(), key);
        for tag in snapshot.outbound(&from, &schema.has_tag) {
            if tag.get("name").and_then(Value::as_str) == Some(SENSITIVE_TAG) {
                matches.push(json!({
                    "resource_id": name,
                    "message": format!("S3 bucket '{name}' is public and tagged as sensitive."),
                }));
            }
        }
    }
    matches
}

/// Store with the schema, the given buckets and the built-in check
pub async fn seeded_store(buckets: &[BucketFixture]) -> Arc<MemoryGraphStore> {
    let store = Arc::new(MemoryGraphStore::new());
    let ingestor = Ingestor::new(store.clone());
    ingestor.ensure_schema().await.unwrap();

    for fixture in buckets {
        let resource = ResourceNode::new(fixture.name.as_str()).with_attribute("is_public", fixture.is_public);
        let tags: Vec<&str> = fixture.tags.iter().map(String::as_str).collect();
        ingestor.ingest_tagged_resource(&resource, &tags).await.unwrap();
    }

    ingestor.upsert_check(&public_sensitive_check()).await.unwrap();
    register_public_sensitive_query(&store);
    store
}

/// Add another check definition to a seeded store
pub async fn add_check(store: &Arc<MemoryGraphStore>, check: &Check) {
    Ingestor::new(store.clone()).upsert_check(check).await.unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub url: String,
    pub payload: Value,
}

/// Transport that records requests and replays scripted responses
///
/// Once the script is exhausted every request is answered with 200.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    requests: Mutex<Vec<RecordedRequest>>,
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scripted(responses: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            script: Mutex::new(responses.into()),
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn resource_ids(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter_map(|r| r.payload.get("resource_id").and_then(Value::as_str).map(str::to_string))
            .collect()
    }
}

pub fn status(status: u16, body: &str) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse {
        status,
        body: body.to_string(),
    })
}

#[async_trait]
impl RemediationTransport for RecordingTransport {
    async fn post(&self, url: &Url, payload: Vec<u8>) -> Result<TransportResponse, TransportError> {
        let payload = serde_json::from_slice(&payload).unwrap_or(Value::Null);
        self.requests.lock().push(RecordedRequest {
            url: url.to_string(),
            payload,
        });
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| status(200, "Remediation triggered"))
    }
}

/// Dispatcher over `transport` with short, deterministic backoff
pub fn recording_dispatcher(transport: Arc<RecordingTransport>) -> RemediationDispatcher {
    RemediationDispatcher::with_transport(Url::parse(REMEDIATION_URL).unwrap(), transport).with_retry(
        RetryPolicy::default()
            .with_delays(Duration::from_millis(10), Duration::from_millis(100))
            .without_jitter(),
    )
}

/// Scheduler over a memory store with short timeouts
pub fn scheduler(store: &Arc<MemoryGraphStore>, dispatcher: RemediationDispatcher) -> EvaluationScheduler {
    scheduler_with(store, dispatcher, SchedulerConfig::default(), None)
}

pub fn scheduler_with(
    store: &Arc<MemoryGraphStore>,
    dispatcher: RemediationDispatcher,
    config: SchedulerConfig,
    max_findings: Option<usize>,
) -> EvaluationScheduler {
    EvaluationScheduler::new(
        CheckRepository::new(store.clone(), "Checks", Duration::from_secs(5)),
        QueryExecutor::new(store.clone(), Duration::from_secs(5)).with_max_findings(max_findings),
        dispatcher,
        config,
    )
}
