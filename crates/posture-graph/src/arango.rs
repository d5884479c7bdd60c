//! ArangoDB HTTP backend
//!
//! Speaks the REST cursor API directly:
//! - `POST /_db/{db}/_api/cursor` opens a cursor and returns the first batch
//! - `PUT /_db/{db}/_api/cursor/{id}` fetches the next batch
//! - `DELETE /_db/{db}/_api/cursor/{id}` releases a cursor the server still holds
//!
//! Documents and collections go through `/_api/document` and `/_api/collection`.

use crate::document::{BindVars, Document};
use crate::error::StoreError;
use crate::store::{CollectionKind, Cursor, GraphStore, InsertOutcome};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Connection settings for [`ArangoStore`]
#[derive(Clone)]
pub struct ArangoConfig {
    /// Server endpoint, e.g. `http://arangodb:8529`
    pub endpoint: String,
    /// Database name
    pub database: String,
    /// Basic-auth user
    pub username: String,
    /// Basic-auth password
    pub password: String,
    /// Documents per cursor batch
    pub batch_size: u32,
    /// Deadline applied to every HTTP request
    pub request_timeout: Duration,
}

impl ArangoConfig {
    /// Create configuration for `endpoint` with defaults elsewhere
    #[inline]
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// With database name
    #[inline]
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// With basic-auth credentials
    #[inline]
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// With cursor batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// With request deadline
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for ArangoConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://arangodb:8529".to_string(),
            database: "_system".to_string(),
            username: "root".to_string(),
            password: String::new(),
            batch_size: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for ArangoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArangoConfig")
            .field("endpoint", &self.endpoint)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("batch_size", &self.batch_size)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Serialize)]
struct CursorRequest<'a> {
    query: &'a str,
    #[serde(rename = "bindVars")]
    bind_vars: &'a BindVars,
    #[serde(rename = "batchSize")]
    batch_size: u32,
}

#[derive(Deserialize)]
struct CursorBatch {
    #[serde(default)]
    result: Vec<Document>,
    #[serde(default, rename = "hasMore")]
    has_more: bool,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default, rename = "errorMessage")]
    error_message: Option<String>,
}

#[derive(Serialize)]
struct CreateCollection<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: u8,
}

/// Shared request plumbing between the store and its cursors
#[derive(Clone)]
struct Api {
    client: Client,
    base: String,
    username: String,
    password: String,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .basic_auth(&self.username, Some(&self.password))
    }
}

/// Translate a non-success response into a store error
async fn error_from(response: Response) -> StoreError {
    let status = response.status();
    let message = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.error_message)
        .unwrap_or_else(|| status.to_string());

    if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
                | StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
        )
    {
        StoreError::Unavailable(format!("{status}: {message}"))
    } else {
        StoreError::Query(message)
    }
}

/// [`GraphStore`] backed by an ArangoDB server
pub struct ArangoStore {
    api: Api,
    batch_size: u32,
}

impl fmt::Debug for ArangoStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArangoStore")
            .field("base", &self.api.base)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl ArangoStore {
    /// Build a client for the configured server
    ///
    /// No request is made; connectivity problems surface on first use.
    ///
    /// # Errors
    /// `StoreError::Config` for a malformed endpoint or an unusable client setup
    pub fn new(config: ArangoConfig) -> Result<Self, StoreError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| StoreError::Config(format!("invalid endpoint {}: {e}", config.endpoint)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(StoreError::Config(format!(
                "unsupported endpoint scheme: {}",
                endpoint.scheme()
            )));
        }
        if config.database.is_empty() {
            return Err(StoreError::Config("database name is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        let base = format!(
            "{}/_db/{}/_api",
            endpoint.as_str().trim_end_matches('/'),
            config.database
        );

        Ok(Self {
            api: Api {
                client,
                base,
                username: config.username,
                password: config.password,
            },
            batch_size: config.batch_size.max(1),
        })
    }
}

#[async_trait]
impl GraphStore for ArangoStore {
    async fn ensure_collection(&self, name: &str, kind: CollectionKind) -> Result<(), StoreError> {
        let response = self
            .api
            .request(reqwest::Method::GET, &format!("collection/{name}"))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            _ => return Err(error_from(response).await),
        }

        let response = self
            .api
            .request(reqwest::Method::POST, "collection")
            .json(&CreateCollection {
                name,
                kind: kind.wire_type(),
            })
            .send()
            .await?;

        match response.status() {
            // Lost a creation race with another writer
            StatusCode::CONFLICT => Ok(()),
            status if status.is_success() => {
                tracing::info!(collection = name, ?kind, "created collection");
                Ok(())
            }
            _ => Err(error_from(response).await),
        }
    }

    async fn insert_document(
        &self,
        collection: &str,
        document: Document,
    ) -> Result<InsertOutcome, StoreError> {
        let response = self
            .api
            .request(reqwest::Method::POST, &format!("document/{collection}"))
            .json(&document)
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Ok(InsertOutcome::AlreadyExists),
            StatusCode::NOT_FOUND => Err(StoreError::CollectionNotFound(collection.to_string())),
            status if status.is_success() => Ok(InsertOutcome::Created),
            _ => Err(error_from(response).await),
        }
    }

    async fn query(&self, text: &str, bind_vars: BindVars) -> Result<Box<dyn Cursor>, StoreError> {
        let response = self
            .api
            .request(reqwest::Method::POST, "cursor")
            .json(&CursorRequest {
                query: text,
                bind_vars: &bind_vars,
                batch_size: self.batch_size,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from(response).await);
        }

        let batch: CursorBatch = response.json().await?;
        Ok(Box::new(ArangoCursor::new(self.api.clone(), batch)))
    }
}

/// Server-side cursor, fetched batch by batch
struct ArangoCursor {
    api: Api,
    id: Option<String>,
    buffer: VecDeque<Document>,
    has_more: bool,
    closed: bool,
}

impl ArangoCursor {
    fn new(api: Api, batch: CursorBatch) -> Self {
        Self {
            api,
            id: batch.id,
            buffer: batch.result.into(),
            has_more: batch.has_more,
            closed: false,
        }
    }

    /// Server still holds state for this cursor
    fn holds_server_state(&self) -> bool {
        self.has_more && self.id.is_some()
    }

    async fn fetch_next_batch(&mut self) -> Result<(), StoreError> {
        let Some(id) = self.id.as_deref() else {
            self.has_more = false;
            return Ok(());
        };

        let response = self
            .api
            .request(reqwest::Method::PUT, &format!("cursor/{id}"))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }

        let batch: CursorBatch = response.json().await?;
        self.buffer.extend(batch.result);
        self.has_more = batch.has_more;
        Ok(())
    }
}

#[async_trait]
impl Cursor for ArangoCursor {
    async fn next_document(&mut self) -> Result<Option<Document>, StoreError> {
        if self.closed {
            return Err(StoreError::Unavailable("cursor already closed".to_string()));
        }

        loop {
            if let Some(doc) = self.buffer.pop_front() {
                return Ok(Some(doc));
            }
            if !self.has_more {
                return Ok(None);
            }
            self.fetch_next_batch().await?;
        }
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.buffer.clear();

        if !self.holds_server_state() {
            return Ok(());
        }
        self.has_more = false;

        let Some(id) = self.id.take() else {
            return Ok(());
        };
        let response = self
            .api
            .request(reqwest::Method::DELETE, &format!("cursor/{id}"))
            .send()
            .await?;

        match response.status() {
            // Already expired or exhausted on the server
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(error_from(response).await),
        }
    }
}

impl Drop for ArangoCursor {
    fn drop(&mut self) {
        if self.closed || !self.holds_server_state() {
            return;
        }
        let Some(id) = self.id.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let request = self
                    .api
                    .request(reqwest::Method::DELETE, &format!("cursor/{id}"));
                handle.spawn(async move {
                    if let Err(e) = request.send().await {
                        tracing::debug!(cursor = %id, error = %e, "failed to release dropped cursor");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(cursor = %id, "cursor dropped outside a runtime; left to server-side expiry");
            }
        }
    }
}
