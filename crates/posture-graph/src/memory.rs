//! In-process graph store
//!
//! Serves the plain scan form `FOR <var> IN <collection> RETURN <var>` natively.
//! Any other query text must be registered with [`MemoryGraphStore::register_query`],
//! mapping it to a handler that walks a [`GraphSnapshot`].
//!
//! Faults can be injected per query text to exercise failure paths, and the
//! number of unreleased cursors is tracked so leak checks can assert on it.

use crate::document::{document_key, BindVars, Document, NodeRef};
use crate::error::StoreError;
use crate::store::{CollectionKind, Cursor, GraphStore, InsertOutcome};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Handler producing the result set of a registered query
pub type QueryHandler =
    Arc<dyn Fn(&GraphSnapshot<'_>, &BindVars) -> Result<Vec<Document>, StoreError> + Send + Sync>;

#[derive(Debug)]
struct Collection {
    kind: CollectionKind,
    documents: IndexMap<String, Document>,
    next_key: u64,
}

impl Collection {
    fn new(kind: CollectionKind) -> Self {
        Self {
            kind,
            documents: IndexMap::new(),
            next_key: 1,
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    failing_queries: HashSet<String>,
    read_failures: HashMap<String, usize>,
}

/// Read-only view of the graph handed to query handlers
#[derive(Debug)]
pub struct GraphSnapshot<'a> {
    collections: &'a IndexMap<String, Collection>,
}

impl<'a> GraphSnapshot<'a> {
    /// All documents of a collection in insertion order (empty if missing)
    pub fn documents(&self, collection: &str) -> impl Iterator<Item = &'a Document> + 'a {
        self.collections
            .get(collection)
            .into_iter()
            .flat_map(|c| c.documents.values())
    }

    /// Look up a node by reference
    #[must_use]
    pub fn get(&self, node: &NodeRef) -> Option<&'a Document> {
        self.collections
            .get(&node.collection)
            .and_then(|c| c.documents.get(&node.key))
    }

    /// Targets of the edges in `edge_collection` leaving `from`
    #[must_use]
    pub fn outbound(&self, from: &NodeRef, edge_collection: &str) -> Vec<&'a Document> {
        let from = from.to_string();
        self.documents(edge_collection)
            .filter(|edge| edge.get("_from").and_then(serde_json::Value::as_str) == Some(from.as_str()))
            .filter_map(|edge| edge.get("_to").and_then(serde_json::Value::as_str))
            .filter_map(|to| NodeRef::parse(to).ok())
            .filter_map(|to| self.get(&to))
            .collect()
    }
}

/// In-memory [`GraphStore`]
pub struct MemoryGraphStore {
    collections: RwLock<IndexMap<String, Collection>>,
    handlers: RwLock<HashMap<String, QueryHandler>>,
    faults: RwLock<Faults>,
    open_cursors: Arc<AtomicUsize>,
    queries_run: AtomicUsize,
}

impl std::fmt::Debug for MemoryGraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryGraphStore")
            .field("collections", &self.collections.read().len())
            .field("handlers", &self.handlers.read().len())
            .field("open_cursors", &self.open_cursors())
            .finish()
    }
}

impl Default for MemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGraphStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(IndexMap::new()),
            handlers: RwLock::new(HashMap::new()),
            faults: RwLock::new(Faults::default()),
            open_cursors: Arc::new(AtomicUsize::new(0)),
            queries_run: AtomicUsize::new(0),
        }
    }

    /// Serve `text` with `handler`
    pub fn register_query<F>(&self, text: &str, handler: F)
    where
        F: Fn(&GraphSnapshot<'_>, &BindVars) -> Result<Vec<Document>, StoreError> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .insert(text.trim().to_string(), Arc::new(handler));
    }

    /// Make every run of `text` fail as if the store were unreachable
    pub fn fail_query(&self, text: &str) {
        self.faults.write().failing_queries.insert(text.trim().to_string());
    }

    /// Make cursors of `text` fail after yielding `after` documents
    pub fn fail_read_after(&self, text: &str, after: usize) {
        self.faults
            .write()
            .read_failures
            .insert(text.trim().to_string(), after);
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        *self.faults.write() = Faults::default();
    }

    /// Cursors handed out and not yet released
    #[inline]
    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.open_cursors.load(Ordering::SeqCst)
    }

    /// Total queries executed
    #[inline]
    #[must_use]
    pub fn queries_run(&self) -> usize {
        self.queries_run.load(Ordering::SeqCst)
    }

    /// Number of documents in a collection (0 if missing)
    #[must_use]
    pub fn document_count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, |c| c.documents.len())
    }

    /// Run `f` against a consistent view of the graph
    pub fn with_snapshot<R>(&self, f: impl FnOnce(&GraphSnapshot<'_>) -> R) -> R {
        let collections = self.collections.read();
        f(&GraphSnapshot {
            collections: &collections,
        })
    }

    fn evaluate(&self, text: &str, bind_vars: &BindVars) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read();
        let snapshot = GraphSnapshot {
            collections: &collections,
        };

        if let Some(collection) = parse_scan(text) {
            if !collections.contains_key(collection) {
                return Err(StoreError::Query(format!(
                    "collection or view not found: {collection}"
                )));
            }
            return Ok(snapshot.documents(collection).cloned().collect());
        }

        let handler = self.handlers.read().get(text).cloned();
        match handler {
            Some(handler) => handler(&snapshot, bind_vars),
            None => Err(StoreError::Query(format!("unsupported query: {text}"))),
        }
    }
}

/// Recognize `FOR x IN Collection RETURN x`
fn parse_scan(text: &str) -> Option<&str> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    match tokens.as_slice() {
        [for_kw, var, in_kw, collection, return_kw, returned]
            if for_kw.eq_ignore_ascii_case("FOR")
                && in_kw.eq_ignore_ascii_case("IN")
                && return_kw.eq_ignore_ascii_case("RETURN")
                && var == returned =>
        {
            Some(*collection)
        }
        _ => None,
    }
}

#[async_trait]
impl GraphStore for MemoryGraphStore {
    async fn ensure_collection(&self, name: &str, kind: CollectionKind) -> Result<(), StoreError> {
        self.collections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Collection::new(kind));
        Ok(())
    }

    async fn insert_document(
        &self,
        collection: &str,
        mut document: Document,
    ) -> Result<InsertOutcome, StoreError> {
        let mut collections = self.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        let Some(object) = document.as_object_mut() else {
            return Err(StoreError::Malformed("document must be an object".to_string()));
        };

        if target.kind == CollectionKind::Edge {
            for field in ["_from", "_to"] {
                let valid = object
                    .get(field)
                    .and_then(serde_json::Value::as_str)
                    .is_some_and(|r| NodeRef::parse(r).is_ok());
                if !valid {
                    return Err(StoreError::Malformed(format!("edge is missing {field}")));
                }
            }
        }

        let key = match document_key(&document) {
            Some(key) => key.to_string(),
            None => {
                let key = target.next_key.to_string();
                target.next_key += 1;
                key
            }
        };

        if target.documents.contains_key(&key) {
            return Ok(InsertOutcome::AlreadyExists);
        }

        if let Some(object) = document.as_object_mut() {
            object.insert("_key".to_string(), key.clone().into());
            object.insert("_id".to_string(), format!("{collection}/{key}").into());
        }
        target.documents.insert(key, document);
        Ok(InsertOutcome::Created)
    }

    async fn query(&self, text: &str, bind_vars: BindVars) -> Result<Box<dyn Cursor>, StoreError> {
        let text = text.trim();
        self.queries_run.fetch_add(1, Ordering::SeqCst);

        let fail_after = {
            let faults = self.faults.read();
            if faults.failing_queries.contains(text) {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            faults.read_failures.get(text).copied()
        };

        let documents = self.evaluate(text, &bind_vars)?;

        self.open_cursors.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryCursor {
            documents: documents.into(),
            served: 0,
            fail_after,
            open: Some(Arc::clone(&self.open_cursors)),
        }))
    }
}

/// Cursor over a materialized result set
struct MemoryCursor {
    documents: VecDeque<Document>,
    served: usize,
    fail_after: Option<usize>,
    open: Option<Arc<AtomicUsize>>,
}

impl MemoryCursor {
    fn release(&mut self) {
        if let Some(counter) = self.open.take() {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Cursor for MemoryCursor {
    async fn next_document(&mut self) -> Result<Option<Document>, StoreError> {
        if self.open.is_none() {
            return Err(StoreError::Unavailable("cursor already closed".to_string()));
        }
        if self.fail_after.is_some_and(|limit| self.served >= limit) {
            return Err(StoreError::Unavailable("connection reset while reading cursor".to_string()));
        }
        let next = self.documents.pop_front();
        if next.is_some() {
            self.served += 1;
        }
        Ok(next)
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.release();
    }
}
