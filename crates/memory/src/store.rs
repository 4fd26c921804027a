//! Schemaless document-store abstraction.
//!
//! The remote persistence backend is a collaborator: the core only assumes a
//! collection/record model with equality queries and an atomic numeric
//! increment. Typed record mapping lives in [`crate::repository`], so schema
//! drift stays out of this module.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("no document {id} in collection {collection}")]
    NotFound { collection: String, id: String },
    #[error("malformed document in collection {collection}: {source}")]
    Malformed {
        collection: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A stored record: opaque id plus a JSON object of fields.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub fields: Value,
}

/// Minimal contract the core needs from the remote store.
///
/// `query_by_field` returns matches ordered newest-first by their
/// `timestamp` field when present (insertion order otherwise); `limit` of 0
/// means no limit. `increment_field` must be atomic on the backend.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn add_record(&self, collection: &str, fields: Value) -> Result<String, StoreError>;

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError>;

    /// Merge `fields` into an existing document (shallow, key by key).
    async fn update_record(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), StoreError>;

    async fn increment_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), StoreError>;
}

// ── In-memory implementation ──────────────────────────────────────────────────

/// In-process [`DocumentStore`] used by tests and as a zero-setup default.
/// `set_failing(true)` makes every operation return
/// [`StoreError::Unavailable`], for exercising degraded paths.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    failing: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }

    /// Number of documents currently held in `collection`.
    pub async fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }
}

/// Sort newest-first by the `timestamp` field when every document carries a
/// parseable one. RFC 3339 strings with mixed fractional precision do not
/// sort lexicographically, so parse before comparing.
pub fn sort_newest_first(docs: &mut [Document]) {
    fn timestamp_of(doc: &Document) -> Option<chrono::DateTime<chrono::FixedOffset>> {
        doc.fields
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|raw| chrono::DateTime::parse_from_rfc3339(raw).ok())
    }

    if docs.iter().all(|doc| timestamp_of(doc).is_some()) {
        docs.sort_by_key(|doc| std::cmp::Reverse(timestamp_of(doc)));
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn add_record(&self, collection: &str, fields: Value) -> Result<String, StoreError> {
        self.check_available()?;
        let id = Uuid::new_v4().to_string();
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .push(Document {
                id: id.clone(),
                fields,
            });
        Ok(id)
    }

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let mut matches: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| doc.fields.get(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        sort_newest_first(&mut matches);
        if limit > 0 {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn update_record(
        &self,
        collection: &str,
        id: &str,
        fields: Value,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|doc| doc.id == id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        if let (Some(target), Some(updates)) = (doc.fields.as_object_mut(), fields.as_object()) {
            for (key, value) in updates {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn increment_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|doc| doc.id == id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        let current = doc.fields.get(field).and_then(Value::as_i64).unwrap_or(0);
        if let Some(target) = doc.fields.as_object_mut() {
            target.insert(field.to_string(), Value::from(current + delta));
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn add_and_query_roundtrip() {
        let store = MemoryDocumentStore::new();
        store
            .add_record("things", json!({"kind": "a", "n": 1}))
            .await
            .unwrap();
        store
            .add_record("things", json!({"kind": "b", "n": 2}))
            .await
            .unwrap();

        let found = store
            .query_by_field("things", "kind", &json!("a"), 0)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].fields["n"], 1);
    }

    #[tokio::test]
    async fn query_respects_limit_and_orders_newest_first() {
        let store = MemoryDocumentStore::new();
        for i in 0..3 {
            store
                .add_record(
                    "log",
                    json!({"userId": "u", "timestamp": format!("2026-01-0{}T00:00:00Z", i + 1)}),
                )
                .await
                .unwrap();
        }

        let found = store
            .query_by_field("log", "userId", &json!("u"), 2)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].fields["timestamp"], "2026-01-03T00:00:00Z");
        assert_eq!(found[1].fields["timestamp"], "2026-01-02T00:00:00Z");
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = MemoryDocumentStore::new();
        let id = store
            .add_record("things", json!({"kind": "a", "n": 1}))
            .await
            .unwrap();
        store
            .update_record("things", &id, json!({"n": 7, "extra": true}))
            .await
            .unwrap();

        let found = store
            .query_by_field("things", "kind", &json!("a"), 1)
            .await
            .unwrap();
        assert_eq!(found[0].fields["n"], 7);
        assert_eq!(found[0].fields["extra"], true);
        assert_eq!(found[0].fields["kind"], "a");
    }

    #[tokio::test]
    async fn increment_is_cumulative_and_defaults_to_zero() {
        let store = MemoryDocumentStore::new();
        let id = store.add_record("counters", json!({})).await.unwrap();
        store.increment_field("counters", &id, "hits", 1).await.unwrap();
        store.increment_field("counters", &id, "hits", 2).await.unwrap();

        let collections = store.collections.read().await;
        assert_eq!(collections["counters"][0].fields["hits"], 3);
    }

    #[tokio::test]
    async fn update_missing_document_is_not_found() {
        let store = MemoryDocumentStore::new();
        let err = store
            .update_record("things", "missing", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn failing_store_returns_unavailable() {
        let store = MemoryDocumentStore::new();
        store.set_failing(true);
        let err = store.add_record("things", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
