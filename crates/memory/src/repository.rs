//! Typed repositories over the schemaless [`DocumentStore`].
//!
//! All field-name mapping between [`QueryRecord`]/[`ConversationEntry`] and
//! raw documents happens here and nowhere else, so a backend schema change
//! touches exactly one adapter.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::schema::{ConversationEntry, QueryRecord};
use crate::store::{Document, DocumentStore, StoreError};

/// Collection holding cache records keyed by query hash.
pub const QUERY_COLLECTION: &str = "ai_responses";
/// Append-only conversation log collection.
pub const CONVERSATION_COLLECTION: &str = "conversations";

/// Typed access to the query/response cache records.
#[async_trait]
pub trait QueryRepository: Send + Sync {
    /// Most recent record for the hash, if any.
    async fn find_by_hash(&self, hash: &str) -> Result<Option<QueryRecord>, StoreError>;

    /// Insert the record, or update the existing record with the same hash in
    /// place. At most one record per hash ever exists in the collection.
    async fn upsert(&self, record: &QueryRecord) -> Result<(), StoreError>;

    /// Atomically bump `accessCount` and refresh `lastAccessed` for the hash.
    /// A missing record is a no-op, matching lookup-then-touch races.
    async fn touch(&self, hash: &str) -> Result<(), StoreError>;

    /// All cache records owned by a user (for the stats read-model).
    async fn records_for_user(&self, user_id: &str) -> Result<Vec<QueryRecord>, StoreError>;
}

/// Typed access to the append-only conversation log.
#[async_trait]
pub trait ConversationLog: Send + Sync {
    async fn append(&self, entry: &ConversationEntry) -> Result<(), StoreError>;

    /// Most recent `limit` entries for the user, newest first.
    async fn recent_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>, StoreError>;
}

/// The one adapter implementing both typed facades over a raw store.
pub struct DocumentRepository {
    store: Arc<dyn DocumentStore>,
}

impl DocumentRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn decode<T: serde::de::DeserializeOwned>(
        collection: &str,
        doc: Document,
    ) -> Result<T, StoreError> {
        serde_json::from_value(doc.fields).map_err(|source| StoreError::Malformed {
            collection: collection.to_string(),
            source,
        })
    }

    async fn find_document_by_hash(&self, hash: &str) -> Result<Option<Document>, StoreError> {
        let mut docs = self
            .store
            .query_by_field(QUERY_COLLECTION, "queryHash", &json!(hash), 1)
            .await?;
        Ok(docs.pop())
    }
}

#[async_trait]
impl QueryRepository for DocumentRepository {
    async fn find_by_hash(&self, hash: &str) -> Result<Option<QueryRecord>, StoreError> {
        match self.find_document_by_hash(hash).await? {
            Some(doc) => Ok(Some(Self::decode(QUERY_COLLECTION, doc)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, record: &QueryRecord) -> Result<(), StoreError> {
        let fields = serde_json::to_value(record).map_err(|source| StoreError::Malformed {
            collection: QUERY_COLLECTION.to_string(),
            source,
        })?;

        match self.find_document_by_hash(&record.query_hash).await? {
            Some(existing) => {
                self.store
                    .update_record(QUERY_COLLECTION, &existing.id, fields)
                    .await
            }
            None => {
                self.store.add_record(QUERY_COLLECTION, fields).await?;
                Ok(())
            }
        }
    }

    async fn touch(&self, hash: &str) -> Result<(), StoreError> {
        let Some(existing) = self.find_document_by_hash(hash).await? else {
            return Ok(());
        };

        self.store
            .increment_field(QUERY_COLLECTION, &existing.id, "accessCount", 1)
            .await?;
        self.store
            .update_record(
                QUERY_COLLECTION,
                &existing.id,
                json!({ "lastAccessed": Utc::now() }),
            )
            .await
    }

    async fn records_for_user(&self, user_id: &str) -> Result<Vec<QueryRecord>, StoreError> {
        let docs = self
            .store
            .query_by_field(QUERY_COLLECTION, "userId", &json!(user_id), 0)
            .await?;
        docs.into_iter()
            .map(|doc| Self::decode(QUERY_COLLECTION, doc))
            .collect()
    }
}

#[async_trait]
impl ConversationLog for DocumentRepository {
    async fn append(&self, entry: &ConversationEntry) -> Result<(), StoreError> {
        let fields: Value =
            serde_json::to_value(entry).map_err(|source| StoreError::Malformed {
                collection: CONVERSATION_COLLECTION.to_string(),
                source,
            })?;
        self.store.add_record(CONVERSATION_COLLECTION, fields).await?;
        Ok(())
    }

    async fn recent_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>, StoreError> {
        let docs = self
            .store
            .query_by_field(CONVERSATION_COLLECTION, "userId", &json!(user_id), limit)
            .await?;
        docs.into_iter()
            .map(|doc| Self::decode(CONVERSATION_COLLECTION, doc))
            .collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryDocumentStore;

    fn repo_with_store() -> (DocumentRepository, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        (DocumentRepository::new(store.clone()), store)
    }

    fn record(hash: &str, user: &str, response: &str) -> QueryRecord {
        QueryRecord::from_exchange(user, "session_1", "una domanda qualsiasi", response, hash)
    }

    #[tokio::test]
    async fn find_by_hash_misses_on_empty_store() {
        let (repo, _) = repo_with_store();
        assert!(repo.find_by_hash("query_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_then_find_roundtrip() {
        let (repo, _) = repo_with_store();
        repo.upsert(&record("query_1", "u1", "risposta")).await.unwrap();

        let found = repo.find_by_hash("query_1").await.unwrap().unwrap();
        assert_eq!(found.query_hash, "query_1");
        assert_eq!(found.ai_response, "risposta");
        assert_eq!(found.access_count, 1);
    }

    #[tokio::test]
    async fn upsert_by_hash_never_duplicates() {
        let (repo, store) = repo_with_store();
        repo.upsert(&record("query_1", "u1", "prima")).await.unwrap();
        repo.upsert(&record("query_1", "u1", "seconda")).await.unwrap();

        assert_eq!(store.collection_len(QUERY_COLLECTION).await, 1);
        let found = repo.find_by_hash("query_1").await.unwrap().unwrap();
        assert_eq!(found.ai_response, "seconda");
    }

    #[tokio::test]
    async fn touch_increments_access_count_and_refreshes_last_accessed() {
        let (repo, _) = repo_with_store();
        let original = record("query_1", "u1", "risposta");
        repo.upsert(&original).await.unwrap();

        repo.touch("query_1").await.unwrap();
        repo.touch("query_1").await.unwrap();

        let found = repo.find_by_hash("query_1").await.unwrap().unwrap();
        assert_eq!(found.access_count, 3);
        assert!(found.last_accessed >= original.last_accessed);
        assert!(found.last_accessed >= found.timestamp);
    }

    #[tokio::test]
    async fn touch_missing_hash_is_a_no_op() {
        let (repo, _) = repo_with_store();
        repo.touch("query_absent").await.unwrap();
    }

    #[tokio::test]
    async fn records_for_user_filters_by_owner() {
        let (repo, _) = repo_with_store();
        repo.upsert(&record("query_1", "alice", "a")).await.unwrap();
        repo.upsert(&record("query_2", "alice", "b")).await.unwrap();
        repo.upsert(&record("query_3", "bob", "c")).await.unwrap();

        let records = repo.records_for_user("alice").await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.user_id == "alice"));
    }

    #[tokio::test]
    async fn conversation_log_returns_newest_first_with_limit() {
        let (repo, _) = repo_with_store();
        for i in 0..5 {
            let entry = ConversationEntry {
                user_id: "u1".to_string(),
                session_id: "s".to_string(),
                timestamp: Utc::now() + chrono::Duration::seconds(i),
                query: format!("domanda {i}"),
                response: format!("risposta {i}"),
                strains_mentioned: vec![],
            };
            repo.append(&entry).await.unwrap();
        }

        let recent = repo.recent_for_user("u1", 3).await.unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].query, "domanda 4");
        assert_eq!(recent[2].query, "domanda 2");
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_unavailable() {
        let (repo, store) = repo_with_store();
        store.set_failing(true);
        let err = repo.find_by_hash("query_1").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
