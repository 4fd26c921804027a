//! Two-tier response cache: a bounded process-local LRU in front of the
//! remote query-record collection.
//!
//! The local tier only bounds resident memory; an evicted or never-seen key
//! is transparently served from the remote tier and re-admitted locally.
//! All operations return `Result` so the caller decides whether a failed
//! write-back degrades the request or just the cache.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;
use lru::LruCache;
use tracing::debug;

use crate::repository::QueryRepository;
use crate::schema::QueryRecord;
use crate::store::StoreError;

pub struct ResponseCache {
    local: Mutex<LruCache<String, QueryRecord>>,
    repo: Arc<dyn QueryRepository>,
}

impl ResponseCache {
    /// `capacity` bounds the local tier only. A zero capacity is clamped to 1.
    pub fn new(repo: Arc<dyn QueryRepository>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("clamped to at least 1");
        Self {
            local: Mutex::new(LruCache::new(capacity)),
            repo,
        }
    }

    /// Probe the local tier, then the remote store. A remote hit is admitted
    /// into the local tier before returning. Performs no writes, so calling
    /// it twice without an intervening store returns the same record.
    pub async fn lookup(&self, hash: &str) -> Result<Option<QueryRecord>, StoreError> {
        if let Some(record) = self.local.lock().expect("cache lock").get(hash) {
            debug!(%hash, tier = "local", "cache hit");
            return Ok(Some(record.clone()));
        }

        match self.repo.find_by_hash(hash).await? {
            Some(record) => {
                debug!(%hash, tier = "remote", "cache hit");
                self.local
                    .lock()
                    .expect("cache lock")
                    .put(hash.to_string(), record.clone());
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Record a cache hit: bump the remote access count and refresh
    /// `lastAccessed`, mirroring the change into the local copy.
    pub async fn touch(&self, hash: &str) -> Result<(), StoreError> {
        self.repo.touch(hash).await?;
        if let Some(record) = self.local.lock().expect("cache lock").get_mut(hash) {
            record.access_count += 1;
            record.last_accessed = Utc::now();
        }
        Ok(())
    }

    /// Upsert the record remotely, keyed by its hash. The local tier is
    /// updated first, so even when the remote write fails the response is
    /// served from the local tier for the rest of this process lifetime
    /// (local-first durability is not guaranteed across restarts).
    pub async fn store(&self, record: QueryRecord) -> Result<(), StoreError> {
        self.local
            .lock()
            .expect("cache lock")
            .put(record.query_hash.clone(), record.clone());
        self.repo.upsert(&record).await
    }

    /// Drop every entry in the local tier. Remote records are untouched.
    pub fn clear_local(&self) {
        self.local.lock().expect("cache lock").clear();
    }

    pub fn local_len(&self) -> usize {
        self.local.lock().expect("cache lock").len()
    }

    /// Cache economics for a user, derived from access counts: every access
    /// beyond the first on a record was a saved completion call.
    pub async fn stats(&self, user_id: &str) -> Result<CacheStats, StoreError> {
        let records = self.repo.records_for_user(user_id).await?;

        let unique_queries = records.len() as u64;
        let mut total_queries = 0u64;
        let mut cached_queries = 0u64;
        for record in &records {
            let count = record.access_count.max(1);
            total_queries += count;
            cached_queries += count - 1;
        }

        Ok(CacheStats {
            total_queries,
            unique_queries,
            cached_queries,
        })
    }
}

/// Read-model of the cache savings for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_queries: u64,
    pub unique_queries: u64,
    /// Queries answered from the cache, i.e. completion calls saved.
    pub cached_queries: u64,
}

impl CacheStats {
    pub fn hit_rate_percent(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.cached_queries as f64 / self.total_queries as f64 * 100.0
        }
    }

    /// Rough savings estimate at ~0.002 EUR per completion call.
    pub fn estimated_savings_eur(&self) -> f64 {
        self.cached_queries as f64 * 0.002
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
