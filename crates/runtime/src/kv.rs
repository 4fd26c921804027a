//! Local key-value persistence: the API credential and the per-user context
//! blob live here. Plain get/set/remove by string key, nothing clever.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Well-known key holding the completion-API credential.
pub const API_KEY_KEY: &str = "openai_api_key";

/// Key of the persisted context blob for a user.
pub fn user_context_key(user_id: &str) -> String {
    format!("user_context_{user_id}")
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

// ── In-memory implementation ──────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    map: RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.map
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.map.write().await.remove(key);
        Ok(())
    }
}

// ── File-backed implementation ────────────────────────────────────────────────

/// JSON map persisted to a single file; the whole map is rewritten on every
/// mutation. Small (a handful of keys), so this is simpler than a log.
#[derive(Debug)]
pub struct FileKvStore {
    path: PathBuf,
    map: RwLock<HashMap<String, String>>,
}

impl FileKvStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("read kv file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parse kv file {}", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            map: RwLock::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, map: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let rendered = serde_json::to_string_pretty(map)?;
        tokio::fs::write(&self.path, rendered)
            .await
            .with_context(|| format!("write kv file {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.map.write().await;
        map.insert(key.to_string(), value.to_string());
        self.persist(&map).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.map.write().await;
        map.remove(key);
        self.persist(&map).await
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
