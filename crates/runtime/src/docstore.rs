//! File-backed [`DocumentStore`]: one JSONL file per collection under a data
//! directory, with the working set held in memory.
//!
//! Adds append on `add_record` and atomically rewrites the collection file
//! on mutation (write to a `.tmp` sibling, fsync, rename), so a crash at any
//! point leaves either the old or the new file, never a torn one. Corrupt
//! lines found at load time are skipped with a warning rather than failing
//! the whole collection.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

use strainwise_memory::store::{Document, DocumentStore, StoreError, sort_newest_first};

#[derive(Debug, Serialize, Deserialize)]
struct DocumentLine {
    id: String,
    fields: Value,
}

pub struct FileDocumentStore {
    dir: PathBuf,
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl FileDocumentStore {
    /// Open the store rooted at `dir`, loading every `*.jsonl` collection.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let mut collections = HashMap::new();

        if dir.exists() {
            let entries = std::fs::read_dir(&dir).map_err(io_unavailable)?;
            for entry in entries {
                let path = entry.map_err(io_unavailable)?.path();
                if path.extension().is_some_and(|ext| ext == "jsonl") {
                    if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
                        collections.insert(name.to_string(), load_collection(&path)?);
                    }
                }
            }
        }

        Ok(Self {
            dir,
            collections: RwLock::new(collections),
        })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.jsonl"))
    }

    async fn append_line(&self, collection: &str, doc: &Document) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_unavailable)?;

        let line = serde_json::to_string(&DocumentLine {
            id: doc.id.clone(),
            fields: doc.fields.clone(),
        })
        .map_err(|source| StoreError::Malformed {
            collection: collection.to_string(),
            source,
        })?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.collection_path(collection))
            .await
            .map_err(io_unavailable)?;
        file.write_all(line.as_bytes()).await.map_err(io_unavailable)?;
        file.write_all(b"\n").await.map_err(io_unavailable)?;
        file.flush().await.map_err(io_unavailable)?;
        Ok(())
    }

    /// Rewrite the collection file via tmp + rename.
    async fn rewrite(&self, collection: &str, docs: &[Document]) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_unavailable)?;

        let path = self.collection_path(collection);
        let tmp_path = path.with_extension("jsonl.tmp");

        let mut rendered = String::new();
        for doc in docs {
            let line = serde_json::to_string(&DocumentLine {
                id: doc.id.clone(),
                fields: doc.fields.clone(),
            })
            .map_err(|source| StoreError::Malformed {
                collection: collection.to_string(),
                source,
            })?;
            rendered.push_str(&line);
            rendered.push('\n');
        }

        let write_result: Result<(), std::io::Error> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            file.write_all(rendered.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(io_unavailable(err));
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(io_unavailable(err));
        }
        Ok(())
    }

    async fn mutate<F>(&self, collection: &str, id: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Document),
    {
        let mut collections = self.collections.write().await;
        let docs = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection, id))?;
        let doc = docs
            .iter_mut()
            .find(|doc| doc.id == id)
            .ok_or_else(|| not_found(collection, id))?;

        apply(doc);
        let snapshot = docs.clone();
        drop(collections);
        self.rewrite(collection, &snapshot).await
    }
}

fn load_collection(path: &Path) -> Result<Vec<Document>, StoreError> {
    let file = std::fs::File::open(path).map_err(io_unavailable)?;
    let reader = BufReader::new(file);
    let mut docs = Vec::new();
    let mut corrupt_count = 0usize;

    for (line_idx, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(io_unavailable)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<DocumentLine>(&line) {
            Ok(parsed) => docs.push(Document {
                id: parsed.id,
                fields: parsed.fields,
            }),
            Err(err) => {
                corrupt_count += 1;
                warn!(
                    line = line_idx + 1,
                    error = %err,
                    path = %path.display(),
                    "corrupt JSONL record, skipping line"
                );
            }
        }
    }

    if corrupt_count > 0 {
        warn!(
            corrupt_lines = corrupt_count,
            path = %path.display(),
            "collection loaded with skipped corrupt lines"
        );
    }

    Ok(docs)
}

fn io_unavailable(err: std::io::Error) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn not_found(collection: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn add_record(&self, collection: &str, fields: Value) -> Result<String, StoreError> {
        let doc = Document {
            id: Uuid::new_v4().to_string(),
            fields,
        };
        self.append_line(collection, &doc).await?;

        let mut collections = self.collections.write().await;
        let id = doc.id.clone();
        collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
        Ok(id)
    }

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
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
        self.mutate(collection, id, |doc| {
            if let (Some(target), Some(updates)) =
                (doc.fields.as_object_mut(), fields.as_object())
            {
                for (key, value) in updates {
                    target.insert(key.clone(), value.clone());
                }
            }
        })
        .await
    }

    async fn increment_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
    ) -> Result<(), StoreError> {
        self.mutate(collection, id, |doc| {
            let current = doc.fields.get(field).and_then(Value::as_i64).unwrap_or(0);
            if let Some(target) = doc.fields.as_object_mut() {
                target.insert(field.to_string(), Value::from(current + delta));
            }
        })
        .await
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
