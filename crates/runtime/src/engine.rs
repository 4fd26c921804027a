//! Chat engine: one instance per user/session, owning the cache, context
//! builder, session transcript and collaborator handles. No ambient globals;
//! the calling application constructs and owns the engine.
//!
//! Flow per query: normalize → single-flight guard → cache probe → on hit
//! touch + replay; on miss build context, call the completion API with
//! bounded retry, upsert the cache, append the conversation log and the
//! analytics row. Every failure maps to a user-visible fallback message;
//! nothing here panics or bubbles an error into the UI.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use strainwise_analytics::{AnalyticsRecorder, InteractionRecord};
use strainwise_config::AppConfig;
use strainwise_llm::{CompletionClient, CompletionError, complete_with_retry};
use strainwise_memory::cache::{CacheStats, ResponseCache};
use strainwise_memory::context::ContextBuilder;
use strainwise_memory::normalizer::query_hash;
use strainwise_memory::repository::{ConversationLog, DocumentRepository, QueryRepository};
use strainwise_memory::schema::{ConversationEntry, QueryRecord, SessionTurn};
use strainwise_memory::session::SessionMemory;
use strainwise_memory::store::{DocumentStore, StoreError};

use crate::kv::{KvStore, user_context_key};

/// Fallback texts shown to the user, one per failure category.
const NOT_CONFIGURED_REPLY: &str = "⚠️ Configurazione AI non completata. Configura la chiave \
                                    API nelle impostazioni per utilizzare l'assistente.";
const REMOTE_UNAVAILABLE_REPLY: &str = "Errore nel generare la risposta AI. Riprova più tardi.";
const MALFORMED_REPLY: &str =
    "La risposta del servizio AI non era valida. Riprova più tardi.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub text: String,
    /// Whether the reply was served from the cache.
    pub cached: bool,
}

pub struct ChatEngine {
    config: AppConfig,
    user_id: String,
    cache: ResponseCache,
    context: ContextBuilder,
    log: Arc<dyn ConversationLog>,
    completion: Arc<dyn CompletionClient>,
    analytics: AnalyticsRecorder,
    kv: Arc<dyn KvStore>,
    session: Mutex<SessionMemory>,
    /// Per-hash-key locks serializing concurrent identical queries, so only
    /// the first of a burst pays for a completion call.
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ChatEngine {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        completion: Arc<dyn CompletionClient>,
        kv: Arc<dyn KvStore>,
        user_id: impl Into<String>,
    ) -> Self {
        let user_id = user_id.into();
        let repo = Arc::new(DocumentRepository::new(store.clone()));
        let cache = ResponseCache::new(
            repo.clone() as Arc<dyn QueryRepository>,
            config.memory.cache_capacity,
        );
        let context = ContextBuilder::new(
            repo.clone() as Arc<dyn ConversationLog>,
            config.persona.clone(),
            config.memory.clone(),
        );

        let mut session = SessionMemory::new();
        session.initialize(&user_id);

        Self {
            config,
            user_id,
            cache,
            context,
            log: repo,
            completion,
            analytics: AnalyticsRecorder::new(store),
            kv,
            session: Mutex::new(session),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Answer one user query, consulting the cache first.
    pub async fn process_query(&self, query: &str) -> ChatReply {
        let hash = query_hash(query);

        let key_lock = self.key_lock(&hash).await;
        let guard = key_lock.lock().await;

        match self.cache.lookup(&hash).await {
            Ok(Some(record)) => {
                info!(%hash, access_count = record.access_count, "cache hit, completion call saved");
                if let Err(err) = self.cache.touch(&hash).await {
                    warn!(%hash, error = %err, "failed to update access metadata");
                }
                self.session
                    .lock()
                    .await
                    .record(query, &record.ai_response, true);
                drop(guard);
                self.release_key(&key_lock, &hash).await;
                return ChatReply {
                    text: record.ai_response,
                    cached: true,
                };
            }
            Ok(None) => {}
            Err(err) => {
                warn!(%hash, error = %err, "cache lookup failed, treating as miss");
            }
        }

        info!(%hash, "cache miss, calling completion API");
        let system_prompt = self.context.build(&self.user_id).await;
        let reply = match complete_with_retry(
            self.completion.as_ref(),
            &system_prompt,
            query,
            self.config.llm.max_retries,
            self.config.llm.retry_backoff_ms,
        )
        .await
        {
            Ok(text) => {
                self.remember(query, &text, &hash).await;
                ChatReply {
                    text,
                    cached: false,
                }
            }
            Err(err) => {
                warn!(error = %err, "completion failed, replying with fallback");
                let text = fallback_reply(&err).to_string();
                // Failure replies go into the session transcript for UI
                // replay but are never cached.
                self.session.lock().await.record(query, &text, false);
                ChatReply {
                    text,
                    cached: false,
                }
            }
        };

        drop(guard);
        self.release_key(&key_lock, &hash).await;
        reply
    }

    /// Persist a fresh exchange: cache upsert, conversation log, session
    /// transcript, analytics. Each write degrades independently.
    async fn remember(&self, query: &str, response: &str, hash: &str) {
        let session_id = self
            .session
            .lock()
            .await
            .session_id()
            .unwrap_or("session_0")
            .to_string();

        let record = QueryRecord::from_exchange(&self.user_id, &session_id, query, response, hash);
        let entry = ConversationEntry {
            user_id: self.user_id.clone(),
            session_id: session_id.clone(),
            timestamp: Utc::now(),
            query: query.to_string(),
            response: response.to_string(),
            strains_mentioned: record.strains_mentioned.clone(),
        };

        if let Err(err) = self.cache.store(record).await {
            warn!(%hash, error = %err, "cache write-back failed, serving from local tier only");
        }
        if let Err(err) = self.log.append(&entry).await {
            warn!(error = %err, "conversation log append failed");
        }
        self.session.lock().await.record(query, response, false);

        let interaction =
            InteractionRecord::from_exchange(&self.user_id, &session_id, query, response);
        if let Err(err) = self.analytics.record_interaction(&interaction).await {
            warn!(error = %err, "analytics write failed");
        }
    }

    /// Clear the session transcript, the local cache tier and the persisted
    /// context blob. Local-only: remote cache records and the remote
    /// conversation log are retained.
    pub async fn clear_memory(&self) {
        self.session.lock().await.clear();
        self.cache.clear_local();
        if let Err(err) = self.kv.remove(&user_context_key(&self.user_id)).await {
            warn!(error = %err, "failed to remove persisted context blob");
        }
        info!(user_id = %self.user_id, "local memory cleared, remote history retained");
    }

    pub async fn cache_stats(&self) -> Result<CacheStats, StoreError> {
        self.cache.stats(&self.user_id).await
    }

    pub async fn transcript(&self) -> Vec<SessionTurn> {
        self.session.lock().await.transcript().to_vec()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .session_id()
            .map(ToString::to_string)
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Drop the per-key lock from the map once no other task holds it.
    async fn release_key(&self, held: &Arc<Mutex<()>>, key: &str) {
        let mut in_flight = self.in_flight.lock().await;
        // 2 = the map's reference plus `held`; anything higher means another
        // task is still queued on this key.
        if Arc::strong_count(held) == 2 {
            in_flight.remove(key);
        }
    }
}

fn fallback_reply(err: &CompletionError) -> &'static str {
    match err {
        CompletionError::NotConfigured => NOT_CONFIGURED_REPLY,
        CompletionError::RemoteUnavailable(_) => REMOTE_UNAVAILABLE_REPLY,
        CompletionError::Malformed(_) => MALFORMED_REPLY,
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
