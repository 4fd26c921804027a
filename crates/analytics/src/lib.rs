//! Interaction analytics: per-query records plus two rollups (per-user
//! preference sets and per-strain request counters). Everything here is
//! best-effort from the engine's point of view; a failed write degrades
//! analytics, never the chat reply.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use strainwise_memory::classify::{classify_query, extract_strains};
use strainwise_memory::schema::QueryType;
use strainwise_memory::store::{DocumentStore, StoreError};

pub const INTERACTIONS_COLLECTION: &str = "user_interactions";
pub const PREFERENCES_COLLECTION: &str = "user_preferences";
pub const STRAINS_COLLECTION: &str = "strain_analytics";

/// Effects vocabulary scanned for in queries.
pub const KNOWN_EFFECTS: &[&str] = &[
    "creative",
    "energetic",
    "relaxing",
    "sleepy",
    "focused",
    "happy",
];

/// Intent buckets with their trigger keywords; first match wins.
const INTENTS: &[(&str, &[&str])] = &[
    ("sleep", &["sleep", "insomnia", "dormire"]),
    ("pain", &["pain", "dolore", "ache"]),
    ("anxiety", &["anxiety", "ansia", "stress"]),
    ("creativity", &["creative", "creatività", "focus"]),
];

/// Effects from [`KNOWN_EFFECTS`] mentioned in the query, in vocabulary order.
pub fn extract_effects(query: &str) -> Vec<String> {
    let q = query.to_lowercase();
    KNOWN_EFFECTS
        .iter()
        .filter(|effect| q.contains(*effect))
        .map(ToString::to_string)
        .collect()
}

pub fn detect_intent(query: &str) -> &'static str {
    let q = query.to_lowercase();
    for (intent, keywords) in INTENTS {
        if keywords.iter().any(|keyword| q.contains(keyword)) {
            return intent;
        }
    }
    "general"
}

/// One analytics row, written per processed query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: String,
    pub session_id: String,
    pub query_type: QueryType,
    pub user_query: String,
    pub ai_response: String,
    pub strains_mentioned: Vec<String>,
    pub effects_requested: Vec<String>,
    pub query_intent: String,
    pub timestamp: DateTime<Utc>,
}

impl InteractionRecord {
    pub fn from_exchange(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        query: &str,
        response: &str,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            query_type: classify_query(query),
            user_query: query.to_string(),
            ai_response: response.to_string(),
            strains_mentioned: extract_strains(response),
            effects_requested: extract_effects(query),
            query_intent: detect_intent(query).to_string(),
            timestamp: Utc::now(),
        }
    }
}

pub struct AnalyticsRecorder {
    store: Arc<dyn DocumentStore>,
}

impl AnalyticsRecorder {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Write the interaction row and fold it into both rollups.
    pub async fn record_interaction(&self, record: &InteractionRecord) -> Result<(), StoreError> {
        let fields = serde_json::to_value(record).map_err(|source| StoreError::Malformed {
            collection: INTERACTIONS_COLLECTION.to_string(),
            source,
        })?;
        self.store.add_record(INTERACTIONS_COLLECTION, fields).await?;

        self.update_user_preferences(record).await?;
        self.update_strain_counters(&record.strains_mentioned).await?;

        debug!(
            user_id = %record.user_id,
            query_type = record.query_type.label(),
            strains = record.strains_mentioned.len(),
            intent = %record.query_intent,
            "interaction recorded"
        );
        Ok(())
    }

    /// Merge the interaction's strain and effect sets into the user's
    /// preference document, creating it on first touch.
    async fn update_user_preferences(&self, record: &InteractionRecord) -> Result<(), StoreError> {
        let existing = self
            .store
            .query_by_field(
                PREFERENCES_COLLECTION,
                "user_id",
                &json!(record.user_id),
                1,
            )
            .await?;

        match existing.into_iter().next() {
            Some(doc) => {
                let strains = merged_set(
                    doc.fields.get("preferred_strains"),
                    &record.strains_mentioned,
                );
                let effects = merged_set(
                    doc.fields.get("preferred_effects"),
                    &record.effects_requested,
                );
                self.store
                    .update_record(
                        PREFERENCES_COLLECTION,
                        &doc.id,
                        json!({
                            "preferred_strains": strains,
                            "preferred_effects": effects,
                            "last_updated": Utc::now(),
                        }),
                    )
                    .await
            }
            None => {
                self.store
                    .add_record(
                        PREFERENCES_COLLECTION,
                        json!({
                            "user_id": record.user_id,
                            "preferred_strains": record.strains_mentioned,
                            "preferred_effects": record.effects_requested,
                            "last_updated": Utc::now(),
                        }),
                    )
                    .await?;
                Ok(())
            }
        }
    }

    async fn update_strain_counters(&self, strains: &[String]) -> Result<(), StoreError> {
        for strain in strains {
            let existing = self
                .store
                .query_by_field(STRAINS_COLLECTION, "strain_name", &json!(strain), 1)
                .await?;

            match existing.into_iter().next() {
                Some(doc) => {
                    self.store
                        .increment_field(STRAINS_COLLECTION, &doc.id, "total_requests", 1)
                        .await?;
                    self.store
                        .update_record(
                            STRAINS_COLLECTION,
                            &doc.id,
                            json!({ "last_requested": Utc::now() }),
                        )
                        .await?;
                }
                None => {
                    self.store
                        .add_record(
                            STRAINS_COLLECTION,
                            json!({
                                "strain_name": strain,
                                "total_requests": 1,
                                "last_requested": Utc::now(),
                            }),
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// Union of an existing JSON string array and new values, first-seen order.
fn merged_set(existing: Option<&serde_json::Value>, additions: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = existing
        .and_then(|value| value.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default();

    for addition in additions {
        if !merged.contains(addition) {
            merged.push(addition.clone());
        }
    }
    merged
}

// ── Tests ────────────────────────────────────────────────────────────────────
