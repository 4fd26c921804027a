use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{classify_query, extract_strains};

/// Coarse topic of a user query, derived by keyword classification.
///
/// | Type          | Trigger keywords (Italian + English)            |
/// |---------------|-------------------------------------------------|
/// | `Breeding`    | incrocio, cross, breed                          |
/// | `Effects`     | effetti, effects, high                          |
/// | `Cultivation` | coltiv, grow, fioritura                         |
/// | `Medical`     | medical, terapeutic, cbd                        |
/// | `Terpenes`    | terpeni, sapore, aroma                          |
/// | `General`     | everything else                                 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Breeding,
    Effects,
    Cultivation,
    Medical,
    Terpenes,
    General,
}

impl QueryType {
    /// Canonical lowercase label used in analytics rollups and log lines.
    pub fn label(self) -> &'static str {
        match self {
            Self::Breeding => "breeding",
            Self::Effects => "effects",
            Self::Cultivation => "cultivation",
            Self::Medical => "medical",
            Self::Terpenes => "terpenes",
            Self::General => "general",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "breeding" => Some(Self::Breeding),
            "effects" => Some(Self::Effects),
            "cultivation" => Some(Self::Cultivation),
            "medical" => Some(Self::Medical),
            "terpenes" => Some(Self::Terpenes),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// One cached query/response pair, persisted in the `ai_responses` collection.
///
/// `query_hash` is the fuzzy cache key from [`crate::normalizer::query_hash`];
/// several textually different queries can map to the same record by design.
/// Field names stay camelCase on the wire for compatibility with existing
/// collections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRecord {
    pub query_hash: String,
    pub user_id: String,
    pub session_id: String,
    pub user_query: String,
    pub ai_response: String,
    pub strains_mentioned: Vec<String>,
    pub query_type: QueryType,
    pub response_length: usize,
    pub has_breeding_info: bool,
    pub has_medical_info: bool,
    /// Incremented on every cache hit; never less than 1.
    pub access_count: u64,
    pub timestamp: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl QueryRecord {
    /// Build a fresh record from a completed query/response exchange,
    /// deriving the classification fields from the text.
    pub fn from_exchange(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        query: &str,
        response: &str,
        query_hash: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            query_hash: query_hash.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            user_query: query.to_string(),
            ai_response: response.to_string(),
            strains_mentioned: extract_strains(response),
            query_type: classify_query(query),
            response_length: response.chars().count(),
            has_breeding_info: response.contains("incrocio") || response.contains("cross"),
            has_medical_info: response.contains("medical") || response.contains("terapeutico"),
            access_count: 1,
            timestamp: now,
            last_accessed: now,
        }
    }
}

/// One turn of the append-only conversation log (`conversations` collection).
/// Created once per exchange, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub user_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub query: String,
    pub response: String,
    pub strains_mentioned: Vec<String>,
}

/// One turn of the in-process session transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTurn {
    pub query: String,
    pub response: String,
    /// Whether the response was served from the cache.
    pub cached: bool,
}

/// Role-tagged message for replaying a session to a chat UI or API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Truncate `s` to at most `max_chars` Unicode scalar values, returning a
/// sub-slice. Shared helper used by the context builder.
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
