//! System-prompt assembly from recent conversation history.
//!
//! The builder fetches a bounded window of conversation entries, distils
//! them into strain mentions, preference tags and the latest exchanges, and
//! composes a single prompt block. Output is deterministic given the same
//! fetched entries and bounded regardless of total history size, which caps
//! the completion-API prompt cost.

use std::sync::Arc;

use tracing::warn;

use strainwise_config::{MemoryConfig, PersonaConfig};

use crate::classify::{EFFECT_TAGS, TYPE_TAGS, detect_tags};
use crate::repository::ConversationLog;
use crate::schema::{ConversationEntry, truncate_str};

pub struct ContextBuilder {
    log: Arc<dyn ConversationLog>,
    persona: PersonaConfig,
    memory: MemoryConfig,
}

impl ContextBuilder {
    pub fn new(log: Arc<dyn ConversationLog>, persona: PersonaConfig, memory: MemoryConfig) -> Self {
        Self {
            log,
            persona,
            memory,
        }
    }

    /// The fixed persona preamble used when no history is available.
    pub fn default_preamble(&self) -> &str {
        &self.persona.preamble
    }

    /// Build the system prompt for a user. Any fetch failure degrades to the
    /// persona preamble; this never propagates an error to the caller.
    pub async fn build(&self, user_id: &str) -> String {
        let entries = match self
            .log
            .recent_for_user(user_id, self.memory.history_window)
            .await
        {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%user_id, error = %err, "context fetch failed, using persona preamble");
                return self.persona.preamble.clone();
            }
        };

        if entries.is_empty() {
            return self.persona.preamble.clone();
        }

        self.compose(&entries)
    }

    /// Pure assembly over fetched entries, newest first.
    fn compose(&self, entries: &[ConversationEntry]) -> String {
        let strains = collect_strains(entries);
        let mut effects: Vec<&str> = Vec::new();
        let mut types: Vec<&str> = Vec::new();
        for entry in entries {
            for tag in detect_tags(&entry.query, EFFECT_TAGS) {
                if !effects.contains(&tag) {
                    effects.push(tag);
                }
            }
            for tag in detect_tags(&entry.query, TYPE_TAGS) {
                if !types.contains(&tag) {
                    types.push(tag);
                }
            }
        }

        let mut prompt = format!("{}\n\n", self.persona.preamble);

        if !strains.is_empty() {
            prompt.push_str("CONTEXT DA CONVERSAZIONI PRECEDENTI:\n");
            prompt.push_str(&format!(
                "- L'utente ha recentemente discusso questi strain: {}\n",
                strains.join(", ")
            ));
        }
        if !effects.is_empty() {
            prompt.push_str(&format!(
                "- Ha mostrato interesse per effetti: {}\n",
                effects.join(", ")
            ));
        }
        if !types.is_empty() {
            prompt.push_str(&format!("- Preferisce varietà: {}\n", types.join(", ")));
        }

        prompt.push_str(&format!(
            "\nUltime {} interazioni per context:\n",
            self.memory.recent_exchanges
        ));
        for (i, entry) in entries.iter().take(self.memory.recent_exchanges).enumerate() {
            prompt.push_str(&format!("{}. User: {}\n", i + 1, entry.query));
            prompt.push_str(&format!(
                "   You: {}...\n\n",
                truncate_str(&entry.response, self.memory.snippet_chars)
            ));
        }

        prompt.push('\n');
        prompt.push_str(&self.persona.closing_instruction);
        prompt
    }
}

/// Union of strain mentions across the window, first-seen order.
fn collect_strains(entries: &[ConversationEntry]) -> Vec<String> {
    let mut strains: Vec<String> = Vec::new();
    for entry in entries {
        for strain in &entry.strains_mentioned {
            if !strains.contains(strain) {
                strains.push(strain.clone());
            }
        }
    }
    strains
}

// ── Tests ────────────────────────────────────────────────────────────────────
