//! Per-session transcript, separate from the durable cache and the remote
//! conversation log. Holds the ordered query/response pairs of one app run
//! for immediate UI replay and analytics submission.

use chrono::Utc;

use crate::schema::{ChatMessage, SessionTurn};

#[derive(Debug, Default)]
pub struct SessionMemory {
    user_id: Option<String>,
    session_id: Option<String>,
    turns: Vec<SessionTurn>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh session for `user_id`. The session id is derived from
    /// the current time; any prior transcript is discarded.
    pub fn initialize(&mut self, user_id: impl Into<String>) {
        self.user_id = Some(user_id.into());
        self.session_id = Some(format!("session_{}", Utc::now().timestamp_millis()));
        self.turns.clear();
    }

    /// Append a turn unconditionally; repeated identical turns are kept.
    pub fn record(&mut self, query: impl Into<String>, response: impl Into<String>, cached: bool) {
        self.turns.push(SessionTurn {
            query: query.into(),
            response: response.into(),
            cached,
        });
    }

    pub fn transcript(&self) -> &[SessionTurn] {
        &self.turns
    }

    /// Flatten the transcript into alternating user/assistant messages.
    pub fn context_messages(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .flat_map(|turn| {
                [
                    ChatMessage {
                        role: "user".to_string(),
                        content: turn.query.clone(),
                    },
                    ChatMessage {
                        role: "assistant".to_string(),
                        content: turn.response.clone(),
                    },
                ]
            })
            .collect()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Empty the transcript. Identity is kept so recording can continue
    /// within the same session.
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
