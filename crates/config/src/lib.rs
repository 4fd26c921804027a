use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Persona ───────────────────────────────────────────────────────────────────

/// Identity of the assistant as injected into every system prompt.
///
/// The preamble is the fixed fallback returned by the context builder when a
/// user has no conversation history (or when fetching it fails), so it must
/// never be empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub name: String,
    /// Opening system-prompt text. Italian by default to match the shipped
    /// product copy.
    pub preamble: String,
    /// Sentence appended after the history blocks in a non-empty context.
    pub closing_instruction: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Strainwise".to_string(),
            preamble: "Sei Strainwise, un esperto genetista della cannabis. La tua \
                       specializzazione è nel breeding e backcrossing della cannabis, \
                       con una conoscenza approfondita di ogni strain esistente."
                .to_string(),
            closing_instruction:
                "Continua la conversazione tenendo conto di questo context.".to_string(),
        }
    }
}

// ── Memory / cache ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Capacity of the process-local response cache tier. Evicted keys are
    /// still served from the remote tier, so this only bounds resident memory.
    pub cache_capacity: usize,
    /// How many recent conversation entries feed the context builder.
    pub history_window: usize,
    /// How many of those entries are quoted verbatim in the prompt.
    pub recent_exchanges: usize,
    /// Per-quoted-response truncation, in characters.
    pub snippet_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 256,
            history_window: 20,
            recent_exchanges: 3,
            snippet_chars: 100,
        }
    }
}

// ── LLM ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API root. Overridden at load time by the
    /// `OPENAI_BASE_URL` environment variable when set.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Extra attempts after the first failed completion call. Only
    /// transport-level failures are retried; 4xx/shape errors are not.
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries.
    pub retry_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 500,
            max_retries: 2,
            retry_backoff_ms: 500,
            request_timeout_secs: 30,
        }
    }
}

// ── Storage / telemetry ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the JSONL document collections and the key-value
    /// blob file when the file-backed stores are used.
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: ".strainwise".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// ── Root config ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub persona: PersonaConfig,
    pub memory: MemoryConfig,
    pub llm: LlmConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        // Env override takes precedence over the config file.
        if let Ok(url) = env::var("OPENAI_BASE_URL") {
            if !url.is_empty() {
                config.llm.base_url = url;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.persona.name, "Strainwise");
        assert!(!cfg.persona.preamble.is_empty());
        assert_eq!(cfg.memory.cache_capacity, 256);
        assert_eq!(cfg.memory.history_window, 20);
        assert_eq!(cfg.memory.recent_exchanges, 3);
        assert_eq!(cfg.memory.snippet_chars, 100);
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
        assert_eq!(cfg.llm.max_tokens, 500);
        assert_eq!(cfg.llm.max_retries, 2);
        assert_eq!(cfg.storage.data_dir, ".strainwise");
        assert_eq!(cfg.telemetry.log_level, "info");
    }

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn load_from_partial_toml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(
            &path,
            r#"
[memory]
cache_capacity = 8
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.memory.cache_capacity, 8);
        // Everything else should be default
        assert_eq!(cfg.memory.history_window, 20);
        assert_eq!(cfg.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "this is not valid toml {{{{").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub/config.toml");

        let mut cfg = AppConfig::default();
        cfg.persona.name = "RoundTrip".to_string();
        cfg.memory.cache_capacity = 32;
        cfg.llm.model = "gpt-4o".to_string();
        cfg.storage.data_dir = "/tmp/sw-data".to_string();

        cfg.save_to(&path).unwrap();
        assert!(path.exists());

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.persona.name, "RoundTrip");
        assert_eq!(loaded.memory.cache_capacity, 32);
        assert_eq!(loaded.llm.model, "gpt-4o");
        assert_eq!(loaded.storage.data_dir, "/tmp/sw-data");
    }

    #[test]
    fn env_base_url_overrides_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("env.toml");
        fs::write(
            &path,
            r#"
[llm]
base_url = "https://from-file.example"
"#,
        )
        .unwrap();

        // SAFETY: test is single-threaded for this env var.
        unsafe { env::set_var("OPENAI_BASE_URL", "https://from-env.example") };
        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.llm.base_url, "https://from-env.example");
        unsafe { env::remove_var("OPENAI_BASE_URL") };
    }
}
