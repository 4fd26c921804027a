//! Completion-API client.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint. Errors are
//! split into the three categories the caller acts on: missing credential,
//! transport failure (the only retryable one), and an upstream body that
//! doesn't have the expected shape.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::warn;

use strainwise_config::LlmConfig;

#[derive(Debug, Error)]
pub enum CompletionError {
    /// No API credential is available; checked before any network I/O.
    #[error("completion API credential not configured")]
    NotConfigured,
    /// Network or upstream availability failure. Retryable.
    #[error("completion API unavailable: {0}")]
    RemoteUnavailable(String),
    /// The upstream answered but the body was not the expected shape.
    #[error("malformed completion response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// One completion call: system prompt + single user message → text.
    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, CompletionError>;
}

// ── OpenAI-compatible client ──────────────────────────────────────────────────

pub struct OpenAiClient {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// `api_key` of `None` (or blank) makes every call fail fast with
    /// [`CompletionError::NotConfigured`].
    pub fn new(config: LlmConfig, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        let api_key = api_key.filter(|key| !key.trim().is_empty());
        Self {
            client,
            config,
            api_key,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionClient for OpenAiClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
    ) -> Result<String, CompletionError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(CompletionError::NotConfigured);
        };

        let payload = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_message}
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| CompletionError::RemoteUnavailable(err.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(CompletionError::RemoteUnavailable(format!(
                "upstream status {status}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| CompletionError::Malformed(err.to_string()))?;

        if !status.is_success() {
            return Err(CompletionError::Malformed(format!(
                "upstream status {status}: {body}"
            )));
        }

        extract_content(&body)
    }
}

/// Pull `choices[0].message.content` out of a chat-completions body.
pub fn extract_content(body: &Value) -> Result<String, CompletionError> {
    body.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| CompletionError::Malformed("missing choices[0].message.content".to_string()))
}

// ── Bounded retry ─────────────────────────────────────────────────────────────

/// Call `complete`, retrying only on [`CompletionError::RemoteUnavailable`]
/// with exponential backoff (`backoff_ms * 2^attempt`). `max_retries` is the
/// number of attempts *after* the first.
pub async fn complete_with_retry(
    client: &dyn CompletionClient,
    system_prompt: &str,
    user_message: &str,
    max_retries: u32,
    backoff_ms: u64,
) -> Result<String, CompletionError> {
    let mut attempt = 0u32;
    loop {
        match client.complete(system_prompt, user_message).await {
            Ok(text) => return Ok(text),
            Err(CompletionError::RemoteUnavailable(reason)) if attempt < max_retries => {
                let delay = backoff_ms.saturating_mul(1 << attempt);
                warn!(attempt = attempt + 1, max_retries, %reason, delay_ms = delay, "completion call failed, retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn extract_content_from_well_formed_body() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "ciao"}}]
        });
        assert_eq!(extract_content(&body).unwrap(), "ciao");
    }

    #[test]
    fn extract_content_rejects_wrong_shapes() {
        for body in [
            json!({}),
            json!({"choices": []}),
            json!({"choices": [{"message": {}}]}),
            json!({"choices": [{"message": {"content": 42}}]}),
        ] {
            assert!(matches!(
                extract_content(&body),
                Err(CompletionError::Malformed(_))
            ));
        }
    }

    #[test]
    fn missing_key_means_not_configured() {
        let client = OpenAiClient::new(LlmConfig::default(), None);
        assert!(!client.is_configured());
        let blank = OpenAiClient::new(LlmConfig::default(), Some("   ".to_string()));
        assert!(!blank.is_configured());
        let keyed = OpenAiClient::new(LlmConfig::default(), Some("sk-test".to_string()));
        assert!(keyed.is_configured());
    }

    #[tokio::test]
    async fn unconfigured_client_fails_before_any_network_io() {
        // base_url points nowhere; the call must not even try to resolve it.
        let mut config = LlmConfig::default();
        config.base_url = "http://255.255.255.255:1".to_string();
        let client = OpenAiClient::new(config, None);
        let err = client.complete("sys", "user").await.unwrap_err();
        assert!(matches!(err, CompletionError::NotConfigured));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let mut config = LlmConfig::default();
        config.base_url = "https://api.example.com/v1/".to_string();
        let client = OpenAiClient::new(config, Some("k".to_string()));
        assert_eq!(client.endpoint(), "https://api.example.com/v1/chat/completions");
    }

    /// Fails with RemoteUnavailable `failures` times, then succeeds.
    struct FlakyClient {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CompletionClient for FlakyClient {
        async fn complete(&self, _: &str, _: &str) -> Result<String, CompletionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(CompletionError::RemoteUnavailable("flaky".to_string()))
            } else {
                Ok("ok".to_string())
            }
        }
    }

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let client = FlakyClient {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let text = complete_with_retry(&client, "s", "u", 2, 1).await.unwrap();
        assert_eq!(text, "ok");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let client = FlakyClient {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let err = complete_with_retry(&client, "s", "u", 2, 1).await.unwrap_err();
        assert!(matches!(err, CompletionError::RemoteUnavailable(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    /// Always malformed; must never be retried.
    struct MalformedClient {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CompletionClient for MalformedClient {
        async fn complete(&self, _: &str, _: &str) -> Result<String, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CompletionError::Malformed("bad".to_string()))
        }
    }

    #[tokio::test]
    async fn retry_does_not_apply_to_malformed_responses() {
        let client = MalformedClient {
            calls: AtomicU32::new(0),
        };
        let err = complete_with_retry(&client, "s", "u", 5, 1).await.unwrap_err();
        assert!(matches!(err, CompletionError::Malformed(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }
}
