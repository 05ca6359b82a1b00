// Pilot Engine: OpenAI-Compatible Provider
// Handles OpenAI, OpenRouter, Ollama, Azure OpenAI and any OpenAI-compatible
// chat/completions API, in JSON mode. Implements the LanguageModel trait.

use crate::atoms::error::EngineResult;
use crate::atoms::traits::{LanguageModel, ProviderError};
use crate::atoms::types::ConversationTurn;
use crate::engine::config::ClassifierSettings;
use crate::engine::http::{
    build_client, is_retryable_status, parse_retry_after, retry_delay, CircuitBreaker, MAX_RETRIES,
};
use crate::engine::text::truncate_str;
use async_trait::async_trait;
use log::{error, info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Consecutive failures before the circuit opens, and its cooldown.
const CIRCUIT_THRESHOLD: u32 = 5;
const CIRCUIT_COOLDOWN_SECS: u64 = 60;

pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    is_azure: bool,
    circuit: Arc<CircuitBreaker>,
}

impl OpenAiProvider {
    pub fn new(settings: &ClassifierSettings) -> EngineResult<Self> {
        let circuit = Arc::new(CircuitBreaker::new(CIRCUIT_THRESHOLD, CIRCUIT_COOLDOWN_SECS));
        Self::with_circuit(settings, circuit)
    }

    /// Build with a caller-owned breaker, e.g. one shared by several
    /// providers pointing at the same endpoint.
    pub fn with_circuit(settings: &ClassifierSettings, circuit: Arc<CircuitBreaker>) -> EngineResult<Self> {
        let base_url = settings.base_url.trim_end_matches('/').to_string();
        let is_azure = base_url.contains(".azure.com");
        Ok(OpenAiProvider {
            client: build_client(Duration::from_secs(settings.timeout_secs.max(1)))?,
            base_url,
            api_key: settings.api_key.clone().unwrap_or_default(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
            is_azure,
            circuit,
        })
    }

    fn url(&self) -> String {
        if self.is_azure && !self.base_url.contains('?') {
            format!("{}/chat/completions?api-version=2024-05-01-preview", self.base_url)
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    fn request_body(&self, messages: &[ConversationTurn]) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "response_format": {"type": "json_object"},
        })
    }

    /// Pull the assistant text out of a chat/completions response.
    fn extract_content(v: &Value) -> Result<String, ProviderError> {
        let choice = v["choices"]
            .get(0)
            .ok_or_else(|| ProviderError::Parse("response has no choices".into()))?;
        if choice["finish_reason"].as_str() == Some("length") {
            warn!("[openai] Completion truncated at max_tokens");
        }
        choice["message"]["content"]
            .as_str()
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ProviderError::Parse("empty message content".into()))
    }
}

#[async_trait]
impl LanguageModel for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    /// One JSON-mode completion. Azure uses an `api-key` header and an
    /// api-version query param; everyone else a Bearer token.
    async fn complete_json(&self, messages: &[ConversationTurn]) -> Result<String, ProviderError> {
        let url = self.url();
        let body = self.request_body(messages);
        info!("[openai] Request to {} model={}", url, self.model);

        if let Err(msg) = self.circuit.check() {
            return Err(ProviderError::Transport(msg));
        }

        let mut last_error = String::new();
        let mut last_status: u16 = 0;
        let mut retry_after: Option<u64> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_delay(attempt - 1, retry_after.take()).await;
                warn!("[openai] Retry {}/{} after {}ms", attempt, MAX_RETRIES, delay.as_millis());
            }

            let mut req = self.client.post(&url).header("Content-Type", "application/json");
            if self.is_azure {
                req = req.header("api-key", &self.api_key);
            } else {
                req = req.header("Authorization", format!("Bearer {}", self.api_key));
            }

            let response = match req.json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    self.circuit.record_failure();
                    last_error = format!("HTTP request failed: {}", e);
                    last_status = 0;
                    if attempt < MAX_RETRIES {
                        continue;
                    }
                    return Err(ProviderError::Transport(last_error));
                }
            };

            let status = response.status().as_u16();
            if !response.status().is_success() {
                last_status = status;
                retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                let body_text = response.text().await.unwrap_or_default();
                last_error = format!("API error {}: {}", status, truncate_str(&body_text, 200));
                error!("[openai] Error {}: {}", status, truncate_str(&body_text, 500));

                self.circuit.record_failure();

                if status == 401 || status == 403 {
                    return Err(ProviderError::Auth(last_error));
                }
                if is_retryable_status(status) && attempt < MAX_RETRIES {
                    continue;
                }
                return if status == 429 {
                    Err(ProviderError::RateLimited {
                        message: last_error,
                        retry_after_secs: retry_after.take(),
                    })
                } else {
                    Err(ProviderError::Api { status, message: last_error })
                };
            }

            let v: Value = response
                .json()
                .await
                .map_err(|e| ProviderError::Parse(format!("invalid JSON body: {}", e)))?;
            self.circuit.record_success();
            return Self::extract_content(&v);
        }

        match last_status {
            0 => Err(ProviderError::Transport(last_error)),
            429 => Err(ProviderError::RateLimited {
                message: last_error,
                retry_after_secs: retry_after,
            }),
            s => Err(ProviderError::Api { status: s, message: last_error }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(base_url: &str) -> OpenAiProvider {
        let settings = ClassifierSettings {
            api_key: Some("sk-test".into()),
            base_url: base_url.into(),
            ..ClassifierSettings::default()
        };
        OpenAiProvider::new(&settings).unwrap()
    }

    #[test]
    fn body_requests_json_mode() {
        let p = provider("https://api.openai.com/v1/");
        let body = p.request_body(&[ConversationTurn::system("sys"), ConversationTurn::user("hi")]);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(p.url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn azure_gets_api_version() {
        let p = provider("https://pawz.openai.azure.com/openai/deployments/gpt");
        assert!(p.is_azure);
        assert!(p.url().ends_with("?api-version=2024-05-01-preview"));
    }

    #[tokio::test]
    async fn open_circuit_fails_fast() {
        let settings = ClassifierSettings { api_key: Some("sk-test".into()), ..ClassifierSettings::default() };
        let circuit = Arc::new(CircuitBreaker::new(1, 60));
        circuit.record_failure();
        let p = OpenAiProvider::with_circuit(&settings, circuit).unwrap();
        match p.complete_json(&[ConversationTurn::user("hi")]).await {
            Err(ProviderError::Transport(msg)) => assert!(msg.contains("Circuit breaker open"), "{msg}"),
            other => panic!("expected an open circuit, got {other:?}"),
        }
    }

    #[test]
    fn providers_do_not_share_a_circuit_by_default() {
        let a = provider("https://api.openai.com/v1");
        let b = provider("https://api.openai.com/v1");
        for _ in 0..CIRCUIT_THRESHOLD {
            a.circuit.record_failure();
        }
        assert!(a.circuit.check().is_err());
        assert!(b.circuit.check().is_ok());
    }

    #[test]
    fn extract_content_variants() {
        let ok = json!({"choices": [{"message": {"content": "{\"actions\":[]}"}, "finish_reason": "stop"}]});
        assert_eq!(OpenAiProvider::extract_content(&ok).unwrap(), "{\"actions\":[]}");
        let empty = json!({"choices": []});
        assert!(matches!(OpenAiProvider::extract_content(&empty), Err(ProviderError::Parse(_))));
        let blank = json!({"choices": [{"message": {"content": "  "}}]});
        assert!(OpenAiProvider::extract_content(&blank).is_err());
    }
}
