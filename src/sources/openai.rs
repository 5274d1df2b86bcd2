use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::config::AppConfig;
use crate::types::{BackendError, ChatReply, NarrativeBackend};

/// OpenAI chat-completions client used as the narrative backend.
///
/// Misconfiguration (disabled, missing key) surfaces as a typed error so the
/// narrative generator can resolve it to the deterministic fallback.
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    enabled: bool,
}

impl OpenAiClient {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_base_url(
            "https://api.openai.com",
            &config.openai_api_key,
            &config.openai_model,
            config.openai_enabled,
        )
    }

    /// Used by tests to point the client at a mock server.
    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: &str,
        model: &str,
        enabled: bool,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(25))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.into(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            enabled,
        }
    }

    pub async fn chat_completion(
        &self,
        prompt: &str,
        temperature: f64,
    ) -> Result<ChatReply, BackendError> {
        if !self.enabled {
            return Err(BackendError::Disabled);
        }
        if self.api_key.trim().is_empty() {
            return Err(BackendError::MissingApiKey);
        }

        let request_body = serde_json::json!({
            "model": self.model,
            "temperature": temperature,
            "messages": [
                { "role": "user", "content": prompt }
            ]
        });

        debug!("Requesting narrative from model {}", self.model);

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let root: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        let content = root
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| BackendError::Parse("missing message content".to_string()))?
            .to_string();

        let model_used = root
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.model)
            .to_string();

        Ok(ChatReply {
            content,
            model_used,
        })
    }
}

#[async_trait::async_trait]
impl NarrativeBackend for OpenAiClient {
    async fn chat(
        &self,
        prompt: &str,
        temperature: f64,
    ) -> Result<ChatReply, BackendError> {
        self.chat_completion(prompt, temperature).await
    }
}
