use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::AgentConfig;
use crate::error::AgentError;

/// Messages handed to the generation capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptPayload {
    pub system: String,
    pub user: String,
}

/// Turns a prompt into free-form text. Output is untrusted.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &PromptPayload) -> Result<String, AgentError>;
}

/// OpenAI-compatible chat completions client.
pub struct Brain {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Brain {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.into(),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| AgentError::PlanGeneration("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(
            api_key,
            config.openai_model.clone(),
            config.openai_base_url.clone(),
            config.generation_timeout,
        ))
    }
}

#[async_trait]
impl Generator for Brain {
    async fn generate(&self, prompt: &PromptPayload) -> Result<String, AgentError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": prompt.system},
                    {"role": "user", "content": prompt.user},
                ],
                "temperature": 0.3,
            }))
            .send()
            .await
            .map_err(|e| AgentError::PlanGeneration(format!("generation request failed: {e}")))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::PlanGeneration(format!("unreadable generation response: {e}")))?;

        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("unknown API error");
            error!(%status, error_message = message, "generation API error");
            return Err(AgentError::PlanGeneration(format!(
                "generation API error ({status}): {message}"
            )));
        }

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AgentError::PlanGeneration("no content in generation response".into()))?;

        debug!(content, "model replied");
        Ok(content.to_string())
    }
}
