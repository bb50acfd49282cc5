// src/provider/anthropic.rs
// Anthropic Messages API adapter

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::{ProviderAdapter, ProviderReply, estimate_usage};
use crate::error::ProviderError;
use crate::types::{ChatMessage, ModelDescriptor, Role, SamplingParams};

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: Client,
    api_key: String,
    base_url: String,
    /// The Messages API requires max_tokens; used when the caller sets none.
    default_max_tokens: u32,
}

impl AnthropicAdapter {
    pub fn new(api_key: String, base_url: String, default_max_tokens: u32) -> Self {
        Self { client: Client::new(), api_key, base_url, default_max_tokens }
    }

    /// System messages are lifted out of the message array into the
    /// top-level `system` field; the rest pass through in order.
    fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
        let mut system = None;
        let mut api_messages = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system = Some(msg.content.clone()),
                _ => api_messages.push(json!({
                    "role": msg.role.as_str(),
                    "content": msg.content,
                })),
            }
        }

        (system, api_messages)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn invoke(
        &self,
        model: &ModelDescriptor,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<ProviderReply, ProviderError> {
        let (system, api_messages) = Self::split_system(messages);

        let mut body = json!({
            "model": model.id,
            "messages": api_messages,
            "max_tokens": params.max_tokens.unwrap_or(self.default_max_tokens),
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }

        debug!("Anthropic request: model={}", model.id);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &error_text));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::malformed(format!("invalid JSON from Anthropic: {e}")))?;

        let content = raw["content"][0]["text"]
            .as_str()
            .ok_or_else(|| ProviderError::malformed("no content in Anthropic response"))?
            .to_string();

        let finish_reason = raw["stop_reason"].as_str().map(String::from);

        let usage = &raw["usage"];
        let (input_tokens, output_tokens, tokens_estimated) = match (
            usage["input_tokens"].as_u64(),
            usage["output_tokens"].as_u64(),
        ) {
            (Some(input), Some(output)) => (input as u32, output as u32, false),
            _ => {
                let (input, output) = estimate_usage(messages, &content);
                (input, output, true)
            }
        };

        Ok(ProviderReply { content, finish_reason, input_tokens, output_tokens, tokens_estimated })
    }
}
