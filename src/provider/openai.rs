// src/provider/openai.rs
// OpenAI Chat Completions API adapter

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::{ProviderAdapter, ProviderReply, estimate_usage};
use crate::error::ProviderError;
use crate::types::{ChatMessage, ModelDescriptor, SamplingParams};

pub struct OpenAiAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self { client: Client::new(), api_key, base_url }
    }

    fn build_body(model: &ModelDescriptor, messages: &[ChatMessage], params: &SamplingParams) -> Value {
        let mut body = json!({
            "model": model.id,
            "messages": messages,
        });
        if let Some(temperature) = params.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = params.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn invoke(
        &self,
        model: &ModelDescriptor,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<ProviderReply, ProviderError> {
        let body = Self::build_body(model, messages, params);

        debug!("OpenAI request: model={}", model.id);

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
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
            .map_err(|e| ProviderError::malformed(format!("invalid JSON from OpenAI: {e}")))?;

        let content = raw["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::malformed("no content in OpenAI response"))?
            .to_string();

        let finish_reason = raw["choices"][0]["finish_reason"].as_str().map(String::from);

        let usage = &raw["usage"];
        let (input_tokens, output_tokens, tokens_estimated) = match (
            usage["prompt_tokens"].as_u64(),
            usage["completion_tokens"].as_u64(),
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
