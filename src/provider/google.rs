// src/provider/google.rs
// Google Gemini generateContent API adapter

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use super::{ProviderAdapter, ProviderReply, estimate_usage};
use crate::error::ProviderError;
use crate::types::{ChatMessage, ModelDescriptor, Role, SamplingParams};

pub struct GoogleAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GoogleAdapter {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self { client: Client::new(), api_key, base_url }
    }

    /// Gemini has no system role: system and user both map to `user`,
    /// assistant maps to `model`.
    fn build_contents(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::Assistant => "model",
                    Role::System | Role::User => "user",
                };
                json!({
                    "role": role,
                    "parts": [{ "text": msg.content }],
                })
            })
            .collect()
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn invoke(
        &self,
        model: &ModelDescriptor,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<ProviderReply, ProviderError> {
        let mut generation_config = json!({});
        if let Some(temperature) = params.temperature {
            generation_config["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = params.max_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }

        let body = json!({
            "contents": Self::build_contents(messages),
            "generationConfig": generation_config,
        });

        debug!("Google request: model={}", model.id);

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model.id);
        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.as_str())])
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
            .map_err(|e| ProviderError::malformed(format!("invalid JSON from Google: {e}")))?;

        let candidate = raw["candidates"]
            .get(0)
            .ok_or_else(|| ProviderError::malformed("no candidates in Google response"))?;

        let content = candidate["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| ProviderError::malformed("no content parts in Google response"))?
            .to_string();

        let finish_reason = candidate["finishReason"].as_str().map(String::from);

        let usage = &raw["usageMetadata"];
        let (input_tokens, output_tokens, tokens_estimated) = match (
            usage["promptTokenCount"].as_u64(),
            usage["candidatesTokenCount"].as_u64(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_to_gemini_roles() {
        let messages = vec![
            ChatMessage::system("context"),
            ChatMessage::user("question"),
            ChatMessage::new(Role::Assistant, "answer"),
        ];
        let contents = GoogleAdapter::build_contents(&messages);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "user");
        assert_eq!(contents[2]["role"], "model");
        assert_eq!(contents[1]["parts"][0]["text"], "question");
    }
}
