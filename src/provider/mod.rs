// src/provider/mod.rs
// Provider adapter trait and adapter registry for multi-provider support

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RelayConfig;
use crate::error::ProviderError;
use crate::types::{ChatMessage, ModelDescriptor, ProviderId, SamplingParams};

pub mod anthropic;
pub mod deepseek;
pub mod google;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use deepseek::DeepSeekAdapter;
pub use google::GoogleAdapter;
pub use openai::OpenAiAdapter;

/// Normalized reply from any provider.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub content: String,
    pub finish_reason: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// True when the upstream omitted usage counts and the adapter had to
    /// estimate them locally.
    pub tokens_estimated: bool,
}

/// Uniform call contract over heterogeneous upstream APIs.
///
/// One outbound network call per invocation, no retries — retry policy
/// belongs to the orchestrator.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    async fn invoke(
        &self,
        model: &ModelDescriptor,
        messages: &[ChatMessage],
        params: &SamplingParams,
    ) -> Result<ProviderReply, ProviderError>;
}

/// Adapter registry keyed by provider id. Selection is by the model's
/// provider id, never by runtime type inspection.
#[derive(Clone)]
pub struct AdapterSet {
    adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>>,
}

impl AdapterSet {
    /// Build the four stock adapters from configuration.
    pub fn from_config(config: &RelayConfig) -> Self {
        let mut adapters: HashMap<ProviderId, Arc<dyn ProviderAdapter>> = HashMap::new();
        adapters.insert(
            ProviderId::OpenAi,
            Arc::new(OpenAiAdapter::new(config.openai.api_key.clone(), config.openai.base_url.clone())),
        );
        adapters.insert(
            ProviderId::Anthropic,
            Arc::new(AnthropicAdapter::new(
                config.anthropic.api_key.clone(),
                config.anthropic.base_url.clone(),
                config.default_max_tokens,
            )),
        );
        adapters.insert(
            ProviderId::Google,
            Arc::new(GoogleAdapter::new(config.google.api_key.clone(), config.google.base_url.clone())),
        );
        adapters.insert(
            ProviderId::DeepSeek,
            Arc::new(DeepSeekAdapter::new(
                config.deepseek.api_key.clone(),
                config.deepseek.base_url.clone(),
            )),
        );
        Self { adapters }
    }

    pub fn empty() -> Self {
        Self { adapters: HashMap::new() }
    }

    /// Replace or add an adapter. Tests use this to plug in mocks.
    pub fn insert(&mut self, provider: ProviderId, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(provider, adapter);
    }

    pub fn get(&self, provider: ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}

/// Fallback usage estimate for providers that omitted usage counts.
pub(crate) fn estimate_usage(messages: &[ChatMessage], content: &str) -> (u32, u32) {
    let input = crate::tokens::estimate_messages_tokens(messages).estimated;
    let output = crate::tokens::estimate_text_tokens(content);
    (input, output)
}
