// src/types.rs
// Shared data model: requests, responses, model catalog, usage records

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProviderErrorKind;

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single message in an order-significant conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Optional sampling parameters forwarded to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Routing mode keyword accepted in the normalized request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestMode {
    #[serde(rename = "cost-optimized")]
    CostOptimized,
}

/// Normalized chat-completion request, as parsed by the HTTP collaborator.
///
/// Exactly one target selector is expected: `model` (manual), `mode`
/// (cost-optimized), or `models` (compare).
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub mode: Option<RequestMode>,
    #[serde(default)]
    pub models: Option<Vec<String>>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams { temperature: self.temperature, max_tokens: self.max_tokens }
    }
}

/// One independent slot in a batch. The caller may tag slots with its own
/// ids; untagged slots get a generated one in the outcome.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchSlot {
    #[serde(default)]
    pub id: Option<String>,
    pub messages: Vec<ChatMessage>,
}

/// One model applied independently to N message sequences.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<BatchSlot>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl BatchRequest {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams { temperature: self.temperature, max_tokens: self.max_tokens }
    }
}

/// Upstream provider identifier. Adapter selection keys off this, never
/// off runtime type inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Anthropic,
    Google,
    DeepSeek,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Google => "google",
            Self::DeepSeek => "deepseek",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openai" => Some(Self::OpenAi),
            "anthropic" => Some(Self::Anthropic),
            "google" => Some(Self::Google),
            "deepseek" => Some(Self::DeepSeek),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model in the catalog with pricing and limits. Loaded from the store at
/// startup/refresh; read-only during request processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub provider: ProviderId,
    pub input_price_per_million: Decimal,
    pub output_price_per_million: Decimal,
    pub context_window: u32,
    pub is_active: bool,
}

/// Token counts plus exact costs for one completed dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub input_cost_usd: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub output_cost_usd: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_cost_usd: Decimal,
}

/// Normalized chat-completion response returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub provider: ProviderId,
    pub content: String,
    pub finish_reason: Option<String>,
    pub usage: UsageInfo,
    pub latency_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Per-slot outcome of a compare or batch dispatch, index-aligned with the
/// caller's input.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SlotResult {
    Success {
        /// Caller-supplied slot id (batch mode).
        #[serde(skip_serializing_if = "Option::is_none")]
        slot_id: Option<String>,
        #[serde(flatten)]
        response: ChatResponse,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        slot_id: Option<String>,
        model: String,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        category: Option<ProviderErrorKind>,
    },
}

impl SlotResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn response(&self) -> Option<&ChatResponse> {
        match self {
            Self::Success { response, .. } => Some(response),
            Self::Error { .. } => None,
        }
    }
}

/// Aggregate result of a compare dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct CompareOutcome {
    pub comparison_id: Uuid,
    pub results: Vec<SlotResult>,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_cost_usd: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Aggregate result of a batch dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub batch_id: Uuid,
    pub total_requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<SlotResult>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_cost_usd: Decimal,
    pub total_latency_ms: i64,
    pub created_at: DateTime<Utc>,
}

/// Terminal status of a recorded dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Immutable record of one dispatch outcome, handed to the recorder.
/// Created in finalized form; corrections require a new record.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub model_id: String,
    pub provider: ProviderId,
    /// Links sibling records of one compare/batch dispatch.
    pub group_id: Option<Uuid>,
    pub prompt_text: String,
    pub response_text: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub input_cost_usd: Decimal,
    pub output_cost_usd: Decimal,
    pub total_cost_usd: Decimal,
    pub latency_ms: i64,
    pub status: RequestStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Per-account budget state. Mutated only through the ledger's
/// reserve/commit/release protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAccount {
    pub id: Uuid,
    /// None means no spending limit.
    pub spending_limit_usd: Option<Decimal>,
    pub total_spent_usd: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn chat_request_deserializes_all_selectors() {
        let manual: ChatRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"hi"}],"model":"gpt-4o-mini"}"#,
        )
        .unwrap();
        assert_eq!(manual.model.as_deref(), Some("gpt-4o-mini"));

        let optimized: ChatRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"hi"}],"mode":"cost-optimized"}"#,
        )
        .unwrap();
        assert_eq!(optimized.mode, Some(RequestMode::CostOptimized));

        let compare: ChatRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":"hi"}],"models":["a","b"],"temperature":0.2}"#,
        )
        .unwrap();
        assert_eq!(compare.models.as_ref().unwrap().len(), 2);
        assert_eq!(compare.sampling().temperature, Some(0.2));
    }

    #[test]
    fn usage_costs_serialize_as_json_numbers() {
        let usage = UsageInfo {
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
            input_cost_usd: dec!(0.00001500),
            output_cost_usd: dec!(0.00003000),
            total_cost_usd: dec!(0.00004500),
        };
        let v = serde_json::to_value(&usage).unwrap();
        assert!(v["total_cost_usd"].is_number());
    }

    #[test]
    fn provider_id_round_trips() {
        for p in [ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Google, ProviderId::DeepSeek]
        {
            assert_eq!(ProviderId::parse(p.as_str()), Some(p));
        }
        assert_eq!(ProviderId::parse("azure"), None);
    }
}
