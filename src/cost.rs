// src/cost.rs
// Pure pricing arithmetic. All money goes through Decimal; prices as low as
// $0.0375 per million tokens must survive 8 decimal places of rounding.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::tokens::{self, TokenEstimate};
use crate::types::{ChatMessage, ModelDescriptor};

const TOKENS_PER_PRICE_UNIT: Decimal = dec!(1_000_000);

/// User-visible precision for USD amounts.
pub const COST_DECIMAL_PLACES: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostBreakdown {
    pub input_cost_usd: Decimal,
    pub output_cost_usd: Decimal,
    pub total_cost_usd: Decimal,
}

/// Exact cost of a completed request from upstream-reported token counts.
pub fn calculate_cost(model: &ModelDescriptor, input_tokens: u32, output_tokens: u32) -> CostBreakdown {
    let input_cost = (Decimal::from(input_tokens) / TOKENS_PER_PRICE_UNIT
        * model.input_price_per_million)
        .round_dp(COST_DECIMAL_PLACES);
    let output_cost = (Decimal::from(output_tokens) / TOKENS_PER_PRICE_UNIT
        * model.output_price_per_million)
        .round_dp(COST_DECIMAL_PLACES);

    CostBreakdown {
        input_cost_usd: input_cost,
        output_cost_usd: output_cost,
        total_cost_usd: input_cost + output_cost,
    }
}

/// Pre-dispatch cost prediction for a prompt plus an expected-output-length
/// assumption. Uses the buffered token estimate so budget reservations err
/// on the high side.
#[derive(Debug, Clone, Copy)]
pub struct CostEstimate {
    pub input_tokens: TokenEstimate,
    pub expected_output_tokens: u32,
    pub breakdown: CostBreakdown,
}

pub fn estimate_cost(
    model: &ModelDescriptor,
    messages: &[ChatMessage],
    expected_output_tokens: u32,
) -> CostEstimate {
    let input_tokens = tokens::estimate_messages_tokens(messages);
    let breakdown = calculate_cost(model, input_tokens.buffered, expected_output_tokens);

    CostEstimate { input_tokens, expected_output_tokens, breakdown }
}
