// src/selector/mod.rs
// Target-model resolution: manual lookup, cost-optimized selection, and the
// ranked-cost report behind it.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::cost::{self, CostEstimate};
use crate::error::RouterError;
use crate::tokens;
use crate::types::{ChatMessage, ModelDescriptor};

/// Look up a model by id. Inactive models are indistinguishable from
/// missing ones at this seam.
pub fn find_model<'a>(
    catalog: &'a [ModelDescriptor],
    id: &str,
) -> Result<&'a ModelDescriptor, RouterError> {
    catalog
        .iter()
        .find(|m| m.id == id && m.is_active)
        .ok_or_else(|| RouterError::UnknownModel(id.to_string()))
}

/// Enforce the routing invariant: the buffered prompt estimate must fit the
/// model's context window.
pub fn check_context_window(
    model: &ModelDescriptor,
    estimated_tokens: u32,
) -> Result<(), RouterError> {
    if estimated_tokens > model.context_window {
        return Err(RouterError::ContextWindowExceeded {
            model: model.id.clone(),
            estimated_tokens,
            context_window: model.context_window,
        });
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct RankedModel<'a> {
    pub model: &'a ModelDescriptor,
    pub estimate: CostEstimate,
}

/// All eligible models ranked by estimated cost, cheapest first.
///
/// Eligible = active and with a context window covering the buffered prompt
/// estimate. Ties break on lowest input price, then lexicographic model id,
/// so selection is reproducible.
pub fn rank_models<'a>(
    catalog: &'a [ModelDescriptor],
    messages: &[ChatMessage],
    expected_output_tokens: u32,
    max_cost: Option<Decimal>,
) -> Vec<RankedModel<'a>> {
    let prompt_estimate = tokens::estimate_messages_tokens(messages);

    let mut ranked: Vec<RankedModel<'a>> = catalog
        .iter()
        .filter(|m| m.is_active && prompt_estimate.buffered <= m.context_window)
        .map(|m| RankedModel {
            model: m,
            estimate: cost::estimate_cost(m, messages, expected_output_tokens),
        })
        .filter(|r| max_cost.is_none_or(|cap| r.estimate.breakdown.total_cost_usd <= cap))
        .collect();

    ranked.sort_by(|a, b| {
        (
            a.estimate.breakdown.total_cost_usd,
            a.model.input_price_per_million,
            a.model.id.as_str(),
        )
            .cmp(&(
                b.estimate.breakdown.total_cost_usd,
                b.model.input_price_per_million,
                b.model.id.as_str(),
            ))
    });
    ranked
}

/// Cost-optimized mode: the cheapest eligible model for this prompt.
pub fn cheapest_model<'a>(
    catalog: &'a [ModelDescriptor],
    messages: &[ChatMessage],
    expected_output_tokens: u32,
) -> Result<&'a ModelDescriptor, RouterError> {
    rank_models(catalog, messages, expected_output_tokens, None)
        .first()
        .map(|r| r.model)
        .ok_or_else(|| RouterError::NoEligibleModel {
            estimated_tokens: tokens::estimate_messages_tokens(messages).buffered,
        })
}

/// One row of the selection report.
#[derive(Debug, Clone, Serialize)]
pub struct RankedCost {
    pub model_id: String,
    pub provider: String,
    pub estimated_cost_usd: Decimal,
}

/// Cheapest-vs-most-expensive summary for a prompt, for callers that want
/// to show potential savings before committing to a model.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionReport {
    pub total_models: usize,
    pub cheapest: Option<RankedCost>,
    pub most_expensive: Option<RankedCost>,
    pub potential_savings_usd: Decimal,
    pub savings_percent: Decimal,
    pub models: Vec<RankedCost>,
}

pub fn selection_report(
    catalog: &[ModelDescriptor],
    messages: &[ChatMessage],
    expected_output_tokens: u32,
) -> SelectionReport {
    let ranked = rank_models(catalog, messages, expected_output_tokens, None);
    let rows: Vec<RankedCost> = ranked
        .iter()
        .map(|r| RankedCost {
            model_id: r.model.id.clone(),
            provider: r.model.provider.as_str().to_string(),
            estimated_cost_usd: r.estimate.breakdown.total_cost_usd,
        })
        .collect();

    let cheapest = rows.first().cloned();
    let most_expensive = rows.last().cloned();
    let savings = match (&cheapest, &most_expensive) {
        (Some(low), Some(high)) => high.estimated_cost_usd - low.estimated_cost_usd,
        _ => Decimal::ZERO,
    };
    let savings_percent = match &most_expensive {
        Some(high) if high.estimated_cost_usd > Decimal::ZERO => {
            (savings / high.estimated_cost_usd * dec!(100)).round_dp(2)
        }
        _ => Decimal::ZERO,
    };

    SelectionReport {
        total_models: rows.len(),
        cheapest,
        most_expensive,
        potential_savings_usd: savings,
        savings_percent,
        models: rows,
    }
}
