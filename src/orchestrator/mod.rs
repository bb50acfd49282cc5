// src/orchestrator/mod.rs
// Dispatch orchestration: drives each target through budget reservation,
// the coalescing cache, the provider adapter, and cost commitment, then
// fans compare/batch out across concurrent slots with order-preserving
// assembly and partial-failure tolerance.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::budget::BudgetLedger;
use crate::cache::{self, CacheOutcome, ResponseCache};
use crate::config::RelayConfig;
use crate::cost;
use crate::error::{ProviderError, ProviderErrorKind, RouterError};
use crate::provider::AdapterSet;
use crate::recorder::RequestRecorder;
use crate::selector::{self, SelectionReport};
use crate::store::Store;
use crate::tokens;
use crate::types::{
    BatchOutcome, BatchRequest, ChatMessage, ChatRequest, ChatResponse, CompareOutcome,
    ModelDescriptor, RequestMode, RequestStatus, SamplingParams, SlotResult, UsageInfo,
    UsageRecord,
};

/// Slots dispatched at once within one compare/batch call. Slots beyond the
/// window have not started yet and can still be cancelled by a caller-level
/// deadline.
const MAX_CONCURRENT_DISPATCHES: usize = 8;

pub struct Orchestrator {
    adapters: AdapterSet,
    cache: ResponseCache,
    ledger: BudgetLedger,
    recorder: Arc<dyn RequestRecorder>,
    store: Arc<dyn Store>,
    call_timeout: Duration,
    expected_output_tokens: u32,
}

impl Orchestrator {
    pub fn new(
        config: &RelayConfig,
        store: Arc<dyn Store>,
        cache: ResponseCache,
        recorder: Arc<dyn RequestRecorder>,
    ) -> Self {
        Self {
            adapters: AdapterSet::from_config(config),
            cache,
            ledger: BudgetLedger::new(store.clone()),
            recorder,
            store,
            call_timeout: config.call_timeout(),
            expected_output_tokens: config.expected_output_tokens,
        }
    }

    /// Swap the adapter registry. Tests use this to plug in mocks.
    pub fn with_adapters(mut self, adapters: AdapterSet) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn ledger(&self) -> &BudgetLedger {
        &self.ledger
    }

    async fn catalog(&self) -> Result<Vec<ModelDescriptor>, RouterError> {
        self.store
            .active_models()
            .await
            .map_err(|e| RouterError::Store(e.to_string()))
    }

    /// Single-target entry point: manual or cost-optimized mode.
    pub async fn chat(
        &self,
        account_id: Uuid,
        request: &ChatRequest,
    ) -> Result<ChatResponse, RouterError> {
        let catalog = self.catalog().await?;
        let params = request.sampling();

        let model = match (&request.model, &request.mode) {
            (Some(id), _) => selector::find_model(&catalog, id)?.clone(),
            (None, Some(RequestMode::CostOptimized)) => {
                let chosen =
                    selector::cheapest_model(&catalog, &request.messages, self.expected_output_tokens)?;
                info!(model = %chosen.id, "cost-optimized selection");
                chosen.clone()
            }
            (None, None) => {
                return Err(RouterError::InvalidTarget(
                    "specify `model` or `mode`; use compare() for a model list".into(),
                ));
            }
        };

        self.dispatch_one(account_id, &model, &request.messages, &params, None)
            .await
    }

    /// Cost ranking for a prompt without dispatching anything.
    pub async fn selection_report(
        &self,
        messages: &[ChatMessage],
    ) -> Result<SelectionReport, RouterError> {
        let catalog = self.catalog().await?;
        Ok(selector::selection_report(&catalog, messages, self.expected_output_tokens))
    }

    /// Compare mode: one prompt fanned out across several models. Slots are
    /// independent; output order equals the order of `model_ids`.
    pub async fn compare(
        &self,
        account_id: Uuid,
        messages: &[ChatMessage],
        model_ids: &[String],
        params: &SamplingParams,
        deadline: Option<Duration>,
    ) -> Result<CompareOutcome, RouterError> {
        if model_ids.is_empty() {
            return Err(RouterError::InvalidTarget("compare requires at least one model".into()));
        }

        let catalog = self.catalog().await?;
        let comparison_id = Uuid::new_v4();
        let created_at = Utc::now();
        let cancel = deadline_token(deadline);

        info!(%comparison_id, models = model_ids.len(), "starting comparison");

        let slots = model_ids.iter().map(|id| {
            let catalog = &catalog;
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return slot_error(None, id.clone(), deadline_elapsed());
                }
                let model = match selector::find_model(catalog, id) {
                    Ok(model) => model,
                    Err(e) => return slot_error(None, id.clone(), e),
                };
                match self
                    .dispatch_one(account_id, model, messages, params, Some(comparison_id))
                    .await
                {
                    Ok(response) => SlotResult::Success { slot_id: None, response },
                    Err(e) => slot_error(None, id.clone(), e),
                }
            }
        });

        let results: Vec<SlotResult> =
            stream::iter(slots).buffered(MAX_CONCURRENT_DISPATCHES).collect().await;

        let (succeeded, failed, total_cost) = tally(&results);
        if succeeded == 0 {
            return Err(RouterError::AllSlotsFailed { failed });
        }

        info!(%comparison_id, succeeded, failed, %total_cost, "comparison complete");

        Ok(CompareOutcome {
            comparison_id,
            results,
            succeeded,
            failed,
            total_cost_usd: total_cost,
            created_at,
        })
    }

    /// Batch mode: one model applied independently to each message
    /// sequence. Output slot i corresponds to input slot i.
    pub async fn batch(
        &self,
        account_id: Uuid,
        request: &BatchRequest,
        deadline: Option<Duration>,
    ) -> Result<BatchOutcome, RouterError> {
        let model_id = request
            .model
            .as_deref()
            .ok_or_else(|| RouterError::InvalidTarget("batch requires a model".into()))?;
        if request.requests.is_empty() {
            return Err(RouterError::InvalidTarget("batch requires at least one request".into()));
        }

        let catalog = self.catalog().await?;
        let model = selector::find_model(&catalog, model_id)?.clone();
        let params = request.sampling();

        let batch_id = Uuid::new_v4();
        let created_at = Utc::now();
        let wall_clock = Instant::now();
        let cancel = deadline_token(deadline);

        info!(%batch_id, requests = request.requests.len(), model = %model.id, "starting batch");

        let slots = request.requests.iter().map(|slot| {
            let slot_id = slot.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
            let model = &model;
            let params = &params;
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return slot_error(Some(slot_id), model.id.clone(), deadline_elapsed());
                }
                match self
                    .dispatch_one(account_id, model, &slot.messages, params, Some(batch_id))
                    .await
                {
                    Ok(response) => SlotResult::Success { slot_id: Some(slot_id), response },
                    Err(e) => slot_error(Some(slot_id), model.id.clone(), e),
                }
            }
        });

        let results: Vec<SlotResult> =
            stream::iter(slots).buffered(MAX_CONCURRENT_DISPATCHES).collect().await;

        let (succeeded, failed, total_cost) = tally(&results);
        if succeeded == 0 {
            return Err(RouterError::AllSlotsFailed { failed });
        }

        let total_latency_ms = wall_clock.elapsed().as_millis() as i64;
        info!(%batch_id, succeeded, failed, %total_cost, total_latency_ms, "batch complete");

        Ok(BatchOutcome {
            batch_id,
            total_requests: request.requests.len(),
            succeeded,
            failed,
            results,
            total_cost_usd: total_cost,
            total_latency_ms,
            created_at,
        })
    }

    /// One target through the full pipeline: reserve, cache/coalesce,
    /// invoke, cost, commit-or-release, record.
    async fn dispatch_one(
        &self,
        account_id: Uuid,
        model: &ModelDescriptor,
        messages: &[ChatMessage],
        params: &SamplingParams,
        group_id: Option<Uuid>,
    ) -> Result<ChatResponse, RouterError> {
        let created_at = Utc::now();
        let clock = Instant::now();

        let prompt_estimate = tokens::estimate_messages_tokens(messages);
        selector::check_context_window(model, prompt_estimate.buffered)?;

        let estimate =
            cost::calculate_cost(model, prompt_estimate.buffered, self.expected_output_tokens);
        let reservation = self.ledger.reserve(account_id, estimate.total_cost_usd).await?;

        let adapter = match self.adapters.get(model.provider) {
            Some(adapter) => adapter,
            None => {
                self.ledger.release(reservation).await;
                return Err(ProviderError::new(
                    ProviderErrorKind::UpstreamUnavailable,
                    format!("no adapter registered for provider {}", model.provider),
                )
                .into());
            }
        };

        let key = cache::fingerprint(&model.id, messages, params);
        let ttl = cache::ttl_for_model(model);

        let (result, outcome) = self
            .cache
            .get_or_compute(&key, ttl, || {
                let adapter = adapter.clone();
                let model = model.clone();
                let messages = messages.to_vec();
                let params = params.clone();
                let call_timeout = self.call_timeout;
                async move {
                    let reply = match tokio::time::timeout(
                        call_timeout,
                        adapter.invoke(&model, &messages, &params),
                    )
                    .await
                    {
                        Ok(Ok(reply)) => reply,
                        Ok(Err(e)) => return Err(e),
                        Err(_) => {
                            return Err(ProviderError::timeout(format!(
                                "provider call exceeded {}s",
                                call_timeout.as_secs()
                            )));
                        }
                    };

                    if reply.tokens_estimated {
                        debug!(model = %model.id, "upstream omitted usage; token counts estimated");
                    }

                    let costs = cost::calculate_cost(&model, reply.input_tokens, reply.output_tokens);
                    Ok(ChatResponse {
                        id: Uuid::new_v4().to_string(),
                        model: model.id.clone(),
                        provider: model.provider,
                        content: reply.content,
                        finish_reason: reply.finish_reason,
                        usage: UsageInfo {
                            prompt_tokens: reply.input_tokens,
                            completion_tokens: reply.output_tokens,
                            total_tokens: reply.input_tokens + reply.output_tokens,
                            input_cost_usd: costs.input_cost_usd,
                            output_cost_usd: costs.output_cost_usd,
                            total_cost_usd: costs.total_cost_usd,
                        },
                        latency_ms: clock.elapsed().as_millis() as i64,
                        created_at,
                    })
                }
            })
            .await;

        match outcome {
            CacheOutcome::Computed => match result {
                Ok(response) => {
                    self.ledger.commit(reservation, response.usage.total_cost_usd).await;
                    self.emit(success_record(account_id, model, messages, &response, group_id));
                    Ok(response)
                }
                Err(e) => {
                    self.ledger.release(reservation).await;
                    warn!(model = %model.id, "dispatch failed: {e}");
                    self.emit(error_record(
                        account_id,
                        model,
                        messages,
                        &e,
                        group_id,
                        created_at,
                        clock.elapsed(),
                    ));
                    Err(e.into())
                }
            },
            // Served without an upstream call of our own: the owner of the
            // computation was billed and recorded; this hold rolls back.
            CacheOutcome::Hit | CacheOutcome::Coalesced => {
                self.ledger.release(reservation).await;
                result.map_err(Into::into)
            }
        }
    }

    fn emit(&self, record: UsageRecord) {
        let recorder = self.recorder.clone();
        tokio::spawn(async move {
            recorder.record(record).await;
        });
    }
}

fn deadline_token(deadline: Option<Duration>) -> CancellationToken {
    let token = CancellationToken::new();
    if let Some(deadline) = deadline {
        let timer = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            timer.cancel();
        });
    }
    token
}

fn deadline_elapsed() -> RouterError {
    ProviderError::timeout("caller deadline elapsed before dispatch started").into()
}

fn slot_error(slot_id: Option<String>, model: String, error: RouterError) -> SlotResult {
    let category = match &error {
        RouterError::Provider(e) => Some(e.kind),
        _ => None,
    };
    SlotResult::Error { slot_id, model, error: error.to_string(), category }
}

fn tally(results: &[SlotResult]) -> (usize, usize, rust_decimal::Decimal) {
    let succeeded = results.iter().filter(|r| r.is_success()).count();
    let failed = results.len() - succeeded;
    let total_cost = results
        .iter()
        .filter_map(|r| r.response())
        .map(|r| r.usage.total_cost_usd)
        .sum();
    (succeeded, failed, total_cost)
}

fn prompt_text(messages: &[ChatMessage]) -> String {
    serde_json::to_string(messages).unwrap_or_default()
}

fn success_record(
    account_id: Uuid,
    model: &ModelDescriptor,
    messages: &[ChatMessage],
    response: &ChatResponse,
    group_id: Option<Uuid>,
) -> UsageRecord {
    UsageRecord {
        id: Uuid::new_v4(),
        account_id,
        model_id: model.id.clone(),
        provider: model.provider,
        group_id,
        prompt_text: prompt_text(messages),
        response_text: Some(response.content.clone()),
        input_tokens: response.usage.prompt_tokens,
        output_tokens: response.usage.completion_tokens,
        total_tokens: response.usage.total_tokens,
        input_cost_usd: response.usage.input_cost_usd,
        output_cost_usd: response.usage.output_cost_usd,
        total_cost_usd: response.usage.total_cost_usd,
        latency_ms: response.latency_ms,
        status: RequestStatus::Success,
        error_message: None,
        created_at: response.created_at,
        completed_at: Utc::now(),
    }
}

fn error_record(
    account_id: Uuid,
    model: &ModelDescriptor,
    messages: &[ChatMessage],
    error: &ProviderError,
    group_id: Option<Uuid>,
    created_at: chrono::DateTime<Utc>,
    elapsed: Duration,
) -> UsageRecord {
    UsageRecord {
        id: Uuid::new_v4(),
        account_id,
        model_id: model.id.clone(),
        provider: model.provider,
        group_id,
        prompt_text: prompt_text(messages),
        response_text: None,
        input_tokens: 0,
        output_tokens: 0,
        total_tokens: 0,
        input_cost_usd: rust_decimal::Decimal::ZERO,
        output_cost_usd: rust_decimal::Decimal::ZERO,
        total_cost_usd: rust_decimal::Decimal::ZERO,
        latency_ms: elapsed.as_millis() as i64,
        status: RequestStatus::Error,
        error_message: Some(error.to_string()),
        created_at,
        completed_at: Utc::now(),
    }
}
