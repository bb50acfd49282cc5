// tests/dispatch_pipeline_test.rs
// Single-target dispatch: validation, budget enforcement, cost commitment,
// caching, and usage recording.


use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;

use relay::cache::{InMemoryCache, ResponseCache};
use relay::config::RelayConfig;
use relay::error::{ProviderErrorKind, RouterError};
use relay::orchestrator::Orchestrator;
use relay::provider::{AdapterSet, ProviderAdapter};
use relay::recorder::StoreRecorder;
use relay::store::MemoryStore;
use relay::types::{ChatMessage, ChatRequest, ProviderId, RequestMode, RequestStatus};

use test_helpers::{MockAdapter, account, default_catalog, engine, manual_request, model, settle};

#[tokio::test]
async fn manual_dispatch_computes_exact_costs() {
    let store = Arc::new(MemoryStore::with_models(default_catalog()));
    let acct = account(Some(dec!(10)), dec!(0));
    let account_id = acct.id;
    store.add_account(acct);

    let adapter = Arc::new(MockAdapter::new());
    let orchestrator = engine(store.clone(), adapter.clone());

    let response =
        orchestrator.chat(account_id, &manual_request("model-a", "hello")).await.unwrap();

    assert_eq!(response.model, "model-a");
    assert_eq!(response.provider, ProviderId::OpenAi);
    assert!(response.content.contains("hello"));
    // 100 in at $0.10/M, 50 out at $0.40/M
    assert_eq!(response.usage.input_cost_usd, dec!(0.00001));
    assert_eq!(response.usage.output_cost_usd, dec!(0.00002));
    assert_eq!(response.usage.total_cost_usd, dec!(0.00003));
    assert_eq!(
        response.usage.total_cost_usd,
        response.usage.input_cost_usd + response.usage.output_cost_usd
    );

    // Actual cost committed, not the buffered estimate.
    let summary = orchestrator.ledger().spending(account_id).await.unwrap();
    assert_eq!(summary.total_spent_usd, dec!(0.00003));

    settle().await;
    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RequestStatus::Success);
    assert_eq!(records[0].total_cost_usd, dec!(0.00003));
    assert_eq!(records[0].account_id, account_id);
}

#[tokio::test]
async fn unknown_model_fails_before_any_dispatch() {
    let store = Arc::new(MemoryStore::with_models(default_catalog()));
    let acct = account(Some(dec!(10)), dec!(0));
    let account_id = acct.id;
    store.add_account(acct);

    let adapter = Arc::new(MockAdapter::new());
    let orchestrator = engine(store.clone(), adapter.clone());

    let err = orchestrator
        .chat(account_id, &manual_request("model-x", "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::UnknownModel(_)));
    assert_eq!(adapter.call_count(), 0);

    let summary = orchestrator.ledger().spending(account_id).await.unwrap();
    assert_eq!(summary.total_spent_usd, dec!(0));
}

#[tokio::test]
async fn budget_exceeded_fails_fast_and_leaves_spend_untouched() {
    let store = Arc::new(MemoryStore::with_models(default_catalog()));
    let acct = account(Some(dec!(1.00)), dec!(0.999999));
    let account_id = acct.id;
    store.add_account(acct);

    let adapter = Arc::new(MockAdapter::new());
    let orchestrator = engine(store.clone(), adapter.clone());

    // model-c at $1.25/$5.00 per 1M with a long prompt: the estimate is
    // comfortably above the $0.000001 of remaining headroom.
    let err = orchestrator
        .chat(account_id, &manual_request("model-c", &"words ".repeat(2000)))
        .await
        .unwrap_err();

    assert!(matches!(err, RouterError::BudgetExceeded { .. }));
    assert_eq!(adapter.call_count(), 0);

    let summary = orchestrator.ledger().spending(account_id).await.unwrap();
    assert_eq!(summary.total_spent_usd, dec!(0.999999));
}

#[tokio::test]
async fn provider_failure_releases_reservation_and_records_error() {
    let store = Arc::new(MemoryStore::with_models(default_catalog()));
    let acct = account(Some(dec!(0.001)), dec!(0));
    let account_id = acct.id;
    store.add_account(acct);

    let adapter = Arc::new(MockAdapter::new());
    adapter.fail_model("model-a");
    let orchestrator = engine(store.clone(), adapter.clone());

    let err = orchestrator
        .chat(account_id, &manual_request("model-a", "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Provider(_)));

    // The hold was rolled back: the full headroom reserves again.
    let summary = orchestrator.ledger().spending(account_id).await.unwrap();
    assert_eq!(summary.total_spent_usd, dec!(0));
    assert_eq!(summary.remaining_usd, Some(dec!(0.001)));

    settle().await;
    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, RequestStatus::Error);
    assert_eq!(records[0].total_cost_usd, dec!(0));
    assert!(records[0].error_message.as_deref().unwrap().contains("model-a is down"));
}

#[tokio::test]
async fn cost_optimized_mode_selects_cheapest_eligible() {
    let store = Arc::new(MemoryStore::with_models(default_catalog()));
    let acct = account(None, dec!(0));
    let account_id = acct.id;
    store.add_account(acct);

    let orchestrator = engine(store.clone(), Arc::new(MockAdapter::new()));

    let request = ChatRequest {
        messages: vec![ChatMessage::user("pick the cheapest for me")],
        model: None,
        mode: Some(RequestMode::CostOptimized),
        models: None,
        temperature: None,
        max_tokens: None,
    };
    let response = orchestrator.chat(account_id, &request).await.unwrap();
    assert_eq!(response.model, "model-b");
}

#[tokio::test]
async fn oversized_prompt_is_rejected_before_dispatch() {
    let store = Arc::new(MemoryStore::new());
    store.add_model(model("tiny", dec!(0.10), dec!(0.10), 100));
    let acct = account(None, dec!(0));
    let account_id = acct.id;
    store.add_account(acct);

    let adapter = Arc::new(MockAdapter::new());
    let orchestrator = engine(store.clone(), adapter.clone());

    let err = orchestrator
        .chat(account_id, &manual_request("tiny", &"x".repeat(4_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::ContextWindowExceeded { .. }));
    assert_eq!(adapter.call_count(), 0);
}

#[tokio::test]
async fn repeat_within_ttl_reuses_response_without_reinvoking() {
    let store = Arc::new(MemoryStore::with_models(default_catalog()));
    let acct = account(Some(dec!(10)), dec!(0));
    let account_id = acct.id;
    store.add_account(acct);

    let adapter = Arc::new(MockAdapter::new());
    let orchestrator = engine(store.clone(), adapter.clone());

    let request = manual_request("model-a", "same question");
    let first = orchestrator.chat(account_id, &request).await.unwrap();
    let second = orchestrator.chat(account_id, &request).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.content, second.content);
    assert_eq!(adapter.call_count(), 1);

    // The cached repeat is not billed again.
    let summary = orchestrator.ledger().spending(account_id).await.unwrap();
    assert_eq!(summary.total_spent_usd, first.usage.total_cost_usd);

    // Different sampling parameters miss the cache.
    let mut warmer = manual_request("model-a", "same question");
    warmer.temperature = Some(0.9);
    let third = orchestrator.chat(account_id, &warmer).await.unwrap();
    assert_ne!(third.id, first.id);
    assert_eq!(adapter.call_count(), 2);
}

#[tokio::test]
async fn per_call_deadline_times_out_and_rolls_back() {
    let store = Arc::new(MemoryStore::with_models(default_catalog()));
    let acct = account(Some(dec!(10)), dec!(0));
    let account_id = acct.id;
    store.add_account(acct);

    let adapter = Arc::new(MockAdapter::with_latency(Duration::from_secs(5)));
    let mut adapters = AdapterSet::empty();
    for provider in
        [ProviderId::OpenAi, ProviderId::Anthropic, ProviderId::Google, ProviderId::DeepSeek]
    {
        adapters.insert(provider, adapter.clone() as Arc<dyn ProviderAdapter>);
    }

    let config = RelayConfig { call_timeout_secs: 0, ..RelayConfig::default() };
    let orchestrator = Orchestrator::new(
        &config,
        store.clone(),
        ResponseCache::new(Arc::new(InMemoryCache::new())),
        Arc::new(StoreRecorder::new(store.clone())),
    )
    .with_adapters(adapters);

    let err = orchestrator
        .chat(account_id, &manual_request("model-a", "slow"))
        .await
        .unwrap_err();
    match err {
        RouterError::Provider(e) => assert_eq!(e.kind, ProviderErrorKind::Timeout),
        other => panic!("expected timeout, got {other}"),
    }

    let summary = orchestrator.ledger().spending(account_id).await.unwrap();
    assert_eq!(summary.total_spent_usd, dec!(0));
}

#[tokio::test]
async fn missing_target_selector_is_rejected() {
    let store = Arc::new(MemoryStore::with_models(default_catalog()));
    let acct = account(None, dec!(0));
    let account_id = acct.id;
    store.add_account(acct);

    let orchestrator = engine(store, Arc::new(MockAdapter::new()));
    let request = ChatRequest {
        messages: vec![ChatMessage::user("hi")],
        model: None,
        mode: None,
        models: None,
        temperature: None,
        max_tokens: None,
    };
    let err = orchestrator.chat(account_id, &request).await.unwrap_err();
    assert!(matches!(err, RouterError::InvalidTarget(_)));
}
