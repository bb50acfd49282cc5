// src/cache/mod.rs
// Response cache with request coalescing.
//
// A fresh cached entry is served without touching the upstream. On a miss,
// exactly one caller per fingerprint performs the computation; concurrent
// identical callers await its broadcast result instead of issuing duplicate
// upstream calls. The backing store is optional and best-effort: when it is
// unreachable the cache degrades to a miss, never failing the request.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::types::{ChatMessage, ChatResponse, ModelDescriptor, SamplingParams};

pub mod memory;

pub use memory::InMemoryCache;

/// How a result was obtained. The orchestrator commits budget only for
/// `Computed` results; hits and coalesced waits are never billed twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from an unexpired cached entry.
    Hit,
    /// Awaited a concurrent identical computation.
    Coalesced,
    /// This caller performed the upstream computation.
    Computed,
}

/// Deterministic cache key over model id, ordered messages, and sampling
/// parameters. serde_json maps are key-sorted, so the digest input is
/// canonical.
pub fn fingerprint(model_id: &str, messages: &[ChatMessage], params: &SamplingParams) -> String {
    let canonical = serde_json::json!({
        "max_tokens": params.max_tokens,
        "messages": messages,
        "model": model_id,
        "temperature": params.temperature,
    });
    let digest = md5::compute(canonical.to_string().as_bytes());
    format!("chat:{}:{:x}", model_id, digest)
}

/// TTL tiers by model price: expensive model responses are worth keeping
/// longer.
pub fn ttl_for_model(model: &ModelDescriptor) -> Duration {
    if model.input_price_per_million >= dec!(10) {
        Duration::from_secs(86_400)
    } else if model.input_price_per_million >= dec!(1) {
        Duration::from_secs(3_600)
    } else {
        Duration::from_secs(1_800)
    }
}

/// External cache store seam (e.g. Redis in the collaborating deployment).
/// Implementations are keyed by fingerprint string and must expire entries
/// no earlier than the given TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}

type FlightResult = Result<ChatResponse, ProviderError>;

enum Claim {
    Owner(broadcast::Sender<FlightResult>),
    Waiter(broadcast::Receiver<FlightResult>),
}

pub struct ResponseCache {
    store: Option<std::sync::Arc<dyn CacheStore>>,
    in_flight: DashMap<String, broadcast::Sender<FlightResult>>,
}

impl ResponseCache {
    pub fn new(store: std::sync::Arc<dyn CacheStore>) -> Self {
        Self { store: Some(store), in_flight: DashMap::new() }
    }

    /// No backing store: every read misses, but coalescing still applies.
    pub fn disabled() -> Self {
        Self { store: None, in_flight: DashMap::new() }
    }

    /// Return the cached response or compute it, coalescing concurrent
    /// identical requests onto a single computation. A failed computation
    /// propagates to every waiter and caches nothing.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> (FlightResult, CacheOutcome)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FlightResult>,
    {
        let tx = loop {
            if let Some(response) = self.lookup(key).await {
                return (Ok(response), CacheOutcome::Hit);
            }

            match self.claim(key) {
                Claim::Owner(tx) => break tx,
                Claim::Waiter(mut rx) => match rx.recv().await {
                    Ok(result) => return (result, CacheOutcome::Coalesced),
                    // Owner vanished without publishing; start over.
                    Err(_) => continue,
                },
            }
        };

        let result = compute().await;

        if let Ok(response) = &result {
            self.persist(key, response, ttl).await;
        }
        // Remove before publishing: late arrivals re-check the store
        // instead of subscribing to a sender that already fired.
        self.in_flight.remove(key);
        let _ = tx.send(result.clone());

        (result, CacheOutcome::Computed)
    }

    fn claim(&self, key: &str) -> Claim {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => Claim::Waiter(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                Claim::Owner(tx)
            }
        }
    }

    async fn lookup(&self, key: &str) -> Option<ChatResponse> {
        let store = self.store.as_ref()?;
        match store.get(key).await {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(response) => {
                    debug!(key, "cache hit");
                    Some(response)
                }
                Err(e) => {
                    warn!(key, "evicting corrupt cache entry: {e}");
                    let _ = store.delete(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("cache store unavailable, treating as miss: {e}");
                None
            }
        }
    }

    async fn persist(&self, key: &str, response: &ChatResponse, ttl: Duration) {
        let Some(store) = self.store.as_ref() else { return };
        match serde_json::to_string(response) {
            Ok(payload) => {
                if let Err(e) = store.set(key, payload, ttl).await {
                    warn!("cache store write failed: {e}");
                } else {
                    debug!(key, ttl_secs = ttl.as_secs(), "cached response");
                }
            }
            Err(e) => warn!("failed to serialize response for cache: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProviderId, UsageInfo};
    use chrono::Utc;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn response(id: &str) -> ChatResponse {
        ChatResponse {
            id: id.into(),
            model: "m".into(),
            provider: ProviderId::OpenAi,
            content: "hello".into(),
            finish_reason: Some("stop".into()),
            usage: UsageInfo {
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
                input_cost_usd: dec!(0),
                output_cost_usd: dec!(0),
                total_cost_usd: dec!(0),
            },
            latency_ms: 5,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn fingerprint_is_order_and_param_sensitive() {
        let a = vec![ChatMessage::user("one"), ChatMessage::user("two")];
        let b = vec![ChatMessage::user("two"), ChatMessage::user("one")];
        let params = SamplingParams::default();

        assert_eq!(fingerprint("m", &a, &params), fingerprint("m", &a, &params));
        assert_ne!(fingerprint("m", &a, &params), fingerprint("m", &b, &params));
        assert_ne!(fingerprint("m", &a, &params), fingerprint("other", &a, &params));

        let warm = SamplingParams { temperature: Some(0.9), max_tokens: None };
        assert_ne!(fingerprint("m", &a, &params), fingerprint("m", &a, &warm));
    }

    #[test]
    fn ttl_tiers_follow_price() {
        let mut m = ModelDescriptor {
            id: "m".into(),
            display_name: "M".into(),
            provider: ProviderId::Anthropic,
            input_price_per_million: dec!(15),
            output_price_per_million: dec!(75),
            context_window: 200_000,
            is_active: true,
        };
        assert_eq!(ttl_for_model(&m), Duration::from_secs(86_400));
        m.input_price_per_million = dec!(3);
        assert_eq!(ttl_for_model(&m), Duration::from_secs(3_600));
        m.input_price_per_million = dec!(0.27);
        assert_eq!(ttl_for_model(&m), Duration::from_secs(1_800));
    }

    #[tokio::test]
    async fn second_call_within_ttl_hits_cache() {
        let cache = ResponseCache::new(Arc::new(InMemoryCache::new()));
        let calls = AtomicUsize::new(0);

        let (first, outcome) = cache
            .get_or_compute("k", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(response("r1"))
            })
            .await;
        assert_eq!(outcome, CacheOutcome::Computed);

        let (second, outcome) = cache
            .get_or_compute("k", Duration::from_secs(60), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(response("r2"))
            })
            .await;
        assert_eq!(outcome, CacheOutcome::Hit);
        assert_eq!(second.unwrap().id, first.unwrap().id);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_identical_requests_coalesce() {
        let cache = Arc::new(ResponseCache::disabled());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("k", Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(response("shared"))
                    })
                    .await
            }));
        }

        let mut computed = 0;
        for handle in handles {
            let (result, outcome) = handle.await.unwrap();
            assert_eq!(result.unwrap().id, "shared");
            if outcome == CacheOutcome::Computed {
                computed += 1;
            }
        }
        assert_eq!(computed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_propagates_to_waiters_and_caches_nothing() {
        let cache = Arc::new(ResponseCache::new(Arc::new(InMemoryCache::new())));

        let owner = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("k", Duration::from_secs(60), || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(ProviderError::timeout("deadline elapsed"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let (waited, outcome) = cache
            .get_or_compute("k", Duration::from_secs(60), || async {
                panic!("waiter must not compute")
            })
            .await;
        assert_eq!(outcome, CacheOutcome::Coalesced);
        assert!(waited.is_err());
        assert!(owner.await.unwrap().0.is_err());

        // Nothing cached: the next call computes again.
        let (retry, outcome) = cache
            .get_or_compute("k", Duration::from_secs(60), || async { Ok(response("fresh")) })
            .await;
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(retry.unwrap().id, "fresh");
    }

    #[tokio::test]
    async fn expired_entries_are_treated_as_misses() {
        let cache = ResponseCache::new(Arc::new(InMemoryCache::new()));

        let (_, outcome) = cache
            .get_or_compute("k", Duration::from_millis(20), || async { Ok(response("old")) })
            .await;
        assert_eq!(outcome, CacheOutcome::Computed);

        tokio::time::sleep(Duration::from_millis(40)).await;

        let (result, outcome) = cache
            .get_or_compute("k", Duration::from_millis(20), || async { Ok(response("new")) })
            .await;
        assert_eq!(outcome, CacheOutcome::Computed);
        assert_eq!(result.unwrap().id, "new");
    }
}
