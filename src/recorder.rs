// src/recorder.rs
// Sink for dispatch outcomes. Fire-and-forget: a recorder failure is logged
// and swallowed, never surfaced to the caller whose response is already
// computed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::store::Store;
use crate::types::UsageRecord;

#[async_trait]
pub trait RequestRecorder: Send + Sync {
    async fn record(&self, record: UsageRecord);
}

/// Persists records through the store seam.
pub struct StoreRecorder {
    store: Arc<dyn Store>,
}

impl StoreRecorder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RequestRecorder for StoreRecorder {
    async fn record(&self, record: UsageRecord) {
        if let Err(e) = self.store.upsert_usage_record(&record).await {
            warn!(record_id = %record.id, "failed to persist usage record: {e}");
        }
    }
}

/// Logs records without persisting anything.
pub struct LogRecorder;

#[async_trait]
impl RequestRecorder for LogRecorder {
    async fn record(&self, record: UsageRecord) {
        info!(
            record_id = %record.id,
            model = %record.model_id,
            status = record.status.as_str(),
            cost_usd = %record.total_cost_usd,
            latency_ms = record.latency_ms,
            "dispatch recorded"
        );
    }
}
