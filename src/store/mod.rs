// src/store/mod.rs
// Persistent store seam. The engine reads the model catalog, reads/updates
// budget accounts, and upserts usage records through this trait; schema
// ownership and migrations beyond bootstrap belong to the collaborating
// service.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::types::{BudgetAccount, ModelDescriptor, UsageRecord};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// All models currently eligible for routing.
    async fn active_models(&self) -> anyhow::Result<Vec<ModelDescriptor>>;

    async fn budget_account(&self, id: Uuid) -> anyhow::Result<Option<BudgetAccount>>;

    /// Persist an account's committed spend. Called by the ledger on
    /// commit; never called with provisional holds.
    async fn update_spent(&self, id: Uuid, spent: Decimal) -> anyhow::Result<()>;

    async fn set_spending_limit(&self, id: Uuid, limit: Option<Decimal>) -> anyhow::Result<()>;

    async fn upsert_usage_record(&self, record: &UsageRecord) -> anyhow::Result<()>;
}
