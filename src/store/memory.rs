// src/store/memory.rs
// In-memory store for tests and embedded use.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::Store;
use crate::types::{BudgetAccount, ModelDescriptor, UsageRecord};

#[derive(Default)]
pub struct MemoryStore {
    models: Mutex<Vec<ModelDescriptor>>,
    accounts: Mutex<HashMap<Uuid, BudgetAccount>>,
    records: Mutex<Vec<UsageRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(models: Vec<ModelDescriptor>) -> Self {
        Self { models: Mutex::new(models), ..Self::default() }
    }

    pub fn add_model(&self, model: ModelDescriptor) {
        self.models.lock().unwrap().push(model);
    }

    pub fn add_account(&self, account: BudgetAccount) {
        self.accounts.lock().unwrap().insert(account.id, account);
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn active_models(&self) -> anyhow::Result<Vec<ModelDescriptor>> {
        Ok(self
            .models
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.is_active)
            .cloned()
            .collect())
    }

    async fn budget_account(&self, id: Uuid) -> anyhow::Result<Option<BudgetAccount>> {
        Ok(self.accounts.lock().unwrap().get(&id).cloned())
    }

    async fn update_spent(&self, id: Uuid, spent: Decimal) -> anyhow::Result<()> {
        if let Some(account) = self.accounts.lock().unwrap().get_mut(&id) {
            account.total_spent_usd = spent;
        }
        Ok(())
    }

    async fn set_spending_limit(&self, id: Uuid, limit: Option<Decimal>) -> anyhow::Result<()> {
        if let Some(account) = self.accounts.lock().unwrap().get_mut(&id) {
            account.spending_limit_usd = limit;
        }
        Ok(())
    }

    async fn upsert_usage_record(&self, record: &UsageRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
