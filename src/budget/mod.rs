// src/budget/mod.rs
// Per-account spending ledger.
//
// All mutation of an account's spend goes through reserve/commit/release.
// Reserve is the serialization point: it checks headroom and places a
// provisional hold under the account's lock, so two concurrent requests can
// never both pass the check against the same remaining budget. Only
// committed spend is persisted; holds live in memory.

use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RouterError;
use crate::store::Store;

#[derive(Debug)]
struct AccountState {
    limit: Option<Decimal>,
    committed: Decimal,
    held: Decimal,
}

/// A provisional hold against an account. Must be redeemed exactly once,
/// with `commit` (finalize at actual cost) or `release` (roll back).
#[derive(Debug)]
#[must_use = "a reservation must be committed or released"]
pub struct Reservation {
    account_id: Uuid,
    amount: Decimal,
}

impl Reservation {
    pub fn amount(&self) -> Decimal {
        self.amount
    }
}

/// Current spending position of an account.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SpendingSummary {
    pub total_spent_usd: Decimal,
    pub spending_limit_usd: Option<Decimal>,
    pub remaining_usd: Option<Decimal>,
    pub budget_used_percent: Option<Decimal>,
}

pub struct BudgetLedger {
    store: Arc<dyn Store>,
    accounts: DashMap<Uuid, Arc<Mutex<AccountState>>>,
}

impl BudgetLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, accounts: DashMap::new() }
    }

    async fn account_state(&self, account_id: Uuid) -> Result<Arc<Mutex<AccountState>>, RouterError> {
        if let Some(state) = self.accounts.get(&account_id) {
            return Ok(state.value().clone());
        }

        let account = self
            .store
            .budget_account(account_id)
            .await
            .map_err(|e| RouterError::Store(e.to_string()))?
            .ok_or(RouterError::UnknownAccount(account_id))?;

        // Two tasks may race to load the same account; entry() keeps one.
        let state = self
            .accounts
            .entry(account_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(AccountState {
                    limit: account.spending_limit_usd,
                    committed: account.total_spent_usd,
                    held: Decimal::ZERO,
                }))
            })
            .clone();
        Ok(state)
    }

    /// Atomically check headroom and place a provisional hold.
    pub async fn reserve(
        &self,
        account_id: Uuid,
        estimated: Decimal,
    ) -> Result<Reservation, RouterError> {
        let state = self.account_state(account_id).await?;
        let mut state = state.lock().await;

        if let Some(limit) = state.limit {
            let projected = state.committed + state.held + estimated;
            if projected > limit {
                let remaining = (limit - state.committed - state.held).max(Decimal::ZERO);
                debug!(%account_id, %estimated, %remaining, "reservation denied");
                return Err(RouterError::BudgetExceeded { requested: estimated, remaining });
            }
        }

        state.held += estimated;
        Ok(Reservation { account_id, amount: estimated })
    }

    /// Finalize a hold at the actual computed cost and persist the new
    /// committed total. A persistence failure is logged; the in-memory
    /// ledger remains authoritative for enforcement.
    pub async fn commit(&self, reservation: Reservation, actual: Decimal) {
        let Some(state) = self.accounts.get(&reservation.account_id).map(|s| s.value().clone()) else {
            warn!(account_id = %reservation.account_id, "commit for unknown account state");
            return;
        };

        let committed = {
            let mut state = state.lock().await;
            state.held -= reservation.amount;
            state.committed += actual;
            state.committed
        };

        if let Err(e) = self.store.update_spent(reservation.account_id, committed).await {
            warn!(account_id = %reservation.account_id, "failed to persist spend: {e}");
        }
    }

    /// Roll back a hold entirely. Used when the upstream call produced no
    /// billable output.
    pub async fn release(&self, reservation: Reservation) {
        let Some(state) = self.accounts.get(&reservation.account_id).map(|s| s.value().clone()) else {
            return;
        };
        let mut state = state.lock().await;
        state.held -= reservation.amount;
    }

    pub async fn spending(&self, account_id: Uuid) -> Result<SpendingSummary, RouterError> {
        let state = self.account_state(account_id).await?;
        let state = state.lock().await;

        let (remaining, used_percent) = match state.limit {
            Some(limit) => {
                let remaining = (limit - state.committed).max(Decimal::ZERO);
                let percent = if limit > Decimal::ZERO {
                    Some((state.committed / limit * Decimal::from(100)).round_dp(2))
                } else {
                    None
                };
                (Some(remaining), percent)
            }
            None => (None, None),
        };

        Ok(SpendingSummary {
            total_spent_usd: state.committed,
            spending_limit_usd: state.limit,
            remaining_usd: remaining,
            budget_used_percent: used_percent,
        })
    }

    pub async fn set_limit(
        &self,
        account_id: Uuid,
        limit: Option<Decimal>,
    ) -> Result<(), RouterError> {
        let state = self.account_state(account_id).await?;
        state.lock().await.limit = limit;
        self.store
            .set_spending_limit(account_id, limit)
            .await
            .map_err(|e| RouterError::Store(e.to_string()))
    }

    /// Zero an account's committed spend (new billing period).
    pub async fn reset_spending(&self, account_id: Uuid) -> Result<(), RouterError> {
        let state = self.account_state(account_id).await?;
        state.lock().await.committed = Decimal::ZERO;
        self.store
            .update_spent(account_id, Decimal::ZERO)
            .await
            .map_err(|e| RouterError::Store(e.to_string()))
    }
}
