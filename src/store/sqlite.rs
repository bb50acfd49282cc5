// src/store/sqlite.rs
//! SQLite-backed store. Bootstraps its schema at startup so a fresh
//! database works without external migration tooling.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::Store;
use crate::types::{BudgetAccount, ModelDescriptor, ProviderId, UsageRecord};

const CREATE_MODELS: &str = r#"
CREATE TABLE IF NOT EXISTS models (
    model_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    provider TEXT NOT NULL,
    input_price_per_1m TEXT NOT NULL,
    output_price_per_1m TEXT NOT NULL,
    context_window INTEGER NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE
);
"#;

const CREATE_BUDGET_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS budget_accounts (
    id TEXT PRIMARY KEY,
    spending_limit_usd TEXT,
    total_spent_usd TEXT NOT NULL DEFAULT '0'
);
"#;

const CREATE_USAGE_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS usage_records (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    model_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    group_id TEXT,
    prompt_text TEXT NOT NULL,
    response_text TEXT,
    input_tokens INTEGER NOT NULL,
    output_tokens INTEGER NOT NULL,
    total_tokens INTEGER NOT NULL,
    input_cost_usd TEXT NOT NULL,
    output_cost_usd TEXT NOT NULL,
    total_cost_usd TEXT NOT NULL,
    latency_ms INTEGER NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT,
    created_at DATETIME NOT NULL,
    completed_at DATETIME NOT NULL
);
"#;

const CREATE_USAGE_ACCOUNT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_usage_records_account
    ON usage_records (account_id, created_at);
"#;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool and ensure the schema exists.
    pub async fn new(pool: SqlitePool) -> anyhow::Result<Self> {
        for statement in [
            CREATE_MODELS,
            CREATE_BUDGET_ACCOUNTS,
            CREATE_USAGE_RECORDS,
            CREATE_USAGE_ACCOUNT_INDEX,
        ] {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Register or refresh a model in the catalog.
    pub async fn upsert_model(&self, model: &ModelDescriptor) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO models
                (model_id, display_name, provider, input_price_per_1m,
                 output_price_per_1m, context_window, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&model.id)
        .bind(&model.display_name)
        .bind(model.provider.as_str())
        .bind(model.input_price_per_million.to_string())
        .bind(model.output_price_per_million.to_string())
        .bind(model.context_window as i64)
        .bind(model.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn create_account(&self, account: &BudgetAccount) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO budget_accounts (id, spending_limit_usd, total_spent_usd) VALUES (?, ?, ?)",
        )
        .bind(account.id.to_string())
        .bind(account.spending_limit_usd.map(|limit| limit.to_string()))
        .bind(account.total_spent_usd.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn parse_decimal(raw: &str, column: &str) -> anyhow::Result<Decimal> {
    raw.parse()
        .map_err(|e| anyhow::anyhow!("invalid decimal in column {column}: {e}"))
}

fn parse_provider(raw: &str) -> anyhow::Result<ProviderId> {
    ProviderId::parse(raw).ok_or_else(|| anyhow::anyhow!("unknown provider '{raw}'"))
}

#[async_trait]
impl Store for SqliteStore {
    async fn active_models(&self) -> anyhow::Result<Vec<ModelDescriptor>> {
        let rows = sqlx::query(
            r#"
            SELECT model_id, display_name, provider, input_price_per_1m,
                   output_price_per_1m, context_window, is_active
            FROM models
            WHERE is_active = TRUE
            ORDER BY model_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut models = Vec::with_capacity(rows.len());
        for row in rows {
            models.push(ModelDescriptor {
                id: row.try_get("model_id")?,
                display_name: row.try_get("display_name")?,
                provider: parse_provider(row.try_get::<String, _>("provider")?.as_str())?,
                input_price_per_million: parse_decimal(
                    row.try_get::<String, _>("input_price_per_1m")?.as_str(),
                    "input_price_per_1m",
                )?,
                output_price_per_million: parse_decimal(
                    row.try_get::<String, _>("output_price_per_1m")?.as_str(),
                    "output_price_per_1m",
                )?,
                context_window: row.try_get::<i64, _>("context_window")? as u32,
                is_active: row.try_get("is_active")?,
            });
        }
        Ok(models)
    }

    async fn budget_account(&self, id: Uuid) -> anyhow::Result<Option<BudgetAccount>> {
        let row = sqlx::query(
            "SELECT spending_limit_usd, total_spent_usd FROM budget_accounts WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };

        let limit = row
            .try_get::<Option<String>, _>("spending_limit_usd")?
            .map(|raw| parse_decimal(&raw, "spending_limit_usd"))
            .transpose()?;

        Ok(Some(BudgetAccount {
            id,
            spending_limit_usd: limit,
            total_spent_usd: parse_decimal(
                row.try_get::<String, _>("total_spent_usd")?.as_str(),
                "total_spent_usd",
            )?,
        }))
    }

    async fn update_spent(&self, id: Uuid, spent: Decimal) -> anyhow::Result<()> {
        sqlx::query("UPDATE budget_accounts SET total_spent_usd = ? WHERE id = ?")
            .bind(spent.to_string())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_spending_limit(&self, id: Uuid, limit: Option<Decimal>) -> anyhow::Result<()> {
        sqlx::query("UPDATE budget_accounts SET spending_limit_usd = ? WHERE id = ?")
            .bind(limit.map(|l| l.to_string()))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_usage_record(&self, record: &UsageRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO usage_records
                (id, account_id, model_id, provider, group_id, prompt_text,
                 response_text, input_tokens, output_tokens, total_tokens,
                 input_cost_usd, output_cost_usd, total_cost_usd, latency_ms,
                 status, error_message, created_at, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.account_id.to_string())
        .bind(&record.model_id)
        .bind(record.provider.as_str())
        .bind(record.group_id.map(|g| g.to_string()))
        .bind(&record.prompt_text)
        .bind(&record.response_text)
        .bind(record.input_tokens as i64)
        .bind(record.output_tokens as i64)
        .bind(record.total_tokens as i64)
        .bind(record.input_cost_usd.to_string())
        .bind(record.output_cost_usd.to_string())
        .bind(record.total_cost_usd.to_string())
        .bind(record.latency_ms)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(record.created_at)
        .bind(record.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn fresh_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        SqliteStore::new(pool).await.unwrap()
    }

    fn model(id: &str, active: bool) -> ModelDescriptor {
        ModelDescriptor {
            id: id.into(),
            display_name: id.to_uppercase(),
            provider: ProviderId::DeepSeek,
            input_price_per_million: dec!(0.27),
            output_price_per_million: dec!(1.10),
            context_window: 128_000,
            is_active: active,
        }
    }

    #[tokio::test]
    async fn active_models_excludes_inactive() {
        let store = fresh_store().await;
        store.upsert_model(&model("deepseek-chat", true)).await.unwrap();
        store.upsert_model(&model("deepseek-old", false)).await.unwrap();

        let models = store.active_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "deepseek-chat");
        assert_eq!(models[0].input_price_per_million, dec!(0.27));
    }

    #[tokio::test]
    async fn budget_account_round_trips_decimals_exactly() {
        let store = fresh_store().await;
        let account = BudgetAccount {
            id: Uuid::new_v4(),
            spending_limit_usd: Some(dec!(1.00)),
            total_spent_usd: dec!(0.999999),
        };
        store.create_account(&account).await.unwrap();

        let loaded = store.budget_account(account.id).await.unwrap().unwrap();
        assert_eq!(loaded.spending_limit_usd, Some(dec!(1.00)));
        assert_eq!(loaded.total_spent_usd, dec!(0.999999));

        store.update_spent(account.id, dec!(1.00)).await.unwrap();
        let loaded = store.budget_account(account.id).await.unwrap().unwrap();
        assert_eq!(loaded.total_spent_usd, dec!(1.00));
    }

    #[tokio::test]
    async fn unlimited_account_has_no_limit() {
        let store = fresh_store().await;
        let account = BudgetAccount {
            id: Uuid::new_v4(),
            spending_limit_usd: None,
            total_spent_usd: dec!(0),
        };
        store.create_account(&account).await.unwrap();
        let loaded = store.budget_account(account.id).await.unwrap().unwrap();
        assert_eq!(loaded.spending_limit_usd, None);
    }
}
