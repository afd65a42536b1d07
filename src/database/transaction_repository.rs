use crate::database::error::{DatabaseError, DbResult};
use crate::database::repository::{LocalStatus, TransactionRecord, TransactionStore};
use crate::error::AppResult;
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use tracing::debug;

/// Row shape of the `transactions` table columns the checkout reads
#[derive(Debug, Clone, FromRow)]
struct TransactionRow {
    id: String,
    status: String,
    amount: Decimal,
    currency: String,
    pay_amount: Option<Decimal>,
    pay_currency: Option<String>,
    provider_payment_id: Option<String>,
    metadata: Option<serde_json::Value>,
}

impl From<TransactionRow> for TransactionRecord {
    fn from(row: TransactionRow) -> Self {
        Self {
            id: row.id,
            status: LocalStatus::parse(&row.status),
            amount: row.amount,
            currency: row.currency,
            pay_amount: row.pay_amount,
            pay_currency: row.pay_currency,
            provider_payment_id: row.provider_payment_id,
            metadata: row.metadata,
        }
    }
}

/// Postgres-backed transaction store
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(
        &self,
        transaction_id: &str,
    ) -> DbResult<Option<TransactionRecord>> {
        debug!(transaction_id, "fetching transaction record");

        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT id, status, amount, currency, pay_amount, pay_currency,
                    provider_payment_id, metadata
             FROM transactions WHERE id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            DatabaseError::from_sqlx(e).with_context(format!("transaction {}", transaction_id))
        })?;

        Ok(row.map(TransactionRecord::from))
    }
}

#[async_trait]
impl TransactionStore for TransactionRepository {
    async fn fetch_transaction(
        &self,
        transaction_id: &str,
    ) -> AppResult<Option<TransactionRecord>> {
        Ok(self.find_by_id(transaction_id).await?)
    }

    async fn health_check(&self) -> AppResult<()> {
        Ok(crate::database::health_check(&self.pool).await?)
    }
}
