use crate::error::AppResult;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Business-level status of the merchant-side transaction record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    /// Any status the checkout does not act on (processing, expired, ...)
    #[serde(untagged)]
    Other(String),
}

impl LocalStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "refunded" => Self::Refunded,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Local transaction record as seen by the checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub status: LocalStatus,
    /// Merchant-denominated price
    pub amount: Decimal,
    pub currency: String,
    pub pay_amount: Option<Decimal>,
    pub pay_currency: Option<String>,
    pub provider_payment_id: Option<String>,
    pub metadata: Option<Value>,
}

impl TransactionRecord {
    fn metadata_field(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }

    /// Processor session id, from the dedicated column or the metadata blob
    pub fn resolved_provider_payment_id(&self) -> Option<String> {
        self.provider_payment_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.metadata_field("payment_id").and_then(json_to_string))
    }

    /// Pay address cached when the processor session was created
    pub fn cached_pay_address(&self) -> Option<String> {
        self.metadata_field("pay_address").and_then(json_to_string)
    }

    pub fn cached_pay_amount(&self) -> Option<Decimal> {
        self.metadata_field("pay_amount")
            .and_then(json_to_decimal)
            .or(self.pay_amount)
    }

    pub fn cached_pay_currency(&self) -> Option<String> {
        self.pay_currency
            .clone()
            .filter(|c| !c.trim().is_empty())
            .or_else(|| self.metadata_field("pay_currency").and_then(json_to_string))
            .map(|c| c.to_ascii_lowercase())
    }
}

fn json_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_to_decimal(value: &Value) -> Option<Decimal> {
    let raw = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .ok()
}

/// Read access to the local transaction store
///
/// Implementations must be idempotent and cheap enough to be called on every
/// poll tick.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Fetch the record for `transaction_id`, `None` if it does not exist
    async fn fetch_transaction(&self, transaction_id: &str)
        -> AppResult<Option<TransactionRecord>>;

    /// Check that the store is reachable
    async fn health_check(&self) -> AppResult<()> {
        Ok(())
    }
}
