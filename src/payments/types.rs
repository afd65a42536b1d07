//! Payment processor types and data structures

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Raw settlement status reported by the processor for a payment session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPaymentStatus {
    Waiting,
    Confirming,
    Confirmed,
    Sending,
    PartiallyPaid,
    Finished,
    Failed,
    Refunded,
    Expired,
    #[serde(untagged)]
    Other(String),
}

impl ProviderPaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "waiting" => Self::Waiting,
            "confirming" => Self::Confirming,
            "confirmed" => Self::Confirmed,
            "sending" => Self::Sending,
            "partially_paid" => Self::PartiallyPaid,
            "finished" => Self::Finished,
            "failed" => Self::Failed,
            "refunded" => Self::Refunded,
            "expired" => Self::Expired,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Live view of a processor payment session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub payment_id: String,
    pub pay_address: Option<String>,
    pub pay_amount: Option<Decimal>,
    pub pay_currency: Option<String>,
    pub status: ProviderPaymentStatus,
}

/// Request to re-quote an existing payment in another pay currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyUpdateRequest {
    pub transaction_id: String,
    pub pay_currency: String,
    /// Route the conversion through USD instead of a direct cross rate
    pub force_usd_conversion: bool,
}

/// Result of a currency re-quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyUpdate {
    pub success: bool,
    #[serde(default)]
    pub pay_address: Option<String>,
    #[serde(default)]
    pub pay_amount: Option<Decimal>,
    #[serde(default, alias = "error")]
    pub message: Option<String>,
}
