use crate::error::AppError;
use thiserror::Error;

pub type ReconcilerResult<T> = Result<T, ReconcilerError>;

/// Failures surfaced to the checkout host
///
/// `Display` is the user-facing message.
#[derive(Debug, Clone, Error)]
pub enum ReconcilerError {
    #[error("Transaction {transaction_id} not found")]
    NotFound { transaction_id: String },

    #[error("Failed to load transaction: {0}")]
    Store(#[source] AppError),

    #[error("Payment address not found")]
    MissingAddress,

    #[error("Payment failed or was cancelled")]
    PaymentFailed,

    #[error("{} is currently not supported", .code.to_uppercase())]
    UnsupportedCurrency { code: String },

    #[error("{} is not an available payment currency", .code.to_uppercase())]
    UnknownCurrency { code: String },

    #[error("Payment session is not linked to the processor")]
    MissingProviderSession,

    #[error("Unable to check payment status: {0}")]
    Refresh(#[source] AppError),

    #[error("Failed to switch payment to {}: {reason}", .code.to_uppercase())]
    CurrencyChange { code: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_messages() {
        assert_eq!(
            ReconcilerError::UnsupportedCurrency {
                code: "tusd".to_string()
            }
            .to_string(),
            "TUSD is currently not supported"
        );
        assert_eq!(
            ReconcilerError::MissingAddress.to_string(),
            "Payment address not found"
        );
        assert_eq!(
            ReconcilerError::PaymentFailed.to_string(),
            "Payment failed or was cancelled"
        );
        assert_eq!(
            ReconcilerError::CurrencyChange {
                code: "eth".to_string(),
                reason: "conversion refused".to_string()
            }
            .to_string(),
            "Failed to switch payment to ETH: conversion refused"
        );
    }
}
