//! Application-wide error types
//!
//! Collaborator implementations (payment processor, transaction store) report
//! failures as [`AppError`]. The reconciler catches these at its boundary and
//! turns them into host events.

use crate::database::error::DatabaseError;
use std::fmt;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Errors raised by external services
#[derive(Debug, Clone, Error)]
pub enum ExternalError {
    #[error("{provider} error: {message}")]
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },

    #[error("{service} rate limit exceeded")]
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },

    #[error("{service} did not respond within {seconds} seconds")]
    Timeout { service: String, seconds: u64 },
}

/// Errors raised by our own infrastructure
#[derive(Debug, Clone, Error)]
pub enum InfrastructureError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, Error)]
pub enum AppErrorKind {
    #[error(transparent)]
    External(ExternalError),

    #[error(transparent)]
    Infrastructure(InfrastructureError),
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn payment_provider(
        provider: impl Into<String>,
        message: impl Into<String>,
        is_retryable: bool,
    ) -> Self {
        Self::new(AppErrorKind::External(ExternalError::PaymentProvider {
            provider: provider.into(),
            message: message.into(),
            is_retryable,
        }))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: message.into(),
            },
        ))
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::External(ExternalError::PaymentProvider { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::External(ExternalError::RateLimit { .. })
            | AppErrorKind::External(ExternalError::Timeout { .. }) => true,
            AppErrorKind::Infrastructure(InfrastructureError::Database(e)) => e.is_retryable(),
            AppErrorKind::Infrastructure(InfrastructureError::Configuration { .. }) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.kind, context),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        Self::new(AppErrorKind::Infrastructure(InfrastructureError::Database(
            err,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseErrorKind;

    #[test]
    fn test_display_includes_context() {
        let err = AppError::payment_provider("NOWPayments", "HTTP 500", true)
            .with_context("get_session 4521");
        assert_eq!(
            err.to_string(),
            "NOWPayments error: HTTP 500 (get_session 4521)"
        );
    }

    #[test]
    fn test_retryability() {
        assert!(AppError::payment_provider("NOWPayments", "boom", true).is_retryable());
        assert!(!AppError::payment_provider("NOWPayments", "bad", false).is_retryable());
        assert!(!AppError::configuration("missing key").is_retryable());

        let db: AppError = DatabaseError::new(DatabaseErrorKind::PoolExhausted).into();
        assert!(db.is_retryable());
    }
}
