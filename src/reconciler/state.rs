//! Payment attempt state, host-visible snapshots and events

use crate::database::LocalStatus;
use crate::payments::ProviderPaymentStatus;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Status of a payment attempt. Only moves forward out of `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Completed,
    Failed,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl From<&LocalStatus> for AttemptStatus {
    fn from(status: &LocalStatus) -> Self {
        match status {
            LocalStatus::Completed => Self::Completed,
            LocalStatus::Failed | LocalStatus::Refunded => Self::Failed,
            LocalStatus::Pending | LocalStatus::Other(_) => Self::Pending,
        }
    }
}

impl From<&ProviderPaymentStatus> for AttemptStatus {
    fn from(status: &ProviderPaymentStatus) -> Self {
        match status {
            ProviderPaymentStatus::Finished => Self::Completed,
            ProviderPaymentStatus::Failed | ProviderPaymentStatus::Refunded => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// Deposit instructions for one pay currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentQuote {
    pub pay_address: String,
    pub pay_amount: Decimal,
    pub pay_currency: String,
}

/// One externally processed payment attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentAttempt {
    transaction_id: String,
    provider_payment_id: Option<String>,
    pay_address: String,
    pay_amount: Decimal,
    pay_currency: String,
    original_amount: Decimal,
    original_currency: String,
    status: AttemptStatus,
    last_error: Option<String>,
}

impl PaymentAttempt {
    pub fn new(
        transaction_id: impl Into<String>,
        provider_payment_id: Option<String>,
        quote: PaymentQuote,
        original_amount: Decimal,
        original_currency: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            provider_payment_id,
            pay_address: quote.pay_address,
            pay_amount: quote.pay_amount,
            pay_currency: quote.pay_currency,
            original_amount,
            original_currency: original_currency.into(),
            status: AttemptStatus::Pending,
            last_error: None,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn provider_payment_id(&self) -> Option<&str> {
        self.provider_payment_id.as_deref()
    }

    pub fn pay_address(&self) -> &str {
        &self.pay_address
    }

    pub fn pay_amount(&self) -> Decimal {
        self.pay_amount
    }

    pub fn pay_currency(&self) -> &str {
        &self.pay_currency
    }

    pub fn original_amount(&self) -> Decimal {
        self.original_amount
    }

    pub fn original_currency(&self) -> &str {
        &self.original_currency
    }

    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn quote(&self) -> PaymentQuote {
        PaymentQuote {
            pay_address: self.pay_address.clone(),
            pay_amount: self.pay_amount,
            pay_currency: self.pay_currency.clone(),
        }
    }

    /// Merchant units per pay-currency unit, `None` when the pay amount is zero
    pub fn implied_rate(&self) -> Option<Decimal> {
        self.original_amount.checked_div(self.pay_amount)
    }

    /// Swap address, amount and currency together
    pub(crate) fn apply_quote(&mut self, quote: PaymentQuote) {
        self.pay_address = quote.pay_address;
        self.pay_amount = quote.pay_amount;
        self.pay_currency = quote.pay_currency;
    }

    /// Move to `next`. Returns `true` only when a terminal state was entered.
    pub(crate) fn advance(&mut self, next: AttemptStatus) -> bool {
        if self.status.is_terminal() || !next.is_terminal() {
            return false;
        }
        self.status = next;
        true
    }

    pub(crate) fn set_last_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Loading,
    Pending,
    Completed,
    Failed,
}

impl From<AttemptStatus> for SessionPhase {
    fn from(status: AttemptStatus) -> Self {
        match status {
            AttemptStatus::Pending => Self::Pending,
            AttemptStatus::Completed => Self::Completed,
            AttemptStatus::Failed => Self::Failed,
        }
    }
}

/// What the checkout host renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub transaction_id: String,
    pub phase: SessionPhase,
    pub attempt: Option<PaymentAttempt>,
    /// Currency shown in the selector; leads the attempt while a change is in flight
    pub selected_currency: Option<String>,
    pub refreshing: bool,
    pub changing_currency: bool,
    pub last_error: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub stopped: bool,
}

impl SessionSnapshot {
    pub fn loading(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            phase: SessionPhase::Loading,
            attempt: None,
            selected_currency: None,
            refreshing: false,
            changing_currency: false,
            last_error: None,
            last_checked_at: None,
            stopped: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, SessionPhase::Completed | SessionPhase::Failed)
    }

    /// Attempt that still accepts refreshes and currency changes
    pub fn pending_attempt(&self) -> Option<&PaymentAttempt> {
        self.attempt
            .as_ref()
            .filter(|a| a.status() == AttemptStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The session is over
    Fatal,
    /// Notification only; the session continues with its previous state
    Transient,
}

/// Notifications for the checkout host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReconcilerEvent {
    Succeeded { transaction_id: String },
    Error { severity: Severity, message: String },
}

impl ReconcilerEvent {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Error {
            severity: Severity::Fatal,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Error {
            severity: Severity::Transient,
            message: message.into(),
        }
    }

    /// The last event a session emits
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. }
                | Self::Error {
                    severity: Severity::Fatal,
                    ..
                }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// The processor answered; carries the attempt status afterwards
    Checked { status: AttemptStatus },
    /// Another refresh is already running
    Busy,
    /// No pending attempt, or the session was stopped
    Inactive,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CurrencyChangeOutcome {
    Applied {
        quote: PaymentQuote,
        /// The direct conversion failed and the USD-routed retry succeeded
        via_usd: bool,
    },
    Unchanged,
    Busy,
    Inactive,
    /// Refused before contacting the processor
    Rejected { message: String },
    Failed { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt() -> PaymentAttempt {
        PaymentAttempt::new(
            "tx_001",
            Some("4521".to_string()),
            PaymentQuote {
                pay_address: "bc1qold".to_string(),
                pay_amount: Decimal::new(21, 4),
                pay_currency: "btc".to_string(),
            },
            Decimal::new(105, 0),
            "usd",
        )
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(AttemptStatus::from(&LocalStatus::Completed), AttemptStatus::Completed);
        assert_eq!(AttemptStatus::from(&LocalStatus::Refunded), AttemptStatus::Failed);
        assert_eq!(
            AttemptStatus::from(&LocalStatus::Other("processing".into())),
            AttemptStatus::Pending
        );
        assert_eq!(
            AttemptStatus::from(&ProviderPaymentStatus::Finished),
            AttemptStatus::Completed
        );
        assert_eq!(
            AttemptStatus::from(&ProviderPaymentStatus::Confirmed),
            AttemptStatus::Pending
        );
        assert_eq!(
            AttemptStatus::from(&ProviderPaymentStatus::Expired),
            AttemptStatus::Pending
        );
    }

    #[test]
    fn test_advance_is_forward_only() {
        let mut a = attempt();
        assert!(!a.advance(AttemptStatus::Pending));
        assert!(a.advance(AttemptStatus::Completed));
        assert!(!a.advance(AttemptStatus::Failed));
        assert!(!a.advance(AttemptStatus::Completed));
        assert_eq!(a.status(), AttemptStatus::Completed);
    }

    #[test]
    fn test_apply_quote_swaps_all_fields() {
        let mut a = attempt();
        a.apply_quote(PaymentQuote {
            pay_address: "0xnew".to_string(),
            pay_amount: Decimal::new(35, 3),
            pay_currency: "eth".to_string(),
        });
        assert_eq!(a.pay_address(), "0xnew");
        assert_eq!(a.pay_amount(), Decimal::new(35, 3));
        assert_eq!(a.pay_currency(), "eth");
        assert_eq!(a.provider_payment_id(), Some("4521"));
    }

    #[test]
    fn test_implied_rate() {
        let a = attempt();
        assert_eq!(a.implied_rate(), Some(Decimal::new(50000, 0)));

        let mut zero = attempt();
        zero.apply_quote(PaymentQuote {
            pay_address: "bc1q".to_string(),
            pay_amount: Decimal::ZERO,
            pay_currency: "btc".to_string(),
        });
        assert_eq!(zero.implied_rate(), None);
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(ReconcilerEvent::transient("TUSD is currently not supported")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["severity"], "transient");
    }

    #[test]
    fn test_terminal_events() {
        assert!(ReconcilerEvent::Succeeded {
            transaction_id: "tx_001".to_string()
        }
        .is_terminal());
        assert!(ReconcilerEvent::fatal("Payment failed or was cancelled").is_terminal());
        assert!(!ReconcilerEvent::transient("TUSD is currently not supported").is_terminal());
    }
}
