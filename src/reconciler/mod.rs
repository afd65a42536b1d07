//! Payment status reconciliation
//!
//! Keeps a checkout's payment attempt consistent with the local transaction
//! record and the processor's view while letting the customer switch the pay
//! currency mid-flow.

pub mod error;
pub mod session;
pub mod state;

pub use error::{ReconcilerError, ReconcilerResult};
pub use session::{PaymentStatusReconciler, ReconciliationHandle};
pub use state::{
    AttemptStatus, CurrencyChangeOutcome, PaymentAttempt, PaymentQuote, ReconcilerEvent,
    RefreshOutcome, SessionPhase, SessionSnapshot, Severity,
};

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Interval between local record checks while the payment is pending
    pub poll_interval: Duration,
    /// How long the success state stays visible before the host is notified
    pub success_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            success_delay: Duration::from_secs(2),
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_millis(
                std::env::var("RECONCILER_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(defaults.poll_interval.as_millis() as u64),
            ),
            success_delay: Duration::from_millis(
                std::env::var("RECONCILER_SUCCESS_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(defaults.success_delay.as_millis() as u64),
            ),
        }
    }
}
