//! Payment processor trait definitions

use crate::error::AppResult;
use crate::payments::types::{CurrencyUpdate, CurrencyUpdateRequest, ProviderSession};
use async_trait::async_trait;

/// Trait for cryptocurrency payment processor implementations
///
/// The reconciler only talks to the processor through this trait, so tests can
/// substitute an in-memory fake.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Fetch the live state of a payment session
    ///
    /// # Arguments
    /// * `provider_payment_id` - Session id assigned by the processor when the
    ///   payment was created
    async fn get_session(&self, provider_payment_id: &str) -> AppResult<ProviderSession>;

    /// Re-quote an existing payment in a different pay currency
    ///
    /// The processor keeps the same session and returns a new deposit address
    /// and amount. A response with `success == false` means the conversion was
    /// refused.
    async fn update_currency(&self, request: CurrencyUpdateRequest) -> AppResult<CurrencyUpdate>;

    /// Validate an instant payment notification signature
    ///
    /// # Arguments
    /// * `payload` - Raw notification body
    /// * `signature` - Signature from the notification header
    fn validate_ipn_signature(&self, payload: &[u8], signature: &str) -> bool;
}
