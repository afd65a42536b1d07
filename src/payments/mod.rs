//! Payment processor integration
//!
//! The processor seam used by the reconciler, the checkout currency catalog
//! and the NOWPayments implementation.

pub mod currency;
pub mod providers;
pub mod traits;
pub mod types;

pub use traits::PaymentProcessor;
pub use types::{CurrencyUpdate, CurrencyUpdateRequest, ProviderPaymentStatus, ProviderSession};
