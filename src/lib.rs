//! Cryptocurrency checkout payment reconciliation
//!
//! Tracks a NOWPayments payment attempt for a merchant checkout: loads it from
//! the local transaction store, polls for settlement, and handles manual
//! refreshes and pay-currency changes on behalf of the checkout host.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod payments;
pub mod reconciler;

pub use error::{AppError, AppResult};
pub use reconciler::{PaymentStatusReconciler, ReconcilerConfig, ReconciliationHandle};
