//! Payment processor implementations

pub mod nowpayments;

pub use nowpayments::{NowPaymentsConfig, NowPaymentsProvider};
