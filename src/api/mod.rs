//! HTTP surface for checkout hosts

pub mod checkout;
pub mod health;
pub mod registry;
pub mod webhook;

pub use registry::{CheckoutSession, SessionRegistry, DEFAULT_RETENTION};

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::reconciler::PaymentStatusReconciler;

#[derive(Clone)]
pub struct AppState {
    pub environment: String,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(
        environment: impl Into<String>,
        reconciler: PaymentStatusReconciler,
        retention: Duration,
    ) -> Self {
        Self {
            environment: environment.into(),
            sessions: Arc::new(SessionRegistry::new(reconciler, retention)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/currencies", get(checkout::list_currencies))
        .route(
            "/checkouts/:transaction_id",
            post(checkout::start_checkout)
                .get(checkout::get_checkout)
                .delete(checkout::stop_checkout),
        )
        .route(
            "/checkouts/:transaction_id/refresh",
            post(checkout::refresh_checkout),
        )
        .route(
            "/checkouts/:transaction_id/currency",
            post(checkout::change_currency),
        )
        .route("/webhooks/nowpayments", post(webhook::nowpayments_ipn))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
