use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::api::{AppState, CheckoutSession};
use crate::payments::currency::{self, CurrencyInfo};
use crate::reconciler::{CurrencyChangeOutcome, ReconcilerEvent, RefreshOutcome, SessionSnapshot};

#[derive(Debug, Serialize)]
pub struct CheckoutView {
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
    /// Merchant units per pay-currency unit
    pub implied_rate: Option<Decimal>,
    pub notifications: Vec<ReconcilerEvent>,
}

impl CheckoutView {
    fn new(snapshot: SessionSnapshot, notifications: Vec<ReconcilerEvent>) -> Self {
        let implied_rate = snapshot.attempt.as_ref().and_then(|a| a.implied_rate());
        Self {
            snapshot,
            implied_rate,
            notifications,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CurrencyChangeBody {
    pub currency: String,
}

fn session(state: &AppState, transaction_id: &str) -> Result<std::sync::Arc<CheckoutSession>, StatusCode> {
    state
        .sessions
        .get(transaction_id)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn list_currencies() -> Json<&'static [CurrencyInfo]> {
    Json(currency::catalog())
}

pub async fn start_checkout(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> (StatusCode, Json<CheckoutView>) {
    let (session, created) = state.sessions.start(&transaction_id);
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    (
        status,
        Json(CheckoutView::new(session.handle().snapshot(), Vec::new())),
    )
}

pub async fn get_checkout(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<CheckoutView>, StatusCode> {
    let session = session(&state, &transaction_id)?;
    let snapshot = session.handle().snapshot();
    Ok(Json(CheckoutView::new(
        snapshot,
        session.drain_notifications(),
    )))
}

pub async fn refresh_checkout(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<Json<RefreshOutcome>, StatusCode> {
    let session = session(&state, &transaction_id)?;
    Ok(Json(session.handle().refresh().await))
}

pub async fn change_currency(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
    Json(body): Json<CurrencyChangeBody>,
) -> Result<Json<CurrencyChangeOutcome>, StatusCode> {
    let session = session(&state, &transaction_id)?;
    Ok(Json(session.handle().change_currency(&body.currency).await))
}

pub async fn stop_checkout(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> StatusCode {
    if state.sessions.remove(&transaction_id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
