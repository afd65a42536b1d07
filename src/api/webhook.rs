use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use http::HeaderMap;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::AppState;

pub const IPN_SIGNATURE_HEADER: &str = "x-nowpayments-sig";

#[derive(Debug, Deserialize)]
struct IpnNotification {
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
}

/// NOWPayments instant payment notification
///
/// The local record stays authoritative; a verified notification only makes
/// the matching session check it right away.
pub async fn nowpayments_ipn(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get(IPN_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let processor = state.sessions.reconciler().processor();
    if signature.is_empty() || !processor.validate_ipn_signature(&body, signature) {
        warn!("rejecting NOWPayments notification with invalid signature");
        return StatusCode::UNAUTHORIZED;
    }

    let notification: IpnNotification = match serde_json::from_slice(&body) {
        Ok(n) => n,
        Err(e) => {
            warn!("malformed NOWPayments notification: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    info!(
        order_id = notification.order_id.as_deref().unwrap_or("none"),
        payment_status = notification.payment_status.as_deref().unwrap_or("unknown"),
        "NOWPayments notification received"
    );

    match notification
        .order_id
        .as_deref()
        .and_then(|id| state.sessions.get(id))
    {
        Some(session) => session.handle().poll_now().await,
        None => debug!("no open checkout session for notification"),
    }

    StatusCode::OK
}
