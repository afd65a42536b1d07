//! NOWPayments processor implementation
//!
//! Session lookups go straight to the NOWPayments REST API. Currency re-quotes
//! go through the merchant gateway endpoint, which owns the processor-side
//! session update and the local record write.

use crate::error::{AppError, AppErrorKind, ExternalError};
use crate::payments::traits::PaymentProcessor;
use crate::payments::types::{
    CurrencyUpdate, CurrencyUpdateRequest, ProviderPaymentStatus, ProviderSession,
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::Sha512;
use std::time::Duration;
use tracing::{error, info, warn};

const PROVIDER: &str = "NOWPayments";

/// NOWPayments provider configuration
#[derive(Debug, Clone)]
pub struct NowPaymentsConfig {
    /// NOWPayments API key, sent as `x-api-key`
    pub api_key: String,
    /// API base URL (defaults to https://api.nowpayments.io/v1)
    pub base_url: String,
    /// Merchant gateway endpoint that re-quotes a payment in another currency
    pub currency_update_url: String,
    /// Bearer token for the merchant gateway
    pub gateway_token: Option<String>,
    /// Secret used to sign instant payment notifications
    pub ipn_secret: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum number of retries for failed requests
    pub max_retries: u32,
}

impl Default for NowPaymentsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.nowpayments.io/v1".to_string(),
            currency_update_url: String::new(),
            gateway_token: None,
            ipn_secret: None,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl NowPaymentsConfig {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        let api_key = std::env::var("NOWPAYMENTS_API_KEY").map_err(|_| {
            AppError::configuration("NOWPAYMENTS_API_KEY environment variable is required")
        })?;

        let currency_update_url = std::env::var("NOWPAYMENTS_CURRENCY_UPDATE_URL").map_err(|_| {
            AppError::configuration(
                "NOWPAYMENTS_CURRENCY_UPDATE_URL environment variable is required",
            )
        })?;

        let defaults = Self::default();

        let base_url = std::env::var("NOWPAYMENTS_BASE_URL").unwrap_or(defaults.base_url);

        let gateway_token = std::env::var("NOWPAYMENTS_GATEWAY_TOKEN").ok();
        let ipn_secret = std::env::var("NOWPAYMENTS_IPN_SECRET").ok();

        let timeout_secs = std::env::var("NOWPAYMENTS_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.timeout_secs);

        let max_retries = std::env::var("NOWPAYMENTS_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retries);

        Ok(Self {
            api_key,
            base_url,
            currency_update_url,
            gateway_token,
            ipn_secret,
            timeout_secs,
            max_retries,
        })
    }
}

/// NOWPayments payment processor
pub struct NowPaymentsProvider {
    config: NowPaymentsConfig,
    client: Client,
}

impl NowPaymentsProvider {
    /// Create a new NOWPayments provider instance
    pub fn new(config: NowPaymentsConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("checkout-reconciler/0.1")
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Create provider from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        Self::new(NowPaymentsConfig::from_env()?)
    }

    pub fn config(&self) -> &NowPaymentsConfig {
        &self.config
    }

    /// Send a request, retrying retryable failures up to `max_retries` times
    /// with exponential backoff
    async fn send_with_retry<T>(
        &self,
        request: reqwest::RequestBuilder,
        max_retries: u32,
    ) -> Result<T, AppError>
    where
        T: DeserializeOwned,
    {
        let mut attempt = 0;

        loop {
            let Some(req) = request.try_clone() else {
                return Err(AppError::payment_provider(
                    PROVIDER,
                    "Failed to clone request",
                    false,
                ));
            };

            let err = match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();

                    if status.is_success() {
                        return serde_json::from_str::<T>(&body).map_err(|e| {
                            error!("Failed to parse NOWPayments response: {}", e);
                            AppError::payment_provider(
                                PROVIDER,
                                format!("Invalid response format: {}", e),
                                false,
                            )
                        });
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        AppError::new(AppErrorKind::External(ExternalError::RateLimit {
                            service: PROVIDER.to_string(),
                            retry_after: Some(60),
                        }))
                    } else {
                        let message = extract_error_message(&body)
                            .unwrap_or_else(|| format!("HTTP {}: {}", status, body));
                        AppError::payment_provider(PROVIDER, message, status.is_server_error())
                    }
                }
                Err(e) if e.is_timeout() => AppError::new(AppErrorKind::External(
                    ExternalError::Timeout {
                        service: PROVIDER.to_string(),
                        seconds: self.config.timeout_secs,
                    },
                )),
                Err(e) => AppError::payment_provider(
                    PROVIDER,
                    format!("Request failed: {}", e),
                    true,
                ),
            };

            if attempt >= max_retries || !err.is_retryable() {
                error!(attempt = attempt + 1, "NOWPayments request failed: {}", err);
                return Err(err);
            }

            let backoff = Duration::from_secs(2_u64.pow(attempt));
            warn!(
                attempt = attempt + 1,
                backoff_secs = backoff.as_secs(),
                "NOWPayments request failed, retrying: {}", err
            );
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl PaymentProcessor for NowPaymentsProvider {
    async fn get_session(&self, provider_payment_id: &str) -> crate::error::AppResult<ProviderSession> {
        info!(provider_payment_id, "fetching NOWPayments payment");

        let url = format!(
            "{}/payment/{}",
            self.config.base_url.trim_end_matches('/'),
            provider_payment_id
        );
        let request = self
            .client
            .get(&url)
            .header("x-api-key", &self.config.api_key);

        let response: NowPaymentsPaymentResponse = self
            .send_with_retry(request, self.config.max_retries)
            .await
            .map_err(|e| e.with_context(format!("get_session {}", provider_payment_id)))?;

        info!(
            provider_payment_id,
            payment_status = %response.payment_status,
            "NOWPayments payment fetched"
        );

        Ok(response.into_session(provider_payment_id))
    }

    async fn update_currency(
        &self,
        request: CurrencyUpdateRequest,
    ) -> crate::error::AppResult<CurrencyUpdate> {
        info!(
            transaction_id = %request.transaction_id,
            pay_currency = %request.pay_currency,
            force_usd_conversion = request.force_usd_conversion,
            "requesting currency re-quote"
        );

        let mut http_request = self
            .client
            .post(&self.config.currency_update_url)
            .json(&request);
        if let Some(token) = &self.config.gateway_token {
            http_request = http_request.bearer_auth(token);
        }

        // Never retried here: a re-quote is not idempotent.
        let update: CurrencyUpdate = self
            .send_with_retry(http_request, 0)
            .await
            .map_err(|e| e.with_context(format!("update_currency {}", request.transaction_id)))?;

        if update.success {
            info!(transaction_id = %request.transaction_id, "currency re-quote accepted");
        } else {
            warn!(
                transaction_id = %request.transaction_id,
                message = update.message.as_deref().unwrap_or("none"),
                "currency re-quote refused"
            );
        }

        Ok(update)
    }

    fn validate_ipn_signature(&self, payload: &[u8], signature: &str) -> bool {
        let Some(secret) = self.config.ipn_secret.as_deref() else {
            warn!("IPN received but NOWPAYMENTS_IPN_SECRET is not configured");
            return false;
        };

        match ipn_signature(secret, payload) {
            Some(computed) => constant_time_eq(&computed, signature.trim()),
            None => false,
        }
    }
}

/// Hex HMAC-SHA512 over the notification body with object keys sorted
pub fn ipn_signature(secret: &str, payload: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    let canonical = serde_json::to_string(&sort_keys(value)).ok()?;

    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(canonical.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, sort_keys(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}

fn extract_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

// GET /payment/{id} response
#[derive(Debug, Deserialize)]
struct NowPaymentsPaymentResponse {
    payment_status: String,
    #[serde(default)]
    pay_address: Option<String>,
    #[serde(default)]
    pay_amount: Option<Decimal>,
    #[serde(default)]
    pay_currency: Option<String>,
}

impl NowPaymentsPaymentResponse {
    fn into_session(self, provider_payment_id: &str) -> ProviderSession {
        ProviderSession {
            payment_id: provider_payment_id.to_string(),
            pay_address: self.pay_address.filter(|a| !a.trim().is_empty()),
            pay_amount: self.pay_amount,
            pay_currency: self.pay_currency.map(|c| c.to_ascii_lowercase()),
            status: ProviderPaymentStatus::parse(&self.payment_status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn create_test_provider(ipn_secret: Option<&str>) -> NowPaymentsProvider {
        let config = NowPaymentsConfig {
            api_key: "test_api_key".to_string(),
            currency_update_url: "http://localhost:9999/update-currency".to_string(),
            ipn_secret: ipn_secret.map(str::to_string),
            ..Default::default()
        };
        NowPaymentsProvider::new(config).unwrap()
    }

    fn sign(secret: &str, canonical: &str) -> String {
        let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_ipn_signature_sorts_keys() {
        let provider = create_test_provider(Some("ipn_secret"));
        let payload = br#"{"payment_status":"finished","order_id":"tx_001","payment_id":5077125051}"#;
        let expected = sign(
            "ipn_secret",
            r#"{"order_id":"tx_001","payment_id":5077125051,"payment_status":"finished"}"#,
        );

        assert!(provider.validate_ipn_signature(payload, &expected));
        assert!(provider.validate_ipn_signature(payload, &format!(" {} ", expected)));
    }

    #[test]
    fn test_ipn_signature_rejects_tampering() {
        let provider = create_test_provider(Some("ipn_secret"));
        let signature = sign("ipn_secret", r#"{"order_id":"tx_001","payment_status":"finished"}"#);
        let tampered = br#"{"order_id":"tx_002","payment_status":"finished"}"#;

        assert!(!provider.validate_ipn_signature(tampered, &signature));
        assert!(!provider.validate_ipn_signature(b"not json", &signature));
    }

    #[test]
    fn test_ipn_signature_requires_secret() {
        let provider = create_test_provider(None);
        let signature = sign("ipn_secret", r#"{"order_id":"tx_001"}"#);
        assert!(!provider.validate_ipn_signature(br#"{"order_id":"tx_001"}"#, &signature));
    }

    #[test]
    fn test_payment_response_mapping() {
        let body = r#"{
            "payment_id": 5077125051,
            "payment_status": "partially_paid",
            "pay_address": "bc1qexample",
            "pay_amount": 0.0021,
            "pay_currency": "BTC",
            "price_amount": 50,
            "price_currency": "usd"
        }"#;
        let response: NowPaymentsPaymentResponse = serde_json::from_str(body).unwrap();
        let session = response.into_session("5077125051");

        assert_eq!(session.status, ProviderPaymentStatus::PartiallyPaid);
        assert_eq!(session.pay_address.as_deref(), Some("bc1qexample"));
        assert_eq!(session.pay_amount, Some(Decimal::new(21, 4)));
        assert_eq!(session.pay_currency.as_deref(), Some("btc"));
    }

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(r#"{"statusCode":400,"code":"INVALID_REQUEST_PARAMS","message":"pay_currency is invalid"}"#)
                .as_deref(),
            Some("pay_currency is invalid")
        );
        assert!(extract_error_message("<html>").is_none());
    }

    async fn serve_status(status: axum::http::StatusCode) -> (String, Arc<AtomicUsize>) {
        use axum::routing::{get, post};

        let hits = Arc::new(AtomicUsize::new(0));
        let count = move |hits: Arc<AtomicUsize>| {
            move || {
                hits.fetch_add(1, Ordering::SeqCst);
                async move { status }
            }
        };
        let app = axum::Router::new()
            .route("/update-currency", post(count(Arc::clone(&hits))))
            .route("/payment/:id", get(count(Arc::clone(&hits))));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), hits)
    }

    fn provider_for(base: &str, max_retries: u32) -> NowPaymentsProvider {
        NowPaymentsProvider::new(NowPaymentsConfig {
            api_key: "test_api_key".to_string(),
            base_url: base.to_string(),
            currency_update_url: format!("{}/update-currency", base),
            max_retries,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_currency_update_is_sent_once_on_server_error() {
        let (base, hits) = serve_status(axum::http::StatusCode::BAD_GATEWAY).await;
        let provider = provider_for(&base, 3);

        let result = provider
            .update_currency(CurrencyUpdateRequest {
                transaction_id: "tx_001".to_string(),
                pay_currency: "eth".to_string(),
                force_usd_conversion: false,
            })
            .await;

        assert!(result.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_lookup_retries_server_errors() {
        let (base, hits) = serve_status(axum::http::StatusCode::BAD_GATEWAY).await;
        let provider = provider_for(&base, 1);

        let err = provider.get_session("4521").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_session_lookup_does_not_retry_client_errors() {
        let (base, hits) = serve_status(axum::http::StatusCode::BAD_REQUEST).await;
        let provider = provider_for(&base, 3);

        let err = provider.get_session("4521").await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_nowpayments_config_default() {
        let config = NowPaymentsConfig::default();
        assert_eq!(config.base_url, "https://api.nowpayments.io/v1");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_nowpayments_config_from_env_missing_key() {
        std::env::remove_var("NOWPAYMENTS_API_KEY");

        let config = NowPaymentsConfig::from_env();
        assert!(config.is_err(), "Config should fail without API key");
    }
}
