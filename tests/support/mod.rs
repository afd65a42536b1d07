//! In-memory collaborators for reconciler and API tests

#![allow(dead_code)]

use async_trait::async_trait;
use checkout_reconciler::database::error::{DatabaseError, DatabaseErrorKind};
use checkout_reconciler::database::{LocalStatus, TransactionRecord, TransactionStore};
use checkout_reconciler::payments::providers::nowpayments::ipn_signature;
use checkout_reconciler::payments::{
    CurrencyUpdate, CurrencyUpdateRequest, PaymentProcessor, ProviderPaymentStatus,
    ProviderSession,
};
use checkout_reconciler::reconciler::{ReconciliationHandle, SessionPhase, SessionSnapshot};
use checkout_reconciler::{AppError, AppResult};
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const LIVE_ADDRESS: &str = "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh";
pub const CACHED_ADDRESS: &str = "bc1qcachedaddress0000000000000000000000";
pub const ETH_ADDRESS: &str = "0x71C7656EC7ab88b098defB751B7401B5f6d8976F";
pub const IPN_SECRET: &str = "test_ipn_secret";

pub fn pending_record(transaction_id: &str) -> TransactionRecord {
    TransactionRecord {
        id: transaction_id.to_string(),
        status: LocalStatus::Pending,
        amount: Decimal::new(105, 0),
        currency: "usd".to_string(),
        pay_amount: None,
        pay_currency: Some("btc".to_string()),
        provider_payment_id: Some("4521".to_string()),
        metadata: Some(json!({
            "pay_address": CACHED_ADDRESS,
            "pay_amount": "0.0030"
        })),
    }
}

pub fn live_session(status: ProviderPaymentStatus) -> ProviderSession {
    ProviderSession {
        payment_id: "4521".to_string(),
        pay_address: Some(LIVE_ADDRESS.to_string()),
        pay_amount: Some(Decimal::new(21, 4)),
        pay_currency: Some("btc".to_string()),
        status,
    }
}

pub fn eth_quote() -> CurrencyUpdate {
    CurrencyUpdate {
        success: true,
        pay_address: Some(ETH_ADDRESS.to_string()),
        pay_amount: Some(Decimal::new(35, 3)),
        message: None,
    }
}

fn unavailable(what: &str) -> AppError {
    AppError::payment_provider("NOWPayments", format!("{} unavailable", what), true)
}

pub struct FakeStore {
    record: Mutex<Option<TransactionRecord>>,
    failing: AtomicBool,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeStore {
    pub fn with_record(record: TransactionRecord) -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(Some(record)),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        })
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            record: Mutex::new(None),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        })
    }

    pub fn set_status(&self, status: LocalStatus) {
        if let Some(record) = self.record.lock().unwrap().as_mut() {
            record.status = status;
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make every fetch wait until the returned `Notify` is signalled.
    /// The record is read after the wait.
    pub fn hold(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    pub fn unhold(&self) {
        *self.gate.lock().unwrap() = None;
    }
}

#[async_trait]
impl TransactionStore for FakeStore {
    async fn fetch_transaction(
        &self,
        _transaction_id: &str,
    ) -> AppResult<Option<TransactionRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionTimeout).into());
        }
        Ok(self.record.lock().unwrap().clone())
    }
}

pub struct FakeProcessor {
    session: Mutex<Option<ProviderSession>>,
    updates: Mutex<VecDeque<Option<CurrencyUpdate>>>,
    update_requests: Mutex<Vec<CurrencyUpdateRequest>>,
    session_calls: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeProcessor {
    /// `None` makes every session lookup fail
    pub fn new(session: Option<ProviderSession>) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(session),
            updates: Mutex::new(VecDeque::new()),
            update_requests: Mutex::new(Vec::new()),
            session_calls: AtomicUsize::new(0),
            gate: Mutex::new(None),
        })
    }

    pub fn set_session(&self, session: Option<ProviderSession>) {
        *self.session.lock().unwrap() = session;
    }

    /// Queue currency update responses; `None` entries fail with an error
    pub fn queue_updates(&self, responses: Vec<Option<CurrencyUpdate>>) {
        self.updates.lock().unwrap().extend(responses);
    }

    /// Make every call wait until the returned `Notify` is signalled
    pub fn hold(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&notify));
        notify
    }

    pub fn unhold(&self) {
        *self.gate.lock().unwrap() = None;
    }

    pub fn session_calls(&self) -> usize {
        self.session_calls.load(Ordering::SeqCst)
    }

    pub fn update_requests(&self) -> Vec<CurrencyUpdateRequest> {
        self.update_requests.lock().unwrap().clone()
    }

    async fn wait_at_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl PaymentProcessor for FakeProcessor {
    async fn get_session(&self, _provider_payment_id: &str) -> AppResult<ProviderSession> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_at_gate().await;
        self.session
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| unavailable("session lookup"))
    }

    async fn update_currency(&self, request: CurrencyUpdateRequest) -> AppResult<CurrencyUpdate> {
        self.update_requests.lock().unwrap().push(request);
        self.wait_at_gate().await;
        self.updates
            .lock()
            .unwrap()
            .pop_front()
            .flatten()
            .ok_or_else(|| unavailable("currency update"))
    }

    fn validate_ipn_signature(&self, payload: &[u8], signature: &str) -> bool {
        ipn_signature(IPN_SECRET, payload).as_deref() == Some(signature)
    }
}

/// Wait (bounded) until the session snapshot satisfies `predicate`
pub async fn wait_for_snapshot(
    handle: &ReconciliationHandle,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    let mut rx = handle.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("snapshot channel closed")
        .clone();
    snapshot
}

pub async fn wait_for_phase(handle: &ReconciliationHandle, phase: SessionPhase) -> SessionSnapshot {
    wait_for_snapshot(handle, |s| s.phase == phase).await
}

/// Let other tasks run until `condition` holds
pub async fn until(mut condition: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
