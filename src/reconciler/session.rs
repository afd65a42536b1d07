//! Payment status reconciliation for one checkout session
//!
//! A session loads the attempt, polls the local record while it is pending,
//! and serves manual refreshes and currency changes. Every state mutation and
//! every host event goes through the session lock and is dropped once the
//! session has been stopped, so responses that arrive late have no effect.

use crate::database::{TransactionRecord, TransactionStore};
use crate::payments::currency::{self, DEFAULT_PAY_CURRENCY};
use crate::payments::{CurrencyUpdate, CurrencyUpdateRequest, PaymentProcessor};
use crate::reconciler::error::{ReconcilerError, ReconcilerResult};
use crate::reconciler::state::{
    AttemptStatus, CurrencyChangeOutcome, PaymentAttempt, PaymentQuote, ReconcilerEvent,
    RefreshOutcome, SessionPhase, SessionSnapshot,
};
use crate::reconciler::ReconcilerConfig;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Starts reconciliation sessions against a pair of collaborators
#[derive(Clone)]
pub struct PaymentStatusReconciler {
    store: Arc<dyn TransactionStore>,
    processor: Arc<dyn PaymentProcessor>,
    config: ReconcilerConfig,
}

impl PaymentStatusReconciler {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        processor: Arc<dyn PaymentProcessor>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            processor,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    pub fn processor(&self) -> &Arc<dyn PaymentProcessor> {
        &self.processor
    }

    /// Load `transaction_id` and keep it reconciled until a terminal state or
    /// until the returned handle is stopped or dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_reconciliation(
        &self,
        transaction_id: impl Into<String>,
    ) -> (ReconciliationHandle, mpsc::UnboundedReceiver<ReconcilerEvent>) {
        let transaction_id = transaction_id.into();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let snapshot = SessionSnapshot::loading(&transaction_id);
        let (snapshots, _) = watch::channel(snapshot.clone());
        let shutdown = CancellationToken::new();
        let polling = shutdown.child_token();

        let session = Arc::new(Session {
            transaction_id,
            store: Arc::clone(&self.store),
            processor: Arc::clone(&self.processor),
            config: self.config.clone(),
            state: Mutex::new(snapshot),
            snapshots,
            events: events_tx,
            shutdown,
            polling,
            refresh_gate: tokio::sync::Mutex::new(()),
            currency_gate: tokio::sync::Mutex::new(()),
        });

        info!(transaction_id = %session.transaction_id, "starting payment reconciliation");
        tokio::spawn(Arc::clone(&session).run());

        (ReconciliationHandle { session }, events_rx)
    }
}

/// Host-side control of a running session. Dropping it stops the session.
pub struct ReconciliationHandle {
    session: Arc<Session>,
}

impl ReconciliationHandle {
    pub fn transaction_id(&self) -> &str {
        &self.session.transaction_id
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.lock().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.snapshots.subscribe()
    }

    /// Ask the processor for the live status of the payment
    pub async fn refresh(&self) -> RefreshOutcome {
        self.session.refresh().await
    }

    /// Re-quote the payment in `code`
    pub async fn change_currency(&self, code: &str) -> CurrencyChangeOutcome {
        self.session.change_currency(code).await
    }

    /// Check the local record now instead of waiting for the next tick.
    /// No-op until the attempt has loaded and after polling has ended.
    pub async fn poll_now(&self) {
        if self.session.polling.is_cancelled() {
            return;
        }
        let loading = self.session.lock().phase == SessionPhase::Loading;
        if loading {
            return;
        }
        self.session.poll_once().await;
    }

    pub fn stop(&self) {
        self.session.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.session.shutdown.is_cancelled()
    }
}

impl Drop for ReconciliationHandle {
    fn drop(&mut self) {
        self.session.stop();
    }
}

struct Session {
    transaction_id: String,
    store: Arc<dyn TransactionStore>,
    processor: Arc<dyn PaymentProcessor>,
    config: ReconcilerConfig,
    state: Mutex<SessionSnapshot>,
    snapshots: watch::Sender<SessionSnapshot>,
    events: mpsc::UnboundedSender<ReconcilerEvent>,
    /// Cancelled by `stop`
    shutdown: CancellationToken,
    /// Child of `shutdown`, also cancelled on reaching a terminal state
    polling: CancellationToken,
    refresh_gate: tokio::sync::Mutex<()>,
    currency_gate: tokio::sync::Mutex<()>,
}

impl Session {
    fn lock(&self) -> MutexGuard<'_, SessionSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the snapshot and publish it. `None` once the session is stopped.
    fn update<R>(&self, f: impl FnOnce(&mut SessionSnapshot) -> R) -> Option<R> {
        let mut state = self.lock();
        if state.stopped {
            return None;
        }
        let out = f(&mut state);
        self.snapshots.send_replace(state.clone());
        Some(out)
    }

    fn emit(&self, event: ReconcilerEvent) {
        // The receiver may be gone if the host stopped listening.
        let _ = self.events.send(event);
    }

    fn notify_transient(&self, message: String) {
        let state = self.lock();
        if state.stopped {
            return;
        }
        warn!(transaction_id = %self.transaction_id, "{}", message);
        self.emit(ReconcilerEvent::transient(message));
    }

    fn stop(&self) {
        {
            let mut state = self.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.refreshing = false;
            state.changing_currency = false;
            self.snapshots.send_replace(state.clone());
        }
        self.shutdown.cancel();
        info!(transaction_id = %self.transaction_id, "payment reconciliation stopped");
    }

    async fn run(self: Arc<Self>) {
        let loaded = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            loaded = self.load() => loaded,
        };

        match loaded {
            Ok((attempt, status)) => {
                let installed = self.update(|state| {
                    state.phase = SessionPhase::Pending;
                    state.selected_currency = Some(attempt.pay_currency().to_string());
                    state.last_checked_at = Some(chrono::Utc::now());
                    state.attempt = Some(attempt);
                });
                if installed.is_none() {
                    return;
                }
                self.observe(status, "load");
            }
            Err(err) => {
                self.fail_session(err);
                return;
            }
        }

        self.poll_loop().await;
    }

    async fn load(&self) -> ReconcilerResult<(PaymentAttempt, AttemptStatus)> {
        let record = self
            .store
            .fetch_transaction(&self.transaction_id)
            .await
            .map_err(ReconcilerError::Store)?
            .ok_or_else(|| ReconcilerError::NotFound {
                transaction_id: self.transaction_id.clone(),
            })?;

        let provider_payment_id = record.resolved_provider_payment_id();
        let live = match provider_payment_id.as_deref() {
            Some(id) => match self.processor.get_session(id).await {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!(
                        transaction_id = %self.transaction_id,
                        provider_payment_id = id,
                        "processor lookup failed, using cached payment details: {}", e
                    );
                    None
                }
            },
            None => None,
        };

        let quote = resolve_quote(&record, live.as_ref())?;
        debug!(
            transaction_id = %self.transaction_id,
            pay_currency = %quote.pay_currency,
            live = live.is_some(),
            "payment details resolved"
        );

        let status = AttemptStatus::from(&record.status);
        let attempt = PaymentAttempt::new(
            record.id.clone(),
            provider_payment_id,
            quote,
            record.amount,
            record.currency.clone(),
        );
        Ok((attempt, status))
    }

    async fn poll_loop(self: &Arc<Self>) {
        let period = self.config.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.polling.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = self.polling.cancelled() => break,
                _ = self.poll_once() => {}
            }
        }

        debug!(transaction_id = %self.transaction_id, "polling stopped");
    }

    async fn poll_once(self: &Arc<Self>) {
        match self.store.fetch_transaction(&self.transaction_id).await {
            Ok(Some(record)) => {
                self.update(|state| state.last_checked_at = Some(chrono::Utc::now()));
                self.observe(AttemptStatus::from(&record.status), "poll");
            }
            Ok(None) => {
                warn!(transaction_id = %self.transaction_id, "transaction disappeared from the store");
            }
            Err(e) => {
                warn!(transaction_id = %self.transaction_id, "status poll failed: {}", e);
            }
        }
    }

    /// Apply an observed status. The first terminal observation wins.
    fn observe(self: &Arc<Self>, status: AttemptStatus, source: &'static str) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.stopped {
            return;
        }
        let Some(attempt) = state.attempt.as_mut() else {
            return;
        };
        if !attempt.advance(status) {
            return;
        }
        if status == AttemptStatus::Failed {
            attempt.set_last_error(ReconcilerError::PaymentFailed.to_string());
            state.last_error = Some(ReconcilerError::PaymentFailed.to_string());
        }
        state.phase = status.into();
        self.snapshots.send_replace(state.clone());
        self.polling.cancel();

        info!(transaction_id = %self.transaction_id, ?status, source, "payment reached terminal state");
        match status {
            AttemptStatus::Completed => self.schedule_success(),
            AttemptStatus::Failed => {
                self.emit(ReconcilerEvent::fatal(ReconcilerError::PaymentFailed.to_string()))
            }
            AttemptStatus::Pending => {}
        }
    }

    /// Emit `Succeeded` after the display delay unless the session is stopped first
    fn schedule_success(self: &Arc<Self>) {
        let session = Arc::clone(self);

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = session.shutdown.cancelled() => {}
                _ = tokio::time::sleep(session.config.success_delay) => {
                    let state = session.lock();
                    if !state.stopped {
                        info!(transaction_id = %session.transaction_id, "notifying payment success");
                        session.emit(ReconcilerEvent::Succeeded {
                            transaction_id: session.transaction_id.clone(),
                        });
                    }
                }
            }
        });
    }

    fn fail_session(&self, err: ReconcilerError) {
        let message = err.to_string();
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        error!(transaction_id = %self.transaction_id, "payment session failed to load: {}", message);
        state.phase = SessionPhase::Failed;
        state.last_error = Some(message.clone());
        self.snapshots.send_replace(state.clone());
        self.polling.cancel();
        self.emit(ReconcilerEvent::fatal(message));
    }

    async fn refresh(self: &Arc<Self>) -> RefreshOutcome {
        let Ok(_guard) = self.refresh_gate.try_lock() else {
            return RefreshOutcome::Busy;
        };

        let provider_payment_id = {
            let state = self.lock();
            if state.stopped {
                return RefreshOutcome::Inactive;
            }
            match state.pending_attempt() {
                Some(attempt) => attempt.provider_payment_id().map(str::to_string),
                None => return RefreshOutcome::Inactive,
            }
        };

        let Some(provider_payment_id) = provider_payment_id else {
            let message = ReconcilerError::MissingProviderSession.to_string();
            self.notify_transient(message.clone());
            return RefreshOutcome::Failed { message };
        };

        if self.update(|state| state.refreshing = true).is_none() {
            return RefreshOutcome::Inactive;
        }
        let result = match self.processor.get_session(&provider_payment_id).await {
            Ok(session) => {
                let reported = AttemptStatus::from(&session.status);
                if reported.is_terminal() {
                    Ok(self.confirm_with_record(reported).await)
                } else {
                    Ok(reported)
                }
            }
            Err(e) => Err(e),
        };
        if self.update(|state| state.refreshing = false).is_none() {
            return RefreshOutcome::Inactive;
        }

        match result {
            Ok(status) => {
                self.update(|state| state.last_checked_at = Some(chrono::Utc::now()));
                self.observe(status, "refresh");
                let status = self
                    .lock()
                    .attempt
                    .as_ref()
                    .map(PaymentAttempt::status)
                    .unwrap_or(AttemptStatus::Pending);
                RefreshOutcome::Checked { status }
            }
            Err(e) => {
                let message = ReconcilerError::Refresh(e).to_string();
                self.notify_transient(message.clone());
                RefreshOutcome::Failed { message }
            }
        }
    }

    /// The local record decides terminal transitions. A terminal status from
    /// the processor only stands while the record is still pending or cannot
    /// be read.
    async fn confirm_with_record(&self, reported: AttemptStatus) -> AttemptStatus {
        match self.store.fetch_transaction(&self.transaction_id).await {
            Ok(Some(record)) => {
                let local = AttemptStatus::from(&record.status);
                if !local.is_terminal() {
                    return reported;
                }
                if local != reported {
                    warn!(
                        transaction_id = %self.transaction_id,
                        ?reported,
                        ?local,
                        "processor disagrees with local record, using local record"
                    );
                }
                local
            }
            Ok(None) => reported,
            Err(e) => {
                warn!(
                    transaction_id = %self.transaction_id,
                    "could not confirm processor status against local record: {}", e
                );
                reported
            }
        }
    }

    async fn change_currency(&self, requested: &str) -> CurrencyChangeOutcome {
        let code = requested.trim().to_ascii_lowercase();

        let Ok(_guard) = self.currency_gate.try_lock() else {
            return CurrencyChangeOutcome::Busy;
        };

        let current = {
            let state = self.lock();
            if state.stopped {
                return CurrencyChangeOutcome::Inactive;
            }
            match state.pending_attempt() {
                Some(attempt) => attempt.pay_currency().to_string(),
                None => return CurrencyChangeOutcome::Inactive,
            }
        };
        if current == code {
            return CurrencyChangeOutcome::Unchanged;
        }

        let rejection = match currency::lookup(&code) {
            None => Some(ReconcilerError::UnknownCurrency { code: code.clone() }),
            Some(info) if !info.supported => {
                Some(ReconcilerError::UnsupportedCurrency { code: code.clone() })
            }
            Some(_) => None,
        };
        if let Some(err) = rejection {
            let message = err.to_string();
            self.notify_transient(message.clone());
            return CurrencyChangeOutcome::Rejected { message };
        }

        let started = self.update(|state| {
            state.selected_currency = Some(code.clone());
            state.changing_currency = true;
        });
        if started.is_none() {
            return CurrencyChangeOutcome::Inactive;
        }

        let (quote, via_usd) = match self.request_quote(&code, false).await {
            Ok(quote) => (Ok(quote), false),
            Err(first) => {
                warn!(
                    transaction_id = %self.transaction_id,
                    pay_currency = %code,
                    "direct conversion failed, retrying through USD: {}", first
                );
                (self.request_quote(&code, true).await, true)
            }
        };

        match quote {
            Ok(quote) => {
                let applied = self.update(|state| {
                    state.changing_currency = false;
                    match state.attempt.as_mut() {
                        Some(attempt) if attempt.status() == AttemptStatus::Pending => {
                            attempt.apply_quote(quote.clone());
                            state.selected_currency = Some(quote.pay_currency.clone());
                            true
                        }
                        Some(attempt) => {
                            state.selected_currency = Some(attempt.pay_currency().to_string());
                            false
                        }
                        None => false,
                    }
                });
                if applied == Some(true) {
                    info!(
                        transaction_id = %self.transaction_id,
                        pay_currency = %quote.pay_currency,
                        via_usd,
                        "payment currency changed"
                    );
                    CurrencyChangeOutcome::Applied { quote, via_usd }
                } else {
                    debug!(transaction_id = %self.transaction_id, "discarding quote for inactive session");
                    CurrencyChangeOutcome::Inactive
                }
            }
            Err(err) => {
                let reverted = self.update(|state| {
                    state.changing_currency = false;
                    state.selected_currency = state
                        .attempt
                        .as_ref()
                        .map(|a| a.pay_currency().to_string());
                });
                if reverted.is_none() {
                    return CurrencyChangeOutcome::Inactive;
                }
                let message = err.to_string();
                self.notify_transient(message.clone());
                CurrencyChangeOutcome::Failed { message }
            }
        }
    }

    async fn request_quote(
        &self,
        code: &str,
        force_usd_conversion: bool,
    ) -> ReconcilerResult<PaymentQuote> {
        let request = CurrencyUpdateRequest {
            transaction_id: self.transaction_id.clone(),
            pay_currency: code.to_string(),
            force_usd_conversion,
        };

        let update = self
            .processor
            .update_currency(request)
            .await
            .map_err(|e| ReconcilerError::CurrencyChange {
                code: code.to_string(),
                reason: e.to_string(),
            })?;

        quote_from_update(code, update)
    }
}

/// Address and amount always come from the same source
fn resolve_quote(
    record: &TransactionRecord,
    live: Option<&crate::payments::ProviderSession>,
) -> ReconcilerResult<PaymentQuote> {
    let cached_currency = record.cached_pay_currency();

    let live_quote = live.and_then(|session| {
        let address = session.pay_address.clone()?;
        let amount = session.pay_amount.or_else(|| record.cached_pay_amount());
        let currency = session.pay_currency.clone().or_else(|| cached_currency.clone());
        Some((address, amount, currency))
    });

    let (pay_address, pay_amount, pay_currency) = match live_quote {
        Some(found) => found,
        None => {
            let address = record
                .cached_pay_address()
                .ok_or(ReconcilerError::MissingAddress)?;
            (address, record.cached_pay_amount(), cached_currency)
        }
    };

    let pay_amount = pay_amount.unwrap_or_else(|| {
        warn!(transaction_id = %record.id, "no pay amount recorded for payment");
        Decimal::ZERO
    });

    Ok(PaymentQuote {
        pay_address,
        pay_amount,
        pay_currency: pay_currency.unwrap_or_else(|| DEFAULT_PAY_CURRENCY.to_string()),
    })
}

fn quote_from_update(code: &str, update: CurrencyUpdate) -> ReconcilerResult<PaymentQuote> {
    let refused = |reason: String| ReconcilerError::CurrencyChange {
        code: code.to_string(),
        reason,
    };

    if !update.success {
        return Err(refused(
            update
                .message
                .unwrap_or_else(|| "conversion refused by processor".to_string()),
        ));
    }

    match (update.pay_address, update.pay_amount) {
        (Some(pay_address), Some(pay_amount)) if !pay_address.trim().is_empty() => {
            Ok(PaymentQuote {
                pay_address,
                pay_amount,
                pay_currency: code.to_string(),
            })
        }
        _ => Err(refused("processor returned an incomplete quote".to_string())),
    }
}
