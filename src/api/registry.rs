use crate::reconciler::{PaymentStatusReconciler, ReconcilerEvent, ReconciliationHandle, Severity};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long a finished session stays readable before it is discarded
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

/// Unread notifications kept per session; the oldest are dropped first
pub const MAX_PENDING_NOTIFICATIONS: usize = 32;

/// A running reconciliation plus the notifications the host has not read yet
pub struct CheckoutSession {
    handle: ReconciliationHandle,
    notifications: Arc<Mutex<VecDeque<ReconcilerEvent>>>,
}

impl CheckoutSession {
    pub fn handle(&self) -> &ReconciliationHandle {
        &self.handle
    }

    pub fn drain_notifications(&self) -> Vec<ReconcilerEvent> {
        let mut pending = self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        pending.drain(..).collect()
    }
}

/// Open checkout sessions keyed by transaction id
///
/// A session that reaches a terminal state is stopped and removed once
/// `retention` has passed, so the host can still read the final snapshot.
pub struct SessionRegistry {
    reconciler: PaymentStatusReconciler,
    sessions: Arc<DashMap<String, Arc<CheckoutSession>>>,
    retention: Duration,
}

impl SessionRegistry {
    pub fn new(reconciler: PaymentStatusReconciler, retention: Duration) -> Self {
        Self {
            reconciler,
            sessions: Arc::new(DashMap::new()),
            retention,
        }
    }

    pub fn reconciler(&self) -> &PaymentStatusReconciler {
        &self.reconciler
    }

    /// Start a session, or return the running one. `true` when newly started.
    pub fn start(&self, transaction_id: &str) -> (Arc<CheckoutSession>, bool) {
        match self.sessions.entry(transaction_id.to_string()) {
            Entry::Occupied(mut entry) => {
                if !entry.get().handle.is_stopped() {
                    return (Arc::clone(entry.get()), false);
                }
                let session = self.spawn(transaction_id);
                entry.insert(Arc::clone(&session));
                (session, true)
            }
            Entry::Vacant(entry) => {
                let session = self.spawn(transaction_id);
                entry.insert(Arc::clone(&session));
                (session, true)
            }
        }
    }

    pub fn get(&self, transaction_id: &str) -> Option<Arc<CheckoutSession>> {
        self.sessions
            .get(transaction_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Stop and forget a session
    pub fn remove(&self, transaction_id: &str) -> bool {
        match self.sessions.remove(transaction_id) {
            Some((_, session)) => {
                session.handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    fn spawn(&self, transaction_id: &str) -> Arc<CheckoutSession> {
        let (handle, mut events) = self.reconciler.start_reconciliation(transaction_id);
        let notifications = Arc::new(Mutex::new(VecDeque::new()));

        let sink = Arc::clone(&notifications);
        let sessions = Arc::clone(&self.sessions);
        let retention = self.retention;
        let id = transaction_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match &event {
                    ReconcilerEvent::Succeeded { .. } => {
                        info!(transaction_id = %id, "checkout payment succeeded")
                    }
                    ReconcilerEvent::Error {
                        severity: Severity::Fatal,
                        message,
                    } => warn!(transaction_id = %id, "checkout session ended: {}", message),
                    ReconcilerEvent::Error { message, .. } => {
                        info!(transaction_id = %id, "checkout notice: {}", message)
                    }
                }

                let terminal = event.is_terminal();
                {
                    let mut pending = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    if pending.len() >= MAX_PENDING_NOTIFICATIONS {
                        pending.pop_front();
                    }
                    pending.push_back(event);
                }

                if terminal {
                    tokio::time::sleep(retention).await;
                    // A restart may have replaced the entry in the meantime.
                    let removed = sessions.remove_if(&id, |_, session| {
                        Arc::ptr_eq(&session.notifications, &sink)
                    });
                    if let Some((_, session)) = removed {
                        session.handle.stop();
                        debug!(transaction_id = %id, "finished checkout session discarded");
                    }
                    break;
                }
            }
        });

        Arc::new(CheckoutSession {
            handle,
            notifications,
        })
    }
}
