use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;
use wayfare_checkout::{ConfirmationSettings, PaymentConfirmation};
use wayfare_core::{Clock, PaymentStatusProvider};
use wayfare_shared::BookingAdvancedEvent;

pub const DEFAULT_SESSION_RETENTION: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn PaymentStatusProvider>,
    pub clock: Arc<dyn Clock>,
    pub settings: ConfirmationSettings,
    /// How long a terminal session stays tracked, counted from the success
    /// delay's end for succeeded sessions.
    pub session_retention: Duration,
    pub sessions: Arc<SessionRegistry>,
    pub events_tx: broadcast::Sender<BookingAdvancedEvent>,
}

impl AppState {
    pub fn new(
        provider: Arc<dyn PaymentStatusProvider>,
        clock: Arc<dyn Clock>,
        settings: ConfirmationSettings,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(100);
        Self {
            provider,
            clock,
            settings,
            session_retention: DEFAULT_SESSION_RETENTION,
            sessions: Arc::new(SessionRegistry::default()),
            events_tx,
        }
    }

    pub fn with_session_retention(mut self, retention: Duration) -> Self {
        self.session_retention = retention;
        self
    }
}

/// Live payment confirmations, keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<PaymentConfirmation>>>,
}

impl SessionRegistry {
    pub fn get(&self, session_id: &Uuid) -> Option<Arc<PaymentConfirmation>> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Tracks the confirmation built by `start`, unless `session_id` is
    /// already tracked. `start` only runs when the slot is free.
    pub fn insert_with<F>(&self, session_id: Uuid, start: F) -> Option<Arc<PaymentConfirmation>>
    where
        F: FnOnce() -> PaymentConfirmation,
    {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.contains_key(&session_id) {
            return None;
        }
        let confirmation = Arc::new(start());
        sessions.insert(session_id, confirmation.clone());
        Some(confirmation)
    }

    /// Stops tracking `session_id` and tears its confirmation down.
    pub fn remove(&self, session_id: &Uuid) -> Option<Arc<PaymentConfirmation>> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id);
        if let Some(confirmation) = &removed {
            confirmation.shutdown();
        }
        removed
    }

    /// Forgets `confirmation` once it has been terminal for `linger`.
    ///
    /// Only that exact confirmation is evicted; if the host deleted it and
    /// tracked a new one under the same id in the meantime, the newcomer stays.
    pub fn evict_when_terminal(
        self: &Arc<Self>,
        confirmation: &Arc<PaymentConfirmation>,
        linger: Duration,
    ) {
        let registry = Arc::downgrade(self);
        let tracked = Arc::downgrade(confirmation);
        let session_id = confirmation.session_id();
        let mut states = confirmation.subscribe_state();

        tokio::spawn(async move {
            // errors once the confirmation is dropped
            if states.wait_for(|state| state.is_terminal()).await.is_err() {
                return;
            }
            tokio::time::sleep(linger).await;
            if let Some(registry) = registry.upgrade() {
                if registry.evict(&session_id, &tracked) {
                    tracing::info!(session_id = %session_id, "terminal payment session evicted");
                }
            }
        });
    }

    fn evict(&self, session_id: &Uuid, tracked: &Weak<PaymentConfirmation>) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            let same = sessions
                .get(session_id)
                .is_some_and(|current| Weak::ptr_eq(&Arc::downgrade(current), tracked));
            if !same {
                return false;
            }
            sessions.remove(session_id)
        };
        if let Some(confirmation) = removed {
            confirmation.shutdown();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shutdown_all(&self) {
        let drained: Vec<_> = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, confirmation)| confirmation)
            .collect();
        for confirmation in &drained {
            confirmation.shutdown();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "payment confirmations torn down");
        }
    }
}
