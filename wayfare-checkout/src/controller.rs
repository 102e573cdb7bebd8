use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;
use wayfare_core::{Clock, PaymentStatusProvider, ProviderError};
use wayfare_shared::PaymentSession;

use crate::countdown::{CountdownTimer, TimerHandle, DEFAULT_TICK};
use crate::dispatcher::{CompletionDispatcher, DEFAULT_SUCCESS_DELAY};
use crate::error::CheckError;
use crate::manual_check::{CheckOutcome, ManualCheck};
use crate::poller::{PollerHandle, StatusPoller, DEFAULT_POLL_INTERVAL};
use crate::state_machine::{SessionEvent, SessionState, SessionStateMachine, Transition};

/// Timing knobs for a confirmation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationSettings {
    pub poll_interval: Duration,
    pub tick: Duration,
    pub success_delay: Duration,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            tick: DEFAULT_TICK,
            success_delay: DEFAULT_SUCCESS_DELAY,
        }
    }
}

/// Confirms one payment session.
///
/// Races the countdown against the status poller (and any manual checks)
/// and advances the booking flow exactly once. The countdown and poller run as
/// tokio tasks; they only hold weak references back to the controller, so
/// dropping it (or calling [`shutdown`]) tears everything down.
///
/// [`shutdown`]: PaymentConfirmation::shutdown
pub struct PaymentConfirmation {
    shared: Arc<Shared>,
}

struct Shared {
    session_id: Uuid,
    booking_id: Uuid,
    expires_at: DateTime<Utc>,
    machine: SessionStateMachine,
    dispatcher: Arc<CompletionDispatcher>,
    manual: ManualCheck,
    provider: Arc<dyn PaymentStatusProvider>,
    remaining_tx: watch::Sender<Duration>,
    poll_errors: AtomicU64,
    timer: Mutex<Option<TimerHandle>>,
    poller: Mutex<Option<PollerHandle>>,
}

impl PaymentConfirmation {
    /// Starts the countdown and the poller for `session`. Must be called from
    /// within a tokio runtime.
    pub fn start<F>(
        session: &PaymentSession,
        provider: Arc<dyn PaymentStatusProvider>,
        clock: Arc<dyn Clock>,
        settings: &ConfirmationSettings,
        on_complete: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let initial_remaining = session
            .remaining_at(clock.now())
            .to_std()
            .unwrap_or_default();
        let shared = Arc::new(Shared::new(
            session,
            provider.clone(),
            initial_remaining,
            CompletionDispatcher::new(settings.success_delay, on_complete),
        ));

        info!(
            session_id = %session.session_id,
            booking_id = %session.booking_id,
            payment_reference = %session.payment_reference,
            remaining_secs = initial_remaining.as_secs(),
            "payment confirmation started"
        );

        let on_tick = {
            let weak = Arc::downgrade(&shared);
            move |remaining: Duration| {
                if let Some(shared) = weak.upgrade() {
                    shared.remaining_tx.send_replace(remaining);
                }
            }
        };
        let on_expire = {
            let weak = Arc::downgrade(&shared);
            move || {
                if let Some(shared) = weak.upgrade() {
                    shared.apply(SessionEvent::TimerExpired);
                }
            }
        };
        let timer = CountdownTimer::start(session.expires_at, clock, settings.tick, on_tick, on_expire);
        *lock(&shared.timer) = Some(timer);

        let on_paid = {
            let weak = Arc::downgrade(&shared);
            move || {
                if let Some(shared) = weak.upgrade() {
                    shared.apply(SessionEvent::PollerReportedPaid);
                }
            }
        };
        let on_error = {
            let weak = Arc::downgrade(&shared);
            move |_: ProviderError| {
                if let Some(shared) = weak.upgrade() {
                    shared.poll_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        };
        let poller = StatusPoller::start(
            session.booking_id,
            settings.poll_interval,
            provider,
            on_paid,
            on_error,
        );
        *lock(&shared.poller) = Some(poller);

        // a signal may have landed before both handles were stored
        if shared.machine.state().is_terminal() {
            shared.stop_timer();
            shared.stop_poller();
        }

        Self { shared }
    }

    pub fn session_id(&self) -> Uuid {
        self.shared.session_id
    }

    pub fn booking_id(&self) -> Uuid {
        self.shared.booking_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.shared.expires_at
    }

    pub fn state(&self) -> SessionState {
        self.shared.machine.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.machine.subscribe()
    }

    /// Remaining time as of the last countdown tick.
    pub fn remaining(&self) -> Duration {
        *self.shared.remaining_tx.borrow()
    }

    pub fn subscribe_remaining(&self) -> watch::Receiver<Duration> {
        self.shared.remaining_tx.subscribe()
    }

    /// Whether the host's completion callback has run.
    pub fn is_completed(&self) -> bool {
        self.shared.dispatcher.has_fired()
    }

    pub fn is_timer_running(&self) -> bool {
        lock(&self.shared.timer)
            .as_ref()
            .map(TimerHandle::is_running)
            .unwrap_or(false)
    }

    pub fn is_poller_running(&self) -> bool {
        lock(&self.shared.poller)
            .as_ref()
            .map(PollerHandle::is_running)
            .unwrap_or(false)
    }

    pub fn is_check_in_flight(&self) -> bool {
        self.shared.manual.is_in_flight()
    }

    pub fn poll_error_count(&self) -> u64 {
        self.shared.poll_errors.load(Ordering::Relaxed)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.machine.is_closed()
    }

    /// On-demand status check.
    ///
    /// Rejected with [`CheckError::Busy`] while another check is outstanding.
    /// Once the session is terminal (or the controller torn down) no query is
    /// issued and the current outcome is reported instead. A "paid" answer that
    /// arrives after the session expired or was torn down is discarded: the
    /// caller sees `paid: false` unless the session had already succeeded.
    pub async fn manual_check(&self) -> Result<CheckOutcome, CheckError> {
        let shared = &self.shared;
        let state = shared.machine.state();
        if state.is_terminal() || shared.machine.is_closed() {
            return Ok(CheckOutcome {
                paid: state.is_succeeded(),
            });
        }

        let permit = shared.manual.try_begin()?;
        let outcome = permit.query(shared.booking_id, shared.provider.as_ref()).await;

        match outcome {
            Ok(CheckOutcome { paid: true }) => match shared.apply(SessionEvent::ManualCheckReportedPaid) {
                Transition::Applied(_) => Ok(CheckOutcome { paid: true }),
                Transition::Rejected { state, .. } => {
                    // expired or torn down while the query was out
                    info!(
                        booking_id = %shared.booking_id,
                        ?state,
                        "manual check: discarding paid result for a settled session"
                    );
                    Ok(CheckOutcome {
                        paid: state.is_succeeded(),
                    })
                }
            },
            Ok(CheckOutcome { paid: false }) => {
                info!(booking_id = %shared.booking_id, "manual check: booking not yet paid");
                Ok(CheckOutcome { paid: false })
            }
            Err(e) => {
                warn!(booking_id = %shared.booking_id, error = %e, "manual payment check failed");
                Err(e)
            }
        }
    }

    /// Stops the countdown and the poller, cancels a pending completion and
    /// rejects every later event. Idempotent.
    pub fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl Drop for PaymentConfirmation {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl Shared {
    fn new(
        session: &PaymentSession,
        provider: Arc<dyn PaymentStatusProvider>,
        initial_remaining: Duration,
        dispatcher: Arc<CompletionDispatcher>,
    ) -> Self {
        let (remaining_tx, _) = watch::channel(initial_remaining);
        Self {
            session_id: session.session_id,
            booking_id: session.booking_id,
            expires_at: session.expires_at,
            machine: SessionStateMachine::new(),
            dispatcher,
            manual: ManualCheck::new(),
            provider,
            remaining_tx,
            poll_errors: AtomicU64::new(0),
            timer: Mutex::new(None),
            poller: Mutex::new(None),
        }
    }

    fn apply(&self, event: SessionEvent) -> Transition {
        let transition = self.machine.apply(event);
        if let Transition::Applied(state) = transition {
            self.on_entered(state);
        }
        transition
    }

    fn on_entered(&self, state: SessionState) {
        match state {
            SessionState::Succeeded { source } => {
                info!(
                    session_id = %self.session_id,
                    booking_id = %self.booking_id,
                    ?source,
                    "payment session succeeded"
                );
                self.stop_timer();
                self.stop_poller();
                self.dispatcher.schedule();
            }
            SessionState::Expired => {
                info!(
                    session_id = %self.session_id,
                    booking_id = %self.booking_id,
                    "payment session expired"
                );
                self.remaining_tx.send_replace(Duration::ZERO);
                self.stop_poller();
            }
            SessionState::Pending => {}
        }
    }

    fn stop_timer(&self) {
        if let Some(timer) = lock(&self.timer).as_ref() {
            timer.stop();
        }
    }

    fn stop_poller(&self) {
        if let Some(poller) = lock(&self.poller).as_ref() {
            poller.stop();
        }
    }

    fn shutdown(&self) {
        let newly_closed = self.machine.close();
        self.stop_timer();
        self.stop_poller();
        self.dispatcher.cancel();
        if newly_closed {
            info!(
                session_id = %self.session_id,
                state = ?self.machine.state(),
                "payment confirmation torn down"
            );
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStatusProvider;
    use crate::state_machine::CompletionSource;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    fn session() -> PaymentSession {
        PaymentSession::new(
            Uuid::new_v4(),
            2_400_000,
            "TXN-7781".to_string(),
            "https://pay.example/7781".to_string(),
            String::new(),
            Utc::now() + chrono::Duration::minutes(15),
        )
    }

    /// Controller internals without the background tasks, completing inline.
    fn bare() -> (Arc<Shared>, Arc<AtomicUsize>) {
        let completions = Arc::new(AtomicUsize::new(0));
        let c = completions.clone();
        let dispatcher = CompletionDispatcher::new(Duration::ZERO, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let shared = Shared::new(
            &session(),
            Arc::new(MockStatusProvider::never_paid()),
            Duration::from_secs(900),
            dispatcher,
        );
        (Arc::new(shared), completions)
    }

    fn any_event() -> impl Strategy<Value = SessionEvent> {
        prop_oneof![
            Just(SessionEvent::PollerReportedPaid),
            Just(SessionEvent::ManualCheckReportedPaid),
            Just(SessionEvent::TimerExpired),
        ]
    }

    #[test]
    fn test_expiry_publishes_zero_remaining() {
        let (shared, completions) = bare();
        shared.apply(SessionEvent::TimerExpired);

        assert_eq!(*shared.remaining_tx.borrow(), Duration::ZERO);
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_shutdown_cancels_completion_and_freezes_state() {
        let (shared, completions) = bare();
        shared.shutdown();

        let transition = shared.apply(SessionEvent::ManualCheckReportedPaid);
        assert!(!transition.is_applied());
        assert_eq!(shared.machine.state(), SessionState::Pending);
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_racing_threads_complete_once() {
        for _ in 0..50 {
            let (shared, completions) = bare();
            let threads: Vec<_> = [
                SessionEvent::PollerReportedPaid,
                SessionEvent::ManualCheckReportedPaid,
                SessionEvent::TimerExpired,
                SessionEvent::PollerReportedPaid,
            ]
            .into_iter()
            .map(|event| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    shared.apply(event);
                })
            })
            .collect();
            for t in threads {
                t.join().unwrap();
            }

            let expected = usize::from(shared.machine.state().is_succeeded());
            assert_eq!(completions.load(Ordering::SeqCst), expected);
        }
    }

    proptest! {
        #[test]
        fn completion_fires_at_most_once_for_any_event_order(
            events in proptest::collection::vec(any_event(), 0..24)
        ) {
            let (shared, completions) = bare();
            for event in &events {
                shared.apply(*event);
            }

            let first_is_paid = matches!(
                events.first(),
                Some(SessionEvent::PollerReportedPaid | SessionEvent::ManualCheckReportedPaid)
            );
            prop_assert_eq!(completions.load(Ordering::SeqCst), usize::from(first_is_paid));

            match events.first() {
                None => prop_assert_eq!(shared.machine.state(), SessionState::Pending),
                Some(SessionEvent::TimerExpired) => {
                    prop_assert_eq!(shared.machine.state(), SessionState::Expired)
                }
                Some(SessionEvent::PollerReportedPaid) => prop_assert_eq!(
                    shared.machine.state(),
                    SessionState::Succeeded { source: CompletionSource::Poller }
                ),
                Some(SessionEvent::ManualCheckReportedPaid) => prop_assert_eq!(
                    shared.machine.state(),
                    SessionState::Succeeded { source: CompletionSource::ManualCheck }
                ),
            }
        }
    }
}
