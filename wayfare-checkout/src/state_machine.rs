use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// Which signal confirmed the payment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionSource {
    Poller,
    ManualCheck,
}

/// Lifecycle of one payment session.
///
/// `Pending` is the only state that accepts events; `Succeeded` and `Expired`
/// are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Pending,
    Succeeded { source: CompletionSource },
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    PollerReportedPaid,
    ManualCheckReportedPaid,
    TimerExpired,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Pending)
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, SessionState::Succeeded { .. })
    }

    /// Transition table. `None` means the event is not accepted in this state.
    pub fn on_event(self, event: SessionEvent) -> Option<SessionState> {
        match (self, event) {
            (SessionState::Pending, SessionEvent::PollerReportedPaid) => {
                Some(SessionState::Succeeded {
                    source: CompletionSource::Poller,
                })
            }
            (SessionState::Pending, SessionEvent::ManualCheckReportedPaid) => {
                Some(SessionState::Succeeded {
                    source: CompletionSource::ManualCheck,
                })
            }
            (SessionState::Pending, SessionEvent::TimerExpired) => Some(SessionState::Expired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The session already reached `Succeeded` or `Expired`.
    Terminal,
    /// The owning controller was torn down.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied(SessionState),
    Rejected {
        state: SessionState,
        reason: RejectReason,
    },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

#[derive(Debug)]
struct MachineInner {
    state: SessionState,
    closed: bool,
}

/// Single source of truth for a session's state.
///
/// Every signal (timer, poller, manual check) goes through [`apply`], which
/// checks and sets under one lock, so the first event to arrive while
/// `Pending` wins and everything after it is discarded. Observers get every
/// accepted state through a `watch` channel.
///
/// [`apply`]: SessionStateMachine::apply
#[derive(Debug)]
pub struct SessionStateMachine {
    inner: Mutex<MachineInner>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionStateMachine {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(SessionState::Pending);
        Self {
            inner: Mutex::new(MachineInner {
                state: SessionState::Pending,
                closed: false,
            }),
            state_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn apply(&self, event: SessionEvent) -> Transition {
        let mut inner = self.lock();

        if inner.closed {
            debug!(?event, state = ?inner.state, "ignoring event for closed session");
            return Transition::Rejected {
                state: inner.state,
                reason: RejectReason::Closed,
            };
        }

        match inner.state.on_event(event) {
            Some(next) => {
                inner.state = next;
                // published while still holding the lock so observers see
                // transitions in the order they were applied
                self.state_tx.send_replace(next);
                Transition::Applied(next)
            }
            None => {
                debug!(?event, state = ?inner.state, "ignoring event for terminal session");
                Transition::Rejected {
                    state: inner.state,
                    reason: RejectReason::Terminal,
                }
            }
        }
    }

    /// Stops accepting events. Returns `true` the first time only.
    pub fn close(&self) -> bool {
        let mut inner = self.lock();
        let newly_closed = !inner.closed;
        inner.closed = true;
        newly_closed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MachineInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_event() -> impl Strategy<Value = SessionEvent> {
        prop_oneof![
            Just(SessionEvent::PollerReportedPaid),
            Just(SessionEvent::ManualCheckReportedPaid),
            Just(SessionEvent::TimerExpired),
        ]
    }

    #[test]
    fn test_pending_transitions() {
        let machine = SessionStateMachine::new();
        assert_eq!(
            machine.apply(SessionEvent::ManualCheckReportedPaid),
            Transition::Applied(SessionState::Succeeded {
                source: CompletionSource::ManualCheck
            })
        );

        let machine = SessionStateMachine::new();
        assert_eq!(
            machine.apply(SessionEvent::TimerExpired),
            Transition::Applied(SessionState::Expired)
        );
    }

    #[test]
    fn test_terminal_state_rejects_everything() {
        let machine = SessionStateMachine::new();
        machine.apply(SessionEvent::TimerExpired);

        for event in [
            SessionEvent::PollerReportedPaid,
            SessionEvent::ManualCheckReportedPaid,
            SessionEvent::TimerExpired,
        ] {
            assert_eq!(
                machine.apply(event),
                Transition::Rejected {
                    state: SessionState::Expired,
                    reason: RejectReason::Terminal,
                }
            );
        }
        assert_eq!(machine.state(), SessionState::Expired);
    }

    #[test]
    fn test_closed_machine_keeps_its_state() {
        let machine = SessionStateMachine::new();
        assert!(machine.close());
        assert!(!machine.close());

        let result = machine.apply(SessionEvent::PollerReportedPaid);
        assert_eq!(
            result,
            Transition::Rejected {
                state: SessionState::Pending,
                reason: RejectReason::Closed,
            }
        );
        assert_eq!(machine.state(), SessionState::Pending);
    }

    #[test]
    fn test_watch_publishes_accepted_state() {
        let machine = SessionStateMachine::new();
        let rx = machine.subscribe();
        assert_eq!(*rx.borrow(), SessionState::Pending);

        machine.apply(SessionEvent::PollerReportedPaid);
        assert_eq!(
            *rx.borrow(),
            SessionState::Succeeded {
                source: CompletionSource::Poller
            }
        );
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_value(SessionState::Succeeded {
            source: CompletionSource::ManualCheck,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"state": "SUCCEEDED", "source": "MANUAL_CHECK"})
        );
        assert_eq!(
            serde_json::to_value(SessionState::Expired).unwrap(),
            serde_json::json!({"state": "EXPIRED"})
        );
    }

    proptest! {
        #[test]
        fn first_event_decides_and_nothing_moves_afterwards(
            events in proptest::collection::vec(any_event(), 1..32)
        ) {
            let machine = SessionStateMachine::new();
            let expected = SessionState::Pending.on_event(events[0]).unwrap();

            let applied = events
                .iter()
                .filter(|e| machine.apply(**e).is_applied())
                .count();

            prop_assert_eq!(applied, 1);
            prop_assert_eq!(machine.state(), expected);
        }
    }
}
