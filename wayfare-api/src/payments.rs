use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tracing::info;
use uuid::Uuid;
use wayfare_checkout::{CheckOutcome, PaymentConfirmation, SessionState};
use wayfare_core::payment::validate_session;
use wayfare_shared::{BookingAdvancedEvent, PaymentSession};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments/sessions", post(start_session))
        .route(
            "/v1/payments/sessions/{session_id}",
            get(get_session).delete(end_session),
        )
        .route("/v1/payments/sessions/{session_id}/stream", get(stream_session))
        .route("/v1/payments/sessions/{session_id}/check", post(check_payment))
}

#[derive(Debug, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub booking_id: Uuid,
    #[serde(flatten)]
    pub state: SessionState,
    pub remaining_secs: u64,
    pub completed: bool,
}

impl SessionSnapshot {
    fn of(confirmation: &PaymentConfirmation) -> Self {
        Self {
            session_id: confirmation.session_id(),
            booking_id: confirmation.booking_id(),
            state: confirmation.state(),
            remaining_secs: confirmation.remaining().as_secs(),
            completed: confirmation.is_completed(),
        }
    }
}

async fn start_session(
    State(state): State<AppState>,
    Json(session): Json<PaymentSession>,
) -> Result<(StatusCode, Json<SessionSnapshot>), AppError> {
    validate_session(&session)?;

    let session_id = session.session_id;
    let confirmation = state
        .sessions
        .insert_with(session_id, || {
            PaymentConfirmation::start(
                &session,
                state.provider.clone(),
                state.clock.clone(),
                &state.settings,
                advance_booking(&state, &session),
            )
        })
        .ok_or_else(|| {
            AppError::ConflictError(format!("Payment session {} is already tracked", session_id))
        })?;
    // a succeeded session still has its completion delay to run out
    state.sessions.evict_when_terminal(
        &confirmation,
        state.settings.success_delay + state.session_retention,
    );

    Ok((StatusCode::CREATED, Json(SessionSnapshot::of(&confirmation))))
}

/// Completion callback: the point where the host moves the booking past payment.
fn advance_booking(state: &AppState, session: &PaymentSession) -> impl FnOnce() + Send + 'static {
    let events_tx = state.events_tx.clone();
    let clock = state.clock.clone();
    let session_id = session.session_id;
    let booking_id = session.booking_id;
    let payment_reference = session.payment_reference.clone();

    move || {
        info!(
            session_id = %session_id,
            booking_id = %booking_id,
            "booking advanced past payment"
        );
        // nobody may be listening
        let _ = events_tx.send(BookingAdvancedEvent {
            session_id,
            booking_id,
            payment_reference,
            timestamp: clock.now().timestamp(),
        });
    }
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let confirmation = find(&state, session_id)?;
    Ok(Json(SessionSnapshot::of(&confirmation)))
}

async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let confirmation = state
        .sessions
        .remove(&session_id)
        .ok_or_else(|| not_found(session_id))?;
    info!(
        session_id = %session_id,
        state = ?confirmation.state(),
        "payment session closed by host"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn check_payment(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<CheckOutcome>, AppError> {
    let confirmation = find(&state, session_id)?;
    let outcome = confirmation.manual_check().await?;
    Ok(Json(outcome))
}

/// `state` on every state change, `tick` with the remaining seconds and
/// `advanced` once the booking moves on. Ends when the session is torn down.
async fn stream_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let confirmation = find(&state, session_id)?;

    let states = WatchStream::new(confirmation.subscribe_state())
        .map(|s| Event::default().event("state").json_data(s));
    let ticks = WatchStream::new(confirmation.subscribe_remaining())
        .map(|remaining| Ok::<_, axum::Error>(Event::default().event("tick").data(remaining.as_secs().to_string())));
    let advanced = BroadcastStream::new(state.events_tx.subscribe()).filter_map(move |result| async move {
        match result {
            Ok(event) if event.session_id == session_id => {
                Some(Event::default().event("advanced").json_data(event))
            }
            _ => None,
        }
    });

    let mut watcher = confirmation.subscribe_state();
    let torn_down = async move { while watcher.changed().await.is_ok() {} };

    let stream = stream::select(stream::select(states, ticks), advanced).take_until(torn_down);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn find(state: &AppState, session_id: Uuid) -> Result<Arc<PaymentConfirmation>, AppError> {
    state.sessions.get(&session_id).ok_or_else(|| not_found(session_id))
}

fn not_found(session_id: Uuid) -> AppError {
    AppError::NotFoundError(format!("Payment session {} not found", session_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfare_checkout::CompletionSource;

    #[test]
    fn test_snapshot_flattens_state() {
        let snapshot = SessionSnapshot {
            session_id: Uuid::nil(),
            booking_id: Uuid::nil(),
            state: SessionState::Succeeded {
                source: CompletionSource::ManualCheck,
            },
            remaining_secs: 42,
            completed: false,
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["state"], "SUCCEEDED");
        assert_eq!(json["source"], "MANUAL_CHECK");
        assert_eq!(json["remaining_secs"], 42);
    }
}
