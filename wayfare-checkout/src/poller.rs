use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;
use wayfare_core::{PaymentStatus, PaymentStatusProvider, ProviderError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

type StatusQuery = Pin<Box<dyn Future<Output = Result<PaymentStatus, ProviderError>> + Send>>;

/// Periodically asks the payment status provider whether a booking is paid.
pub struct StatusPoller;

impl StatusPoller {
    /// Spawns the poller on the current tokio runtime.
    ///
    /// The first query is issued one `interval` after start. Queries never
    /// overlap: a tick that fires while a query is in flight is skipped, not
    /// queued. Provider errors go to `on_error` and polling continues. On "paid",
    /// `on_paid` runs once and the poller ends.
    ///
    /// Each poller run carries a generation number. [`PollerHandle::stop`]
    /// bumps it, and a result is only applied if the generation is unchanged
    /// when it arrives, so a stopped poller never reports.
    pub fn start<P, E>(
        booking_id: Uuid,
        interval: Duration,
        provider: Arc<dyn PaymentStatusProvider>,
        on_paid: P,
        mut on_error: E,
    ) -> PollerHandle
    where
        P: FnOnce() + Send + 'static,
        E: FnMut(ProviderError) + Send + 'static,
    {
        let generation = Arc::new(AtomicU64::new(0));
        let issued = generation.load(Ordering::Acquire);
        let task_generation = generation.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut on_paid = Some(on_paid);

            info!(
                booking_id = %booking_id,
                interval_secs = interval.as_secs_f64(),
                "payment status poller started"
            );

            let mut in_flight: Option<StatusQuery> = None;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if task_generation.load(Ordering::Acquire) != issued {
                            break;
                        }
                        if in_flight.is_some() {
                            debug!(booking_id = %booking_id, "poll tick skipped; previous query still in flight");
                            continue;
                        }
                        let provider = provider.clone();
                        in_flight = Some(Box::pin(async move {
                            provider.booking_status(booking_id).await
                        }));
                    }
                    result = async {
                        match in_flight.as_mut() {
                            Some(query) => query.await,
                            None => std::future::pending().await,
                        }
                    }, if in_flight.is_some() => {
                        in_flight = None;

                        if task_generation.load(Ordering::Acquire) != issued {
                            debug!(booking_id = %booking_id, "discarding stale payment status result");
                            break;
                        }

                        match result {
                            Ok(PaymentStatus::Paid) => {
                                // claiming the generation doubles as stopping the poller
                                let claimed = task_generation
                                    .compare_exchange(issued, issued + 1, Ordering::AcqRel, Ordering::Acquire)
                                    .is_ok();
                                if claimed {
                                    info!(booking_id = %booking_id, "provider reports booking paid");
                                    if let Some(on_paid) = on_paid.take() {
                                        on_paid();
                                    }
                                }
                                break;
                            }
                            Ok(PaymentStatus::NotYetPaid { code }) => {
                                debug!(booking_id = %booking_id, status_code = code, "booking not yet paid");
                            }
                            Err(e) => {
                                warn!(booking_id = %booking_id, error = %e, "payment status poll failed; will retry");
                                on_error(e);
                            }
                        }
                    }
                }
            }
        });

        PollerHandle {
            generation,
            issued,
            task,
        }
    }
}

/// Owns a running poller. Dropping the handle stops it.
#[derive(Debug)]
pub struct PollerHandle {
    generation: Arc<AtomicU64>,
    issued: u64,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Cancels the next tick and invalidates any query still in flight.
    pub fn stop(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        self.generation.load(Ordering::Acquire) == self.issued && !self.task.is_finished()
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
