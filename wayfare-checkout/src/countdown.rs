use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use wayfare_core::Clock;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

const RUNNING: u8 = 0;
const STOPPED: u8 = 1;
const EXPIRED: u8 = 2;

/// Counts down to a fixed expiry instant.
pub struct CountdownTimer;

impl CountdownTimer {
    /// Spawns the countdown on the current tokio runtime.
    ///
    /// The first tick is immediate. Every tick compares `expires_at` against
    /// `clock`: while time remains `on_tick(remaining)` is called, otherwise
    /// `on_expire` runs once and the countdown ends. `on_expire` never runs
    /// after [`TimerHandle::stop`] has returned.
    pub fn start<T, E>(
        expires_at: DateTime<Utc>,
        clock: Arc<dyn Clock>,
        cadence: Duration,
        mut on_tick: T,
        on_expire: E,
    ) -> TimerHandle
    where
        T: FnMut(Duration) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let phase = Arc::new(AtomicU8::new(RUNNING));
        let task_phase = phase.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut on_expire = Some(on_expire);

            loop {
                ticker.tick().await;
                if task_phase.load(Ordering::Acquire) != RUNNING {
                    break;
                }

                match (expires_at - clock.now()).to_std() {
                    Ok(remaining) if !remaining.is_zero() => on_tick(remaining),
                    _ => {
                        if task_phase
                            .compare_exchange(RUNNING, EXPIRED, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            debug!(%expires_at, "countdown reached expiry");
                            if let Some(on_expire) = on_expire.take() {
                                on_expire();
                            }
                        }
                        break;
                    }
                }
            }
        });

        TimerHandle { phase, task }
    }
}

/// Owns a running countdown. Dropping the handle stops it.
#[derive(Debug)]
pub struct TimerHandle {
    phase: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Idempotent; a no-op once stopped or expired.
    pub fn stop(&self) {
        if self
            .phase
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            debug!("countdown stopped");
        }
        self.task.abort();
    }

    pub fn is_running(&self) -> bool {
        self.phase.load(Ordering::Acquire) == RUNNING
    }

    pub fn is_expired(&self) -> bool {
        self.phase.load(Ordering::Acquire) == EXPIRED
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use wayfare_core::TokioClock;

    struct Recorder {
        ticks: Arc<Mutex<Vec<u64>>>,
        expired: Arc<AtomicUsize>,
    }

    fn start_recorded(expires_in: chrono::Duration) -> (TimerHandle, Recorder) {
        let now = Utc::now();
        let clock = Arc::new(TokioClock::anchored_at(now));
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let expired = Arc::new(AtomicUsize::new(0));

        let tick_log = ticks.clone();
        let expire_count = expired.clone();
        let handle = CountdownTimer::start(
            now + expires_in,
            clock,
            DEFAULT_TICK,
            move |remaining| tick_log.lock().unwrap().push(remaining.as_secs()),
            move || {
                expire_count.fetch_add(1, Ordering::SeqCst);
            },
        );
        (handle, Recorder { ticks, expired })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_down_then_expires_once() {
        let (handle, recorder) = start_recorded(chrono::Duration::seconds(3));

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(*recorder.ticks.lock().unwrap(), vec![3, 2, 1]);
        assert_eq!(recorder.expired.load(Ordering::SeqCst), 1);
        assert!(handle.is_expired());
        assert!(!handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_expiry() {
        let (handle, recorder) = start_recorded(chrono::Duration::seconds(5));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        handle.stop();
        handle.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(recorder.expired.load(Ordering::SeqCst), 0);
        assert_eq!(*recorder.ticks.lock().unwrap(), vec![5, 4, 3]);
        assert!(!handle.is_running());
        assert!(!handle.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_after_expiry_is_noop() {
        let (handle, recorder) = start_recorded(chrono::Duration::seconds(1));

        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.stop();

        assert_eq!(recorder.expired.load(Ordering::SeqCst), 1);
        assert!(handle.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_expires_on_first_tick() {
        let (_handle, recorder) = start_recorded(chrono::Duration::seconds(-30));

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(recorder.ticks.lock().unwrap().is_empty());
        assert_eq!(recorder.expired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_countdown() {
        let (handle, recorder) = start_recorded(chrono::Duration::seconds(2));
        drop(handle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.expired.load(Ordering::SeqCst), 0);
    }
}
