use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Mutex;

/// Source of "now" for everything that compares against a session expiry.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock time derived from the tokio timer.
///
/// Anchored to a UTC instant at construction and advanced by
/// `tokio::time::Instant`, so under a paused runtime (`start_paused = true`)
/// it moves in lockstep with `tokio::time::advance` and interval ticks.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor: tokio::time::Instant,
    anchor_utc: DateTime<Utc>,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    pub fn anchored_at(anchor_utc: DateTime<Utc>) -> Self {
        Self {
            anchor: tokio::time::Instant::now(),
            anchor_utc,
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Duration::from_std(self.anchor.elapsed()).unwrap_or_else(|_| Duration::zero());
        self.anchor_utc
            .checked_add_signed(elapsed)
            .unwrap_or(self.anchor_utc)
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
