use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const DEFAULT_SUCCESS_DELAY: Duration = Duration::from_secs(2);

type Completion = Box<dyn FnOnce() + Send>;

/// Invokes the host's completion callback at most once.
///
/// The callback is stored as an `FnOnce` and taken out under a lock before it
/// runs, so even two racing `schedule` calls cannot run it twice. A non-zero
/// `delay` leaves time for a success indicator; the delay is abandoned if the
/// dispatcher is cancelled first.
pub struct CompletionDispatcher {
    callback: Mutex<Option<Completion>>,
    delay: Duration,
    scheduled: AtomicBool,
    fired: AtomicBool,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl CompletionDispatcher {
    pub fn new<F>(delay: Duration, on_complete: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Arc::new(Self {
            callback: Mutex::new(Some(Box::new(on_complete))),
            delay,
            scheduled: AtomicBool::new(false),
            fired: AtomicBool::new(false),
            pending: Mutex::new(None),
        })
    }

    /// Arms the completion. Returns `false` if it was already armed.
    ///
    /// With a zero delay the callback runs inline; otherwise a task is spawned
    /// on the current tokio runtime.
    pub fn schedule(self: &Arc<Self>) -> bool {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            debug!("completion already scheduled");
            return false;
        }

        if self.delay.is_zero() {
            self.fire();
            return true;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let delay = self.delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.fire();
            }
        });
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        true
    }

    /// Drops the callback without running it, if it has not run yet.
    pub fn cancel(&self) {
        let dropped = self
            .callback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some();
        if let Some(task) = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
        if dropped {
            debug!("pending completion cancelled");
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::Acquire)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    fn fire(&self) {
        let callback = self.callback.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(callback) = callback {
            self.fired.store(true, Ordering::Release);
            info!("payment confirmed; advancing booking flow");
            callback();
        }
    }
}

impl std::fmt::Debug for CompletionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionDispatcher")
            .field("delay", &self.delay)
            .field("scheduled", &self.is_scheduled())
            .field("fired", &self.has_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(delay: Duration) -> (Arc<CompletionDispatcher>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let dispatcher = CompletionDispatcher::new(delay, move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (dispatcher, count)
    }

    #[test]
    fn test_zero_delay_fires_inline_once() {
        let (dispatcher, count) = counting(Duration::ZERO);

        assert!(dispatcher.schedule());
        assert!(!dispatcher.schedule());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(dispatcher.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_presentation_delay() {
        let (dispatcher, count) = counting(DEFAULT_SUCCESS_DELAY);
        dispatcher.schedule();

        tokio::time::sleep(Duration::from_millis(1900)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay() {
        let (dispatcher, count) = counting(DEFAULT_SUCCESS_DELAY);
        dispatcher.schedule();

        tokio::time::sleep(Duration::from_secs(1)).await;
        dispatcher.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!dispatcher.has_fired());
        assert!(!dispatcher.schedule());
    }

    #[test]
    fn test_concurrent_schedules_fire_once() {
        let (dispatcher, count) = counting(Duration::ZERO);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let d = dispatcher.clone();
                std::thread::spawn(move || {
                    d.schedule();
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
