use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;
use wayfare_core::{PaymentStatus, PaymentStatusProvider, ProviderError};

type StatusResult = Result<PaymentStatus, ProviderError>;

const NOT_PAID: PaymentStatus = PaymentStatus::NotYetPaid { code: 0 };

/// Scripted stand-in for the payment status provider.
///
/// Answers are handed out in order; once the script runs dry the last answer
/// repeats. Optional latency is simulated with `tokio::time::sleep`, so it
/// plays well with a paused test runtime.
#[derive(Debug)]
pub struct MockStatusProvider {
    script: Mutex<VecDeque<StatusResult>>,
    fallback: Mutex<StatusResult>,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockStatusProvider {
    pub fn scripted(responses: Vec<StatusResult>) -> Self {
        let fallback = responses.last().cloned().unwrap_or(Ok(NOT_PAID));
        Self {
            script: Mutex::new(responses.into()),
            fallback: Mutex::new(fallback),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn always(status: PaymentStatus) -> Self {
        Self::scripted(vec![Ok(status)])
    }

    pub fn never_paid() -> Self {
        Self::always(NOT_PAID)
    }

    /// Reports "not yet paid" for the first `polls` queries, then "paid".
    pub fn paid_after(polls: usize) -> Self {
        let mut responses: Vec<StatusResult> = vec![Ok(NOT_PAID); polls];
        responses.push(Ok(PaymentStatus::Paid));
        Self::scripted(responses)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Replaces whatever is left of the script with a single repeating answer.
    pub fn respond_with(&self, result: StatusResult) {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).clear();
        *self.fallback.lock().unwrap_or_else(|e| e.into_inner()) = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_result(&self) -> StatusResult {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        match script.pop_front() {
            Some(result) => result,
            None => self
                .fallback
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentStatusProvider for MockStatusProvider {
    async fn booking_status(&self, _booking_id: Uuid) -> Result<PaymentStatus, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.next_result()
    }
}
