use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;
use wayfare_core::PaymentStatusProvider;

use crate::error::CheckError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckOutcome {
    pub paid: bool,
}

/// User-triggered, one-shot status query with a re-entrancy guard.
#[derive(Debug, Default)]
pub struct ManualCheck {
    in_flight: Arc<AtomicBool>,
}

impl ManualCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Claims the trigger, or fails with [`CheckError::Busy`] while another
    /// check holds it. The claim is released when the permit is dropped.
    pub fn try_begin(&self) -> Result<CheckPermit, CheckError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| CheckError::Busy)?;
        Ok(CheckPermit {
            in_flight: self.in_flight.clone(),
        })
    }

    pub async fn check(
        &self,
        booking_id: Uuid,
        provider: &dyn PaymentStatusProvider,
    ) -> Result<CheckOutcome, CheckError> {
        let permit = self.try_begin()?;
        permit.query(booking_id, provider).await
    }
}

/// Proof that the holder owns the manual check trigger.
#[derive(Debug)]
pub struct CheckPermit {
    in_flight: Arc<AtomicBool>,
}

impl CheckPermit {
    pub async fn query(
        self,
        booking_id: Uuid,
        provider: &dyn PaymentStatusProvider,
    ) -> Result<CheckOutcome, CheckError> {
        let status = provider.booking_status(booking_id).await?;
        Ok(CheckOutcome {
            paid: status.is_paid(),
        })
    }
}

impl Drop for CheckPermit {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStatusProvider;
    use std::time::Duration;
    use wayfare_core::{PaymentStatus, ProviderError};

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_checks_are_rejected() {
        let provider =
            MockStatusProvider::always(PaymentStatus::Paid).with_latency(Duration::from_secs(3));
        let check = ManualCheck::new();
        let booking_id = Uuid::new_v4();

        let (first, second) = tokio::join!(
            check.check(booking_id, &provider),
            check.check(booking_id, &provider)
        );

        assert_eq!(first, Ok(CheckOutcome { paid: true }));
        assert_eq!(second, Err(CheckError::Busy));
        assert_eq!(provider.calls(), 1);
        assert!(!check.is_in_flight());
    }

    #[tokio::test]
    async fn test_not_yet_paid_and_errors_release_the_trigger() {
        let provider = MockStatusProvider::scripted(vec![
            Ok(PaymentStatus::from_code(1)),
            Err(ProviderError::Http { status: 502 }),
        ]);
        let check = ManualCheck::new();
        let booking_id = Uuid::new_v4();

        let outcome = check.check(booking_id, &provider).await;
        assert_eq!(outcome, Ok(CheckOutcome { paid: false }));

        let outcome = check.check(booking_id, &provider).await;
        assert_eq!(
            outcome,
            Err(CheckError::Provider(ProviderError::Http { status: 502 }))
        );
        assert!(!check.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_check_releases_the_trigger() {
        let provider =
            MockStatusProvider::never_paid().with_latency(Duration::from_secs(30));
        let check = ManualCheck::new();

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            check.check(Uuid::new_v4(), &provider),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(!check.is_in_flight());
        assert!(check.try_begin().is_ok());
    }
}
