use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, Utc};

use crate::pii::Masked;

/// One outstanding payment attempt for a booking.
///
/// Produced by the booking/payment creation step before confirmation starts.
/// The record belongs to the host flow: the confirmation controller reads
/// `booking_id` and `expires_at` but never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentSession {
    pub session_id: Uuid,
    pub booking_id: Uuid,
    pub amount: i64,
    pub payment_reference: String,
    pub payment_url: Masked<String>,
    #[serde(default)]
    pub qr_payload: Masked<String>,
    pub expires_at: DateTime<Utc>,
}

impl PaymentSession {
    pub fn new(
        booking_id: Uuid,
        amount: i64,
        payment_reference: String,
        payment_url: String,
        qr_payload: String,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            booking_id,
            amount,
            payment_reference,
            payment_url: Masked::new(payment_url),
            qr_payload: Masked::new(qr_payload),
            expires_at,
        }
    }

    /// Time left before expiry as seen at `now`, never negative.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        let remaining = self.expires_at - now;
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
