use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wayfare_shared::PaymentSession;

use crate::{CoreError, CoreResult};

/// Coarse booking payment status as reported by the payment status provider.
///
/// The provider contract only documents code `3` ("Paid"). Every other code is
/// kept verbatim and treated as "not yet paid"; we do not guess at what
/// failed/cancelled codes might look like.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "status")]
pub enum PaymentStatus {
    Paid,
    NotYetPaid { code: i32 },
}

impl PaymentStatus {
    pub const PAID_CODE: i32 = 3;

    pub fn from_code(code: i32) -> Self {
        if code == Self::PAID_CODE {
            PaymentStatus::Paid
        } else {
            PaymentStatus::NotYetPaid { code }
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            PaymentStatus::Paid => Self::PAID_CODE,
            PaymentStatus::NotYetPaid { code } => *code,
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, PaymentStatus::Paid)
    }
}

/// Failures talking to the payment status provider.
///
/// None of these are fatal to a payment session: the poller keeps going and a
/// manual check can simply be retried.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Status request timed out")]
    Timeout,

    #[error("Provider responded with HTTP {status}")]
    Http { status: u16 },

    #[error("Could not decode provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ProviderError::Network(_) | ProviderError::Timeout => {
                "Could not reach the payment provider, please try again"
            }
            ProviderError::Http { .. } | ProviderError::Decode(_) => {
                "The payment provider is temporarily unavailable, please try again"
            }
        }
    }
}

/// Answers "has this booking been paid yet?".
#[async_trait]
pub trait PaymentStatusProvider: Send + Sync {
    async fn booking_status(&self, booking_id: Uuid) -> Result<PaymentStatus, ProviderError>;
}

/// Checks the fields a payment session must carry before confirmation can start.
pub fn validate_session(session: &PaymentSession) -> CoreResult<()> {
    if session.amount <= 0 {
        return Err(CoreError::ValidationError(format!(
            "amount must be positive, got {}",
            session.amount
        )));
    }
    if session.payment_reference.trim().is_empty() {
        return Err(CoreError::ValidationError(
            "payment_reference is required".to_string(),
        ));
    }
    if session.payment_url.expose().trim().is_empty() {
        return Err(CoreError::ValidationError("payment_url is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_only_code_three_is_paid() {
        assert_eq!(PaymentStatus::from_code(3), PaymentStatus::Paid);
        for code in [-1, 0, 1, 2, 4, 99] {
            let status = PaymentStatus::from_code(code);
            assert!(!status.is_paid());
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn test_validate_session() {
        let mut session = PaymentSession::new(
            Uuid::new_v4(),
            500_000,
            "TXN-42".to_string(),
            "https://pay.example/42".to_string(),
            String::new(),
            Utc::now(),
        );
        assert!(validate_session(&session).is_ok());

        session.amount = 0;
        assert!(matches!(
            validate_session(&session),
            Err(CoreError::ValidationError(_))
        ));

        session.amount = 10;
        session.payment_reference = "  ".to_string();
        assert!(validate_session(&session).is_err());
    }
}
