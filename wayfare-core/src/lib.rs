pub mod clock;
pub mod payment;

pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use payment::{PaymentStatus, PaymentStatusProvider, ProviderError};

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
