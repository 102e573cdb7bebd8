use wayfare_core::ProviderError;

/// Failures surfaced to whoever triggered a manual payment check.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CheckError {
    /// A previous check for this session has not resolved yet.
    #[error("A payment check is already in progress")]
    Busy,

    #[error("Payment status query failed: {0}")]
    Provider(#[from] ProviderError),
}

impl CheckError {
    pub fn is_retryable(&self) -> bool {
        match self {
            CheckError::Busy => false,
            CheckError::Provider(_) => true,
        }
    }
}
