use thiserror::Error;

/// Errors produced by the orchestration core itself.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to generate proof token")]
    TokenGeneration,
}

/// Errors reported by the credential verification backend.
///
/// Only the coarse category crosses the attempt boundary; raw backend codes
/// never reach UI-facing surfaces.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The submitted secret did not verify. Recoverable: the attempt returns
    /// to the ready state and another factor may be tried.
    #[error("credential verification failed")]
    VerificationFailed,
    /// The factor is temporarily disabled after repeated failures.
    #[error("authentication factor is locked out")]
    FactorLockedOut,
    /// The backend session is gone; the attempt cannot continue.
    #[error("backend session is no longer valid")]
    SessionInvalidated,
    /// The backend could not be reached or answered with a structural error.
    #[error("credential service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl BackendError {
    /// Fatal errors close the attempt; the rest allow a retry.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SessionInvalidated | Self::ServiceUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::BackendError;

    #[test]
    fn factor_errors_are_recoverable() {
        assert!(!BackendError::VerificationFailed.is_fatal());
        assert!(!BackendError::FactorLockedOut.is_fatal());
    }

    #[test]
    fn structural_errors_are_fatal() {
        assert!(BackendError::SessionInvalidated.is_fatal());
        assert!(BackendError::ServiceUnavailable("down".to_string()).is_fatal());
    }
}
