use syndicate_types::{Amount, Hash, Timestamp, TypesError};
use thiserror::Error;

/// Errors that can occur in governance operations.
///
/// Every public operation either fully applies or fails with one of these
/// and leaves the party untouched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GovernanceError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Hash mismatch for {what}: expected {expected}, got {actual}")]
    HashMismatch {
        what: &'static str,
        expected: Hash,
        actual: Hash,
    },

    #[error("Already acted: {0}")]
    AlreadyActed(String),

    #[error("Expired: deadline {deadline}, now {now}")]
    Expired { deadline: Timestamp, now: Timestamp },

    #[error("Threshold not met: {actual} < {required}")]
    ThresholdNotMet { actual: Amount, required: Amount },

    #[error("External call failed: {0}")]
    ExternalCallFailed(String),

    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    #[error("Not yet possible: available at {ready_at}, now {now}")]
    TooEarly { ready_at: Timestamp, now: Timestamp },

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Invalid snapshot hint {hint} for time {timestamp}")]
    InvalidHint { hint: usize, timestamp: Timestamp },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Decode error: {0}")]
    Decode(String),
}

/// What a caller should do after an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Inputs were wrong; resubmit with corrected inputs right away.
    RetryNow,
    /// The same call may succeed once time passes or the outside world moves.
    RetryLater,
    /// The call can never succeed (already happened, or not allowed).
    Abandon,
}

impl GovernanceError {
    /// Classify the error for the caller's retry decision.
    pub fn disposition(&self) -> Disposition {
        match self {
            GovernanceError::HashMismatch { .. }
            | GovernanceError::InvalidHint { .. }
            | GovernanceError::Decode(_) => Disposition::RetryNow,
            GovernanceError::TooEarly { .. }
            | GovernanceError::ThresholdNotMet { .. }
            | GovernanceError::ExternalCallFailed(_) => Disposition::RetryLater,
            GovernanceError::Unauthorized(_)
            | GovernanceError::InvalidState(_)
            | GovernanceError::AlreadyActed(_)
            | GovernanceError::Expired { .. }
            | GovernanceError::Arithmetic(_)
            | GovernanceError::NotFound { .. }
            | GovernanceError::InvalidParameter(_) => Disposition::Abandon,
        }
    }

    pub(crate) fn not_found(what: &'static str, id: impl ToString) -> Self {
        GovernanceError::NotFound {
            what,
            id: id.to_string(),
        }
    }

    pub(crate) fn overflow(context: &str) -> Self {
        GovernanceError::Arithmetic(format!("overflow in {}", context))
    }
}

impl From<TypesError> for GovernanceError {
    fn from(e: TypesError) -> Self {
        GovernanceError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for GovernanceError {
    fn from(e: std::io::Error) -> Self {
        GovernanceError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GovernanceError::ThresholdNotMet { actual: 33, required: 51 };
        assert!(err.to_string().contains("33"));
        assert!(err.to_string().contains("51"));
    }

    #[test]
    fn test_dispositions_separate_past_forbidden_and_future() {
        assert_eq!(
            GovernanceError::AlreadyActed("claimed".into()).disposition(),
            Disposition::Abandon
        );
        assert_eq!(
            GovernanceError::Unauthorized("host only".into()).disposition(),
            Disposition::Abandon
        );
        assert_eq!(
            GovernanceError::TooEarly { ready_at: 10, now: 5 }.disposition(),
            Disposition::RetryLater
        );
        assert_eq!(
            GovernanceError::HashMismatch {
                what: "proposal",
                expected: Hash::ZERO,
                actual: Hash::compute(b"x"),
            }
            .disposition(),
            Disposition::RetryNow
        );
    }
}
