use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the single-shot operations of the crate.
///
/// Batch searches (periodic orbit location, periodic point density) never
/// return these for a single bad candidate; they record a [`CandidateFailure`]
/// in their report instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChaosError {
    /// The solver failed to converge or the system produced a non-finite or
    /// wrongly sized state.
    #[error("integration failed at t = {time}: {reason}")]
    Integration { time: f64, reason: String },

    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("invalid domain: {0}")]
    InvalidDomain(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type ChaosResult<T> = Result<T, ChaosError>;

impl ChaosError {
    pub(crate) fn integration(time: f64, reason: impl Into<String>) -> Self {
        ChaosError::Integration {
            time,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        ChaosError::InvalidParameter(reason.into())
    }
}

/// A candidate that was skipped inside a batch search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFailure {
    /// Position of the candidate in the caller's list (or in the search grid).
    pub index: usize,
    /// Target period when the same candidate is tried once per period.
    #[serde(default)]
    pub period: Option<usize>,
    pub reason: String,
}

impl CandidateFailure {
    pub fn new(index: usize, error: &ChaosError) -> Self {
        Self {
            index,
            period: None,
            reason: error.to_string(),
        }
    }

    pub fn with_period(mut self, period: usize) -> Self {
        self.period = Some(period);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ChaosError::integration(1.5, "non-finite state");
        assert_eq!(err.to_string(), "integration failed at t = 1.5: non-finite state");

        let err = ChaosError::DimensionMismatch {
            expected: 3,
            found: 2,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 3, found 2");
    }

    #[test]
    fn test_candidate_failure_keeps_reason() {
        let err = ChaosError::invalid("tolerance must be positive");
        let failure = CandidateFailure::new(7, &err);
        assert_eq!(failure.index, 7);
        assert_eq!(failure.period, None);
        assert_eq!(failure.clone().with_period(3).period, Some(3));
        assert!(failure.reason.contains("tolerance must be positive"));
    }
}
