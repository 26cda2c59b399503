//! Error types for scope operations.

use thiserror::Error;

use super::watch::WatchId;

/// Boxed error carried out of user callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for fallible scope operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Errors surfaced to callers of [`Scope`](super::Scope).
#[derive(Debug, Error)]
pub enum ScopeError {
    /// The scope was still dirty after the configured number of sweeps.
    ///
    /// The scope stays usable; a later `settle` starts a fresh budget.
    #[error("{ttl} digest iterations reached without settling")]
    ConvergenceExceeded {
        /// Sweep budget that was exhausted.
        ttl: usize,
    },

    /// A reaction returned an error. The sweep stopped at that watch.
    #[error("reaction of {watch} failed: {source}")]
    Reaction {
        /// Watch whose reaction failed.
        watch: WatchId,
        /// The error returned by the reaction, unchanged.
        #[source]
        source: BoxError,
    },

    /// `settle` was called from inside a probe or reaction of the same scope.
    #[error("settle already in progress")]
    AlreadySettling,

    /// Scope options failed validation.
    #[error("invalid scope options: {reason}")]
    InvalidOptions {
        /// What went wrong.
        reason: String,
    },

    /// The field bag could not be exported as JSON.
    #[error("failed to snapshot scope fields: {0}")]
    Snapshot(#[from] serde_json::Error),
}

impl ScopeError {
    /// Whether this is the sweep-budget failure.
    pub fn is_convergence_exceeded(&self) -> bool {
        matches!(self, ScopeError::ConvergenceExceeded { .. })
    }
}

/// A probe failed while being evaluated.
///
/// Never returned from `settle`: the digest loop logs it and treats the
/// watch as unchanged for that sweep.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The probe returned an error.
    #[error("probe failed: {0}")]
    Failed(#[source] BoxError),

    /// The probe panicked.
    #[error("probe panicked: {0}")]
    Panicked(String),
}

impl ProbeError {
    /// Build a failure from anything that converts into a boxed error,
    /// including `&str` and `String`.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        ProbeError::Failed(error.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ProbeError::Panicked(message)
    }
}
