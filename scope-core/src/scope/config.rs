//! Scope configuration.
//!
//! Options can be built in code or deserialized, e.g. from a JSON fragment
//! in the host application's config:
//!
//! ```json
//! { "max_sweeps": 20 }
//! ```

use serde::{Deserialize, Serialize};

use super::error::{ScopeError, ScopeResult};

/// Default sweep budget per `settle` call.
pub const DEFAULT_MAX_SWEEPS: usize = 10;

/// Tunables for a [`Scope`](super::Scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeOptions {
    /// Maximum sweeps per `settle` call, counting the final clean one.
    /// A scope that is still dirty after this many sweeps fails with
    /// `ConvergenceExceeded`, so at most `max_sweeps - 1` dirty sweeps can
    /// settle. Use `n + 1` to allow `n` dirty sweeps followed by a clean one.
    max_sweeps: usize,
}

impl ScopeOptions {
    /// Set the sweep budget.
    pub fn with_max_sweeps(mut self, max_sweeps: usize) -> Self {
        self.max_sweeps = max_sweeps;
        self
    }

    pub fn max_sweeps(&self) -> usize {
        self.max_sweeps
    }

    /// Reject options the digest loop cannot run with.
    pub fn validate(&self) -> ScopeResult<()> {
        if self.max_sweeps == 0 {
            return Err(ScopeError::InvalidOptions {
                reason: "max_sweeps must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate options from JSON.
    pub fn from_json(json: &str) -> ScopeResult<Self> {
        let options: Self = serde_json::from_str(json).map_err(|e| ScopeError::InvalidOptions {
            reason: e.to_string(),
        })?;
        options.validate()?;
        Ok(options)
    }
}

impl Default for ScopeOptions {
    fn default() -> Self {
        Self {
            max_sweeps: DEFAULT_MAX_SWEEPS,
        }
    }
}
