//! Watches
//!
//! A watch pairs a *probe* (reads the scope, returns the value to monitor)
//! with a *reaction* (runs when that value changes). Both are capability
//! traits with blanket impls for closures, so most callers never name them:
//!
//! ```rust,ignore
//! scope.register(
//!     |scope: &mut Scope| scope.get("name"),
//!     |new: &Value, _old: &Value, scope: &mut Scope| scope.set("seen", new.clone()),
//!     Comparison::Identity,
//! );
//! ```
//!
//! Probes may return either a bare [`Value`] or a `Result<Value, E>`;
//! reactions may return either `()` or a `Result<(), E>`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::equality::{values_equal, Comparison};
use super::error::{BoxError, ProbeError};
use super::value::Value;
use super::Scope;

/// Unique identifier for a registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

impl WatchId {
    /// Generate a new unique watch ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch#{}", self.0)
    }
}

// ----------------------------------------------------------------------------
// Capabilities
// ----------------------------------------------------------------------------

/// Produces the value a watch monitors.
///
/// Probes run on every sweep, so they should be cheap. They may write
/// auxiliary scope fields; that is how watches chain.
pub trait Probe: Send + 'static {
    fn evaluate(&mut self, scope: &mut Scope) -> Result<Value, ProbeError>;
}

/// Responds to a detected change.
///
/// On a watch's first change `old_value` is the same as `new_value`.
pub trait Reaction: Send + 'static {
    fn react(
        &mut self,
        new_value: &Value,
        old_value: &Value,
        scope: &mut Scope,
    ) -> Result<(), BoxError>;
}

/// Return types accepted from probe closures.
pub trait IntoProbeResult {
    fn into_probe_result(self) -> Result<Value, ProbeError>;
}

impl IntoProbeResult for Value {
    fn into_probe_result(self) -> Result<Value, ProbeError> {
        Ok(self)
    }
}

impl<E> IntoProbeResult for Result<Value, E>
where
    E: Into<BoxError>,
{
    fn into_probe_result(self) -> Result<Value, ProbeError> {
        self.map_err(ProbeError::failed)
    }
}

/// Return types accepted from reaction closures.
pub trait IntoReactionResult {
    fn into_reaction_result(self) -> Result<(), BoxError>;
}

impl IntoReactionResult for () {
    fn into_reaction_result(self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<E> IntoReactionResult for Result<(), E>
where
    E: Into<BoxError>,
{
    fn into_reaction_result(self) -> Result<(), BoxError> {
        self.map_err(Into::into)
    }
}

impl<F, R> Probe for F
where
    F: FnMut(&mut Scope) -> R + Send + 'static,
    R: IntoProbeResult,
{
    fn evaluate(&mut self, scope: &mut Scope) -> Result<Value, ProbeError> {
        self(scope).into_probe_result()
    }
}

impl<F, R> Reaction for F
where
    F: FnMut(&Value, &Value, &mut Scope) -> R + Send + 'static,
    R: IntoReactionResult,
{
    fn react(
        &mut self,
        new_value: &Value,
        old_value: &Value,
        scope: &mut Scope,
    ) -> Result<(), BoxError> {
        self(new_value, old_value, scope).into_reaction_result()
    }
}

/// Reaction that does nothing. Used when a watch only needs its probe run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

impl Reaction for Noop {
    fn react(&mut self, _: &Value, _: &Value, _: &mut Scope) -> Result<(), BoxError> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Watcher
// ----------------------------------------------------------------------------

/// What a watch last observed.
#[derive(Debug, Clone, Default)]
pub(crate) enum Baseline {
    /// Never evaluated. Distinct from every value, `Undefined` included.
    #[default]
    Unset,
    Seen(Value),
}

/// A registered watch and its baseline.
pub(crate) struct Watcher {
    pub(crate) id: WatchId,
    pub(crate) probe: Box<dyn Probe>,
    pub(crate) reaction: Box<dyn Reaction>,
    pub(crate) comparison: Comparison,
    pub(crate) last: Baseline,
}

impl Watcher {
    pub(crate) fn new(
        probe: Box<dyn Probe>,
        reaction: Box<dyn Reaction>,
        comparison: Comparison,
    ) -> Self {
        Self {
            id: WatchId::new(),
            probe,
            reaction,
            comparison,
            last: Baseline::Unset,
        }
    }

    /// Whether `value` differs from the baseline. Always true before the
    /// first evaluation.
    pub(crate) fn has_changed(&self, value: &Value) -> bool {
        match &self.last {
            Baseline::Unset => true,
            Baseline::Seen(last) => !values_equal(value, last, self.comparison),
        }
    }

    /// Store `value` as the new baseline and return the old value to hand
    /// to the reaction. Deep watches keep a private copy.
    pub(crate) fn record(&mut self, value: &Value) -> Value {
        let stored = match self.comparison {
            Comparison::Deep => value.deep_clone(),
            Comparison::Identity => value.clone(),
        };
        match std::mem::replace(&mut self.last, Baseline::Seen(stored)) {
            Baseline::Unset => value.clone(),
            Baseline::Seen(previous) => previous,
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .field("comparison", &self.comparison)
            .field("last", &self.last)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
