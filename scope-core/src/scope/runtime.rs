//! Scope Runtime
//!
//! The [`Scope`] owns the field bag and the ordered list of watches, and
//! drives the digest loop that brings them to a fixed point.
//!
//! # How Settling Works
//!
//! 1. A *sweep* walks the watches in registration order. Each probe is
//!    evaluated and compared with the watch's baseline.
//!
//! 2. On a change the baseline is replaced, the watch is remembered as the
//!    last dirty one, and its reaction runs. Reactions may write fields that
//!    other probes read, so one sweep can make another watch dirty.
//!
//! 3. `settle` keeps sweeping until a sweep sees no change. When a sweep
//!    reaches the last dirty watch again and finds it clean, nothing after it
//!    can have changed either, so the sweep stops there. The exception is the
//!    sweep after a watch was appended, which always runs the full list.
//!
//! 4. Every dirty sweep spends one unit of the sweep budget. Running out while
//!    still dirty ends the call with [`ScopeError::ConvergenceExceeded`].
//!
//! # Failure Handling
//!
//! Probes are isolated: an error or a panic inside a probe is logged and the
//! watch counts as unchanged for that sweep. Reactions are not: a reaction
//! error stops the sweep and is returned from `settle`, and a reaction panic
//! unwinds through it.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use super::config::ScopeOptions;
use super::equality::Comparison;
use super::error::{ProbeError, ScopeError, ScopeResult};
use super::value::{Map, Shared, Value};
use super::watch::{
    IntoProbeResult, IntoReactionResult, Noop, Probe, Reaction, WatchId, Watcher,
};

/// A dirty-checking scope.
///
/// # Example
///
/// ```rust
/// use scope_core::{Scope, Value};
///
/// let mut scope = Scope::new();
/// scope.set("name", "Jair");
///
/// scope.watch(
///     |scope: &mut Scope| scope.get("name"),
///     |new: &Value, _old: &Value, scope: &mut Scope| {
///         if let Some(name) = new.as_str() {
///             scope.set("greeting", format!("Hello, {name}"));
///         }
///     },
/// );
///
/// scope.settle().unwrap();
/// assert_eq!(scope.get("greeting"), "Hello, Jair");
/// ```
pub struct Scope {
    /// User state.
    fields: Map,

    /// Registered watches in registration order. Append-only.
    watchers: Vec<Arc<Mutex<Watcher>>>,

    /// The watch that most recently changed during the current settle.
    last_dirty: Option<WatchId>,

    /// Set when a watch is appended; the next sweep then runs the full list
    /// without stopping at `last_dirty`.
    appended: bool,

    options: ScopeOptions,

    /// Set while `settle` runs; guards against re-entry.
    settling: bool,
}

impl Scope {
    /// Create an empty scope with default options.
    pub fn new() -> Self {
        Self {
            fields: Map::new(),
            watchers: Vec::new(),
            last_dirty: None,
            appended: false,
            options: ScopeOptions::default(),
            settling: false,
        }
    }

    /// Create an empty scope with the given options.
    pub fn with_options(options: ScopeOptions) -> ScopeResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            ..Self::new()
        })
    }

    pub fn options(&self) -> &ScopeOptions {
        &self.options
    }

    // ------------------------------------------------------------------------
    // Fields
    // ------------------------------------------------------------------------

    /// Read a field. Missing fields read as [`Value::Undefined`].
    ///
    /// Composite values come back as handles sharing the field's storage.
    pub fn get(&self, name: &str) -> Value {
        self.fields.get(name).cloned().unwrap_or_default()
    }

    /// Write a field.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Remove a field, keeping the order of the others.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.shift_remove(name)
    }

    /// Iterate fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Export the field bag as a JSON object.
    pub fn snapshot(&self) -> ScopeResult<serde_json::Value> {
        let fields = Value::Object(Shared::new(self.fields.clone()));
        Ok(serde_json::to_value(&fields)?)
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Register a watch.
    ///
    /// The probe runs on every sweep; the reaction runs whenever the probe's
    /// value differs from the previous one under `comparison`. The first
    /// evaluation always counts as a change.
    pub fn register<P, PR, R, RR>(
        &mut self,
        probe: P,
        reaction: R,
        comparison: Comparison,
    ) -> WatchId
    where
        P: FnMut(&mut Scope) -> PR + Send + 'static,
        PR: IntoProbeResult,
        R: FnMut(&Value, &Value, &mut Scope) -> RR + Send + 'static,
        RR: IntoReactionResult,
    {
        self.register_with(probe, reaction, comparison)
    }

    /// Register a watch from any [`Probe`] and [`Reaction`] implementation.
    pub fn register_with<P, R>(
        &mut self,
        probe: P,
        reaction: R,
        comparison: Comparison,
    ) -> WatchId
    where
        P: Probe,
        R: Reaction,
    {
        let watcher = Watcher::new(Box::new(probe), Box::new(reaction), comparison);
        let id = watcher.id;

        self.watchers.push(Arc::new(Mutex::new(watcher)));

        // The new watch has never been evaluated, so a sweep that ends at the
        // last dirty watch could skip it.
        self.last_dirty = None;
        self.appended = true;

        trace!(watch = %id, ?comparison, "watch registered");
        id
    }

    /// Register an identity-compared watch.
    pub fn watch<P, PR, R, RR>(&mut self, probe: P, reaction: R) -> WatchId
    where
        P: FnMut(&mut Scope) -> PR + Send + 'static,
        PR: IntoProbeResult,
        R: FnMut(&Value, &Value, &mut Scope) -> RR + Send + 'static,
        RR: IntoReactionResult,
    {
        self.register_with(probe, reaction, Comparison::Identity)
    }

    /// Register a deep-compared watch.
    pub fn watch_deep<P, PR, R, RR>(&mut self, probe: P, reaction: R) -> WatchId
    where
        P: FnMut(&mut Scope) -> PR + Send + 'static,
        PR: IntoProbeResult,
        R: FnMut(&Value, &Value, &mut Scope) -> RR + Send + 'static,
        RR: IntoReactionResult,
    {
        self.register_with(probe, reaction, Comparison::Deep)
    }

    /// Register a watch without a reaction. The probe still runs every sweep.
    pub fn observe<P, PR>(&mut self, probe: P) -> WatchId
    where
        P: FnMut(&mut Scope) -> PR + Send + 'static,
        PR: IntoProbeResult,
    {
        self.register_with(probe, Noop, Comparison::Identity)
    }

    pub fn watch_count(&self) -> usize {
        self.watchers.len()
    }

    // ------------------------------------------------------------------------
    // Digest
    // ------------------------------------------------------------------------

    /// Whether a `settle` call is currently running on this scope.
    pub fn is_settling(&self) -> bool {
        self.settling
    }

    /// Run `f` against the scope and return its result.
    pub fn eval<T>(&mut self, f: impl FnOnce(&mut Scope) -> T) -> T {
        f(self)
    }

    /// Run `f` against the scope, then settle.
    pub fn apply<T>(&mut self, f: impl FnOnce(&mut Scope) -> T) -> ScopeResult<T> {
        if self.settling {
            return Err(ScopeError::AlreadySettling);
        }
        let result = f(self);
        self.settle()?;
        Ok(result)
    }

    /// Sweep the watches until none of them changes.
    ///
    /// # Errors
    ///
    /// - [`ScopeError::ConvergenceExceeded`] if the scope is still dirty after
    ///   `max_sweeps` sweeps.
    /// - [`ScopeError::Reaction`] if a reaction fails.
    /// - [`ScopeError::AlreadySettling`] if called from a probe or reaction.
    pub fn settle(&mut self) -> ScopeResult<()> {
        if self.settling {
            return Err(ScopeError::AlreadySettling);
        }

        self.settling = true;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run_sweeps()));
        self.settling = false;

        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    fn run_sweeps(&mut self) -> ScopeResult<()> {
        let ttl = self.options.max_sweeps();
        let mut remaining = ttl;
        let mut sweeps = 0usize;

        self.last_dirty = None;

        loop {
            let dirty = self.sweep()?;
            sweeps += 1;
            trace!(sweep = sweeps, dirty, "sweep finished");

            if !dirty {
                debug!(sweeps, watches = self.watchers.len(), "scope settled");
                return Ok(());
            }

            remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                error!(ttl, last_dirty = ?self.last_dirty, "scope did not settle");
                return Err(ScopeError::ConvergenceExceeded { ttl });
            }
        }
    }

    /// One pass over the watches. Returns whether anything changed.
    fn sweep(&mut self) -> ScopeResult<bool> {
        let mut dirty = false;

        // Watches appended by reactions during this sweep wait for the next.
        let len = self.watchers.len();
        let full_sweep = std::mem::take(&mut self.appended);
        for index in 0..len {
            let slot = Arc::clone(&self.watchers[index]);
            let mut watcher = slot.lock();
            let id = watcher.id;

            let value = match evaluate_guarded(watcher.probe.as_mut(), self) {
                Ok(value) => value,
                Err(err) => {
                    warn!(watch = %id, error = %err, "probe failed, skipping");
                    continue;
                }
            };

            if watcher.has_changed(&value) {
                self.last_dirty = Some(id);
                let old_value = watcher.record(&value);
                debug!(
                    watch = %id,
                    kind = value.type_name(),
                    new = %value,
                    old = %old_value,
                    "watch changed"
                );

                watcher
                    .reaction
                    .react(&value, &old_value, self)
                    .map_err(|source| ScopeError::Reaction { watch: id, source })?;
                dirty = true;
            } else if !full_sweep && self.last_dirty == Some(id) {
                trace!(watch = %id, "back at last dirty watch, ending sweep");
                break;
            }
        }

        Ok(dirty)
    }
}

/// Evaluate a probe, turning a panic into a [`ProbeError`].
fn evaluate_guarded(probe: &mut dyn Probe, scope: &mut Scope) -> Result<Value, ProbeError> {
    panic::catch_unwind(AssertUnwindSafe(|| probe.evaluate(scope)))
        .unwrap_or_else(|payload| Err(ProbeError::from_panic(payload)))
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("fields", &self.fields)
            .field("watch_count", &self.watchers.len())
            .field("settling", &self.settling)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
