//! Dirty-Checking Scope
//!
//! This module implements the scope: a bag of fields plus a list of watches
//! that is periodically re-evaluated until nothing changes any more.
//!
//! # Concepts
//!
//! ## Watches
//!
//! A watch is a probe/reaction pair. The probe is a function of the scope
//! returning the value of interest; the reaction runs when that value is
//! found to differ from the one seen on the previous sweep.
//!
//! ## Sweeps
//!
//! A sweep evaluates every probe once, in registration order. Reactions run
//! inside the sweep, so a reaction that writes a field read by a later probe
//! is seen in the same sweep, and one that writes a field read by an earlier
//! probe is seen on the next.
//!
//! ## Settling
//!
//! `settle` repeats sweeps until one of them finds no change, or gives up
//! after a bounded number of sweeps.
//!
//! # Implementation Notes
//!
//! There is no dependency tracking. Every probe runs on every sweep, which
//! keeps the model simple and makes any probe legal, at the cost of
//! O(watches) work per sweep.
//!
//! This approach (sometimes called "dirty checking") is the one used by
//! AngularJS scopes.

mod config;
mod equality;
mod error;
mod runtime;
mod value;
mod watch;

pub use config::{ScopeOptions, DEFAULT_MAX_SWEEPS};
pub use equality::{deep_equal, identical, values_equal, Comparison};
pub use error::{BoxError, ProbeError, ScopeError, ScopeResult};
pub use runtime::Scope;
pub use value::{Map, Shared, Value};
pub use watch::{IntoProbeResult, IntoReactionResult, Noop, Probe, Reaction, WatchId};
