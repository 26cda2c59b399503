//! Scope Core
//!
//! This crate provides a dirty-checking change-detection engine. It
//! implements:
//!
//! - A scope holding arbitrary user fields as dynamic values
//! - Watch registration (probe + reaction + comparison mode)
//! - An equality policy covering identity, NaN and deep structure
//! - A bounded digest loop that settles chained reactions
//!
//! # Architecture
//!
//! Everything lives in the `scope` module:
//!
//! - `value`: dynamic values with reference semantics for composites
//! - `equality`: identity and deep comparison
//! - `watch`: probe/reaction capabilities and per-watch state
//! - `runtime`: the scope itself and the digest loop
//!
//! # Example
//!
//! ```rust
//! use scope_core::{Scope, Value};
//!
//! let mut scope = Scope::new();
//! scope.set("name", "Jair");
//!
//! scope.watch(
//!     |scope: &mut Scope| scope.get("nameUpper"),
//!     |new: &Value, _old: &Value, scope: &mut Scope| {
//!         if let Some(first) = new.as_str().and_then(|upper| upper.chars().next()) {
//!             scope.set("initial", format!("{first}."));
//!         }
//!     },
//! );
//! scope.watch(
//!     |scope: &mut Scope| scope.get("name"),
//!     |new: &Value, _old: &Value, scope: &mut Scope| {
//!         if let Some(name) = new.as_str() {
//!             scope.set("nameUpper", name.to_uppercase());
//!         }
//!     },
//! );
//!
//! scope.settle().unwrap();
//! assert_eq!(scope.get("initial"), "J.");
//! ```

pub mod scope;

pub use scope::{
    Comparison, ProbeError, Scope, ScopeError, ScopeOptions, ScopeResult, Value, WatchId,
};
