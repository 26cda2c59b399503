//! Equality Policy
//!
//! Decides whether a freshly probed value counts as a change.
//!
//! # Modes
//!
//! - [`Comparison::Identity`]: scalars compare by value, composites by
//!   reference. Mutating an array in place is *not* a change.
//! - [`Comparison::Deep`]: composites compare by shape and contents, object
//!   field order ignored. Mutating an array in place *is* a change, provided
//!   the stored baseline is a copy (the digest loop takes care of that).
//!
//! In both modes NaN equals NaN. Without that rule a probe that stably
//! returns NaN would be reported dirty on every sweep and never settle.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::value::Value;

/// How a watch decides whether its value changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    /// Reference identity for composites, value equality for scalars.
    #[default]
    Identity,
    /// Full structural equality.
    Deep,
}

/// Compare two values under the given mode.
pub fn values_equal(new_value: &Value, old_value: &Value, comparison: Comparison) -> bool {
    match comparison {
        Comparison::Identity => identical(new_value, old_value),
        Comparison::Deep => deep_equal(new_value, old_value),
    }
}

/// Identity comparison with NaN equal to itself.
pub fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => numbers_equal(*a, *b),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
        (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
        _ => false,
    }
}

/// Structural comparison with NaN equal to itself.
///
/// Terminates on cyclic values: a pair of composites already being compared
/// further up the stack is assumed equal.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    let mut stack = SmallVec::new();
    deep_equal_inner(a, b, &mut stack)
}

fn numbers_equal(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

type PairStack = SmallVec<[(usize, usize); 8]>;

fn deep_equal_inner(a: &Value, b: &Value, stack: &mut PairStack) -> bool {
    match (a, b) {
        (Value::Array(left), Value::Array(right)) => {
            if left.ptr_eq(right) {
                return true;
            }
            let pair = (left.addr(), right.addr());
            if stack.contains(&pair) {
                return true;
            }

            let left = left.read();
            let right = right.read();
            if left.len() != right.len() {
                return false;
            }

            stack.push(pair);
            let equal = left
                .iter()
                .zip(right.iter())
                .all(|(l, r)| deep_equal_inner(l, r, stack));
            stack.pop();
            equal
        }
        (Value::Object(left), Value::Object(right)) => {
            if left.ptr_eq(right) {
                return true;
            }
            let pair = (left.addr(), right.addr());
            if stack.contains(&pair) {
                return true;
            }

            let left = left.read();
            let right = right.read();
            if left.len() != right.len() {
                return false;
            }

            stack.push(pair);
            let equal = left.iter().all(|(key, l)| {
                right
                    .get(key)
                    .is_some_and(|r| deep_equal_inner(l, r, stack))
            });
            stack.pop();
            equal
        }
        _ => identical(a, b),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
