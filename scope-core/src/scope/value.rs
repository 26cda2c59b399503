//! Scope Values
//!
//! Everything a scope holds, and everything a probe returns, is a [`Value`].
//! The model is deliberately dynamic: a scope is a bag of named fields whose
//! shape is decided by application code, not by this crate.
//!
//! # Reference Semantics
//!
//! Scalars (`Undefined`, `Null`, `Bool`, `Number`, `String`) behave like
//! plain values. Composites (`Array`, `Object`) live behind a [`Shared`]
//! handle: cloning a composite `Value` clones the handle, not the contents.
//! Two handles to the same storage are *identical*; mutating through one is
//! visible through the other. This is what lets identity-mode watches skip
//! in-place mutation while deep-mode watches catch it.
//!
//! # Memory Layout
//!
//! - Strings are `Arc<str>` so cloning a probe result never copies text.
//! - Composites are `Arc<RwLock<_>>`; locks are read recursively so nested
//!   traversal of self-referencing structures never blocks on itself.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use smallvec::SmallVec;

use super::equality;

/// Field map used by object values and by the scope's own field bag.
pub type Map = IndexMap<String, Value>;

/// Largest integer an `f64` represents exactly (2^53).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A shared, mutable handle to composite storage.
///
/// Cloning a `Shared` produces another handle to the same storage.
pub struct Shared<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Shared<T> {
    /// Wrap `value` in fresh storage.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    /// Borrow the contents for reading.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read_recursive()
    }

    /// Borrow the contents for writing.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    /// Whether both handles point at the same storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Address of the storage, used to detect cycles during traversal.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared({:#x})", self.addr())
    }
}

/// A dynamically typed scope value.
///
/// `PartialEq` is structural (deep) equality with NaN equal to itself. Use
/// [`equality::identical`] when reference identity matters.
#[derive(Clone, Default)]
pub enum Value {
    /// No value at all, e.g. a field that was never set.
    #[default]
    Undefined,
    /// An explicit empty value.
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Array(Shared<Vec<Value>>),
    Object(Shared<Map>),
}

impl Value {
    /// Build an array value backed by fresh storage.
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        Value::Array(Shared::new(items.into_iter().collect()))
    }

    /// Build an object value backed by fresh storage.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(Shared::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// The IEEE not-a-number value.
    pub fn nan() -> Self {
        Value::Number(f64::NAN)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Number(n) if n.is_nan())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Shared<Vec<Value>>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Shared<Map>> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    /// Truthiness: `Undefined`, `Null`, `false`, `0`, NaN and `""` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    /// Short name of the variant, for log fields.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Copy this value and every composite reachable from it into fresh
    /// storage.
    ///
    /// Shared sub-structure stays shared inside the copy and cycles are
    /// reproduced, but nothing in the copy aliases the original.
    pub fn deep_clone(&self) -> Value {
        let mut copies = HashMap::new();
        deep_clone_with(self, &mut copies)
    }
}

fn deep_clone_with(value: &Value, copies: &mut HashMap<usize, Value>) -> Value {
    match value {
        Value::Array(items) => {
            if let Some(copy) = copies.get(&items.addr()) {
                return copy.clone();
            }
            let copy = Shared::new(Vec::new());
            copies.insert(items.addr(), Value::Array(copy.clone()));
            let cloned: Vec<Value> = items
                .read()
                .iter()
                .map(|item| deep_clone_with(item, copies))
                .collect();
            *copy.write() = cloned;
            Value::Array(copy)
        }
        Value::Object(fields) => {
            if let Some(copy) = copies.get(&fields.addr()) {
                return copy.clone();
            }
            let copy = Shared::new(Map::new());
            copies.insert(fields.addr(), Value::Object(copy.clone()));
            let cloned: Map = fields
                .read()
                .iter()
                .map(|(key, item)| (key.clone(), deep_clone_with(item, copies)))
                .collect();
            *copy.write() = cloned;
            Value::Object(copy)
        }
        scalar => scalar.clone(),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        equality::deep_equal(self, other)
    }
}

impl PartialEq<str> for Value {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == Some(other)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl PartialEq<f64> for Value {
    fn eq(&self, other: &f64) -> bool {
        self.as_f64() == Some(*other)
    }
}

impl PartialEq<bool> for Value {
    fn eq(&self, other: &bool) -> bool {
        self.as_bool() == Some(*other)
    }
}

// ----------------------------------------------------------------------------
// Conversions
// ----------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Number(value as f64)
                }
            }
        )*
    };
}

impl_from_number!(f32, i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(Arc::from(value))
    }
}

impl From<Arc<str>> for Value {
    fn from(value: Arc<str>) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Shared::new(items))
    }
}

impl From<Map> for Value {
    fn from(fields: Map) -> Self {
        Value::Object(Shared::new(fields))
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => Value::array(items.into_iter().map(Value::from)),
            serde_json::Value::Object(fields) => {
                Value::object(fields.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Serialization
// ----------------------------------------------------------------------------

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let seen = RefCell::new(SmallVec::new());
        Tracked { value: self, seen: &seen }.serialize(serializer)
    }
}

/// A value being serialized, plus the composites currently open above it.
struct Tracked<'a> {
    value: &'a Value,
    seen: &'a RefCell<SmallVec<[usize; 8]>>,
}

impl Tracked<'_> {
    fn enter<E: serde::ser::Error>(&self, addr: usize) -> Result<(), E> {
        let mut seen = self.seen.borrow_mut();
        if seen.contains(&addr) {
            return Err(E::custom("cannot serialize a cyclic value"));
        }
        seen.push(addr);
        Ok(())
    }

    fn leave(&self) {
        self.seen.borrow_mut().pop();
    }
}

impl Serialize for Tracked<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value {
            Value::Undefined | Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                self.enter::<S::Error>(items.addr())?;
                let items = items.read();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(&Tracked {
                        value: item,
                        seen: self.seen,
                    })?;
                }
                self.leave();
                seq.end()
            }
            Value::Object(fields) => {
                self.enter::<S::Error>(fields.addr())?;
                let fields = fields.read();
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (key, item) in fields.iter() {
                    map.serialize_entry(
                        key,
                        &Tracked {
                            value: item,
                            seen: self.seen,
                        },
                    )?;
                }
                self.leave();
                map.end()
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Formatting
// ----------------------------------------------------------------------------

fn write_number(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        f.write_str("NaN")
    } else if n.is_infinite() {
        f.write_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{n}")
    }
}

fn write_value(
    f: &mut fmt::Formatter<'_>,
    value: &Value,
    seen: &mut SmallVec<[usize; 8]>,
) -> fmt::Result {
    match value {
        Value::Undefined => f.write_str("undefined"),
        Value::Null => f.write_str("null"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Number(n) => write_number(f, *n),
        Value::String(s) => write!(f, "{s:?}"),
        Value::Array(items) => {
            if seen.contains(&items.addr()) {
                return f.write_str("[Circular]");
            }
            seen.push(items.addr());
            f.write_str("[")?;
            for (i, item) in items.read().iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write_value(f, item, seen)?;
            }
            seen.pop();
            f.write_str("]")
        }
        Value::Object(fields) => {
            if seen.contains(&fields.addr()) {
                return f.write_str("[Circular]");
            }
            seen.push(fields.addr());
            f.write_str("{")?;
            for (i, (key, item)) in fields.read().iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{key:?}:")?;
                write_value(f, item, seen)?;
            }
            seen.pop();
            f.write_str("}")
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_value(f, self, &mut SmallVec::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
