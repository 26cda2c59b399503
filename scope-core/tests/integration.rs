//! Integration Tests for the Digest Loop
//!
//! These tests drive a scope the way application code does: register
//! watches, mutate fields, settle, observe reactions.

use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use scope_core::{Comparison, Scope, ScopeError, Value};

fn increment_counter(_: &Value, _: &Value, scope: &mut Scope) {
    let n = scope.get("counter").as_f64().unwrap_or(0.0);
    scope.set("counter", n + 1.0);
}

/// Test that a listener fires on the first settle.
#[test]
fn calls_listener_on_first_settle() {
    let mut scope = Scope::new();
    let fired = Arc::new(AtomicI32::new(0));
    let fired_clone = fired.clone();

    scope.watch(
        |_: &mut Scope| Value::from("watchExpression"),
        move |_: &Value, _: &Value, _: &mut Scope| {
            fired_clone.fetch_add(1, Ordering::SeqCst);
        },
    );
    scope.settle().unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

/// Test that the probe runs against the scope it was registered on.
#[test]
fn probe_receives_the_scope() {
    let mut scope = Scope::new();
    scope.set("marker", "this scope");

    scope.observe(|scope: &mut Scope| {
        let marker = scope.get("marker");
        scope.set("probed", marker.clone());
        marker
    });
    scope.settle().unwrap();

    assert_eq!(scope.get("probed"), "this scope");
}

/// Test change detection across settles.
#[test]
fn calls_listener_when_watched_value_changes() {
    let mut scope = Scope::new();
    scope.set("someValue", "a");
    scope.set("counter", 0);

    scope.watch(|scope: &mut Scope| scope.get("someValue"), increment_counter);

    assert_eq!(scope.get("counter"), 0.0);

    scope.settle().unwrap();
    assert_eq!(scope.get("counter"), 1.0);

    scope.settle().unwrap();
    assert_eq!(scope.get("counter"), 1.0);

    scope.set("someValue", "b");
    assert_eq!(scope.get("counter"), 1.0);

    scope.settle().unwrap();
    assert_eq!(scope.get("counter"), 2.0);

    scope.settle().unwrap();
    assert_eq!(scope.get("counter"), 2.0);
}

/// Test that an undefined first value still counts as a change.
#[test]
fn calls_listener_when_value_is_first_undefined() {
    let mut scope = Scope::new();
    scope.set("counter", 0);

    scope.watch(|scope: &mut Scope| scope.get("someValue"), increment_counter);
    scope.settle().unwrap();

    assert_eq!(scope.get("counter"), 1.0);
}

/// Test that the first reaction sees the new value as the old value.
#[test]
fn calls_listener_with_new_value_as_old_value_the_first_time() {
    let mut scope = Scope::new();
    scope.set("someValue", 123);

    scope.watch(
        |scope: &mut Scope| scope.get("someValue"),
        |new: &Value, old: &Value, scope: &mut Scope| {
            scope.set("newGiven", new.clone());
            scope.set("oldGiven", old.clone());
        },
    );
    scope.settle().unwrap();

    assert_eq!(scope.get("newGiven"), 123.0);
    assert_eq!(scope.get("oldGiven"), 123.0);

    scope.set("someValue", 124);
    scope.settle().unwrap();

    assert_eq!(scope.get("newGiven"), 124.0);
    assert_eq!(scope.get("oldGiven"), 123.0);
}

/// Test that a watch without a reaction still has its probe evaluated.
#[test]
fn may_have_watchers_that_omit_the_listener() {
    let mut scope = Scope::new();
    let evaluations = Arc::new(AtomicI32::new(0));
    let evaluations_clone = evaluations.clone();

    scope.observe(move |_: &mut Scope| {
        evaluations_clone.fetch_add(1, Ordering::SeqCst);
        Value::from("something")
    });
    scope.settle().unwrap();

    assert!(evaluations.load(Ordering::SeqCst) > 0);
}

/// Test that chained watches propagate within a single settle.
#[test]
fn triggers_chained_watchers_in_the_same_settle() {
    let mut scope = Scope::new();
    scope.set("name", "Jair");

    scope.watch(
        |scope: &mut Scope| scope.get("nameUpper"),
        |new: &Value, _: &Value, scope: &mut Scope| {
            if let Some(first) = new.as_str().and_then(|upper| upper.chars().next()) {
                scope.set("initial", format!("{first}."));
            }
        },
    );
    scope.watch(
        |scope: &mut Scope| scope.get("name"),
        |new: &Value, _: &Value, scope: &mut Scope| {
            if let Some(name) = new.as_str() {
                scope.set("nameUpper", name.to_uppercase());
            }
        },
    );

    scope.settle().unwrap();
    assert_eq!(scope.get("initial"), "J.");

    scope.set("name", "Genius");
    scope.settle().unwrap();
    assert_eq!(scope.get("initial"), "G.");

    scope.set("name", "Émile");
    scope.settle().unwrap();
    assert_eq!(scope.get("initial"), "É.");
}

/// Test that mutually dependent watches hit the sweep budget.
#[test]
fn gives_up_on_the_watches_after_ten_iterations() {
    let mut scope = Scope::new();
    scope.set("counterA", 0);
    scope.set("counterB", 0);

    scope.watch(
        |scope: &mut Scope| scope.get("counterA"),
        |_: &Value, _: &Value, scope: &mut Scope| {
            let b = scope.get("counterB").as_f64().unwrap_or(0.0);
            scope.set("counterB", b + 1.0);
        },
    );
    scope.watch(
        |scope: &mut Scope| scope.get("counterB"),
        |_: &Value, _: &Value, scope: &mut Scope| {
            let a = scope.get("counterA").as_f64().unwrap_or(0.0);
            scope.set("counterA", a + 1.0);
        },
    );

    let err = scope.settle().unwrap_err();
    assert!(err.is_convergence_exceeded());
    assert!(matches!(err, ScopeError::ConvergenceExceeded { ttl: 10 }));

    // The scope is still usable afterwards.
    assert!(!scope.is_settling());
    assert!(scope.settle().is_err());
}

/// Test that a stable NaN does not keep the scope dirty.
#[test]
fn nan_is_stable() {
    let mut scope = Scope::new();
    scope.set("counter", 0);

    scope.watch(|_: &mut Scope| Value::from(0.0 / 0.0), increment_counter);

    scope.settle().unwrap();
    assert_eq!(scope.get("counter"), 1.0);

    scope.settle().unwrap();
    assert_eq!(scope.get("counter"), 1.0);
}

/// Test that a failing probe does not block other watches.
#[test]
fn failing_probe_does_not_stop_other_watches() {
    let mut scope = Scope::new();
    scope.set("counter", 0);

    scope.watch::<_, _, _, ()>(
        |_: &mut Scope| -> Result<Value, &'static str> { Err("probe always fails") },
        |_: &Value, _: &Value, _: &mut Scope| panic!("never reached"),
    );
    scope.watch(|scope: &mut Scope| scope.get("aValue"), increment_counter);

    scope.set("aValue", "abc");
    scope.settle().unwrap();
    assert_eq!(scope.get("counter"), 1.0);

    scope.set("aValue", "def");
    scope.settle().unwrap();
    assert_eq!(scope.get("counter"), 2.0);
}

/// Test that deep watches see in-place mutation and identity watches do not.
#[test]
fn deep_watch_detects_in_place_push() {
    let mut scope = Scope::new();
    scope.set("aValue", Value::array([Value::from(1), Value::from(2), Value::from(3)]));
    scope.set("deepCounter", 0);
    scope.set("identityCounter", 0);

    scope.register(
        |scope: &mut Scope| scope.get("aValue"),
        |_: &Value, _: &Value, scope: &mut Scope| {
            let n = scope.get("deepCounter").as_f64().unwrap_or(0.0);
            scope.set("deepCounter", n + 1.0);
        },
        Comparison::Deep,
    );
    scope.register(
        |scope: &mut Scope| scope.get("aValue"),
        |_: &Value, _: &Value, scope: &mut Scope| {
            let n = scope.get("identityCounter").as_f64().unwrap_or(0.0);
            scope.set("identityCounter", n + 1.0);
        },
        Comparison::Identity,
    );

    scope.settle().unwrap();
    assert_eq!(scope.get("deepCounter"), 1.0);
    assert_eq!(scope.get("identityCounter"), 1.0);

    scope
        .get("aValue")
        .as_array()
        .unwrap()
        .write()
        .push(Value::from(4));
    scope.settle().unwrap();

    assert_eq!(scope.get("deepCounter"), 2.0);
    assert_eq!(scope.get("identityCounter"), 1.0);
}

/// Test that a deep watch's old value is the pre-mutation copy.
#[test]
fn deep_watch_reports_previous_contents() {
    let mut scope = Scope::new();
    scope.set("items", Value::array([Value::from("a")]));

    scope.watch_deep(
        |scope: &mut Scope| scope.get("items"),
        |_: &Value, old: &Value, scope: &mut Scope| {
            scope.set("previous", old.deep_clone());
        },
    );
    scope.settle().unwrap();

    scope
        .get("items")
        .as_array()
        .unwrap()
        .write()
        .push(Value::from("b"));
    scope.settle().unwrap();

    assert_eq!(scope.get("previous"), Value::array([Value::from("a")]));
}

/// Test that watches registered by a reaction run in later sweeps of the
/// same settle.
#[test]
fn watch_registered_during_settle_is_evaluated() {
    let mut scope = Scope::new();
    scope.set("aValue", "abc");

    scope.watch(
        |scope: &mut Scope| scope.get("aValue"),
        |_: &Value, _: &Value, scope: &mut Scope| {
            if !scope.contains("registered") {
                scope.set("registered", true);
                scope.watch(
                    |scope: &mut Scope| scope.get("aValue"),
                    |new: &Value, _: &Value, scope: &mut Scope| {
                        scope.set("innerSaw", new.clone());
                    },
                );
            }
        },
    );

    scope.settle().unwrap();
    assert_eq!(scope.watch_count(), 2);
    assert_eq!(scope.get("innerSaw"), "abc");
}

/// Test that a second settle with no mutation fires nothing.
#[test]
fn settle_is_idempotent() {
    let mut scope = Scope::new();
    let fired = Arc::new(AtomicI32::new(0));

    for field in ["a", "b", "c"] {
        let fired_clone = fired.clone();
        scope.set(field, field);
        scope.watch(
            move |scope: &mut Scope| scope.get(field),
            move |_: &Value, _: &Value, _: &mut Scope| {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            },
        );
    }

    scope.settle().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 3);

    scope.settle().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 3);
}

// ----------------------------------------------------------------------------
// Logging
// ----------------------------------------------------------------------------

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Test that probe failures are logged rather than returned.
#[test]
fn probe_failure_is_logged() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let mut scope = Scope::new();
        scope.observe(|_: &mut Scope| -> Result<Value, String> { Err("sensor offline".into()) });
        scope.settle().unwrap();
    });

    let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert!(output.contains("probe failed"));
    assert!(output.contains("sensor offline"));
}
