//! Property-based invariant tests for delivery chains.
//!
//! For any sequence of writes to a mutable property, and for derived
//! properties built on it:
//!
//! 1. Listeners see an unbroken `(old, new)` chain starting at the initial value.
//! 2. The last delivered `new` is the property's current value.
//! 3. A distinct property never delivers `old == new`.
//! 4. A mapped property's chain is the mapped source chain.

use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use ripple_core::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Set(i32),
    CompareAndSet { expected: i32, new: i32 },
    Add(i32),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (-5i32..5).prop_map(Op::Set),
        ((-5i32..5), (-5i32..5)).prop_map(|(expected, new)| Op::CompareAndSet { expected, new }),
        (-3i32..3).prop_map(Op::Add),
    ]
}

fn apply(prop: &MutProp<i32>, op: &Op) {
    match op {
        Op::Set(v) => prop.set(*v),
        Op::CompareAndSet { expected, new } => {
            prop.compare_and_set(expected, *new);
        }
        Op::Add(d) => prop.update(|v: &i32| v.saturating_add(*d)),
    }
}

fn record(prop: &Prop<i32>) -> Arc<Mutex<Vec<(i32, i32)>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let log_clone = log.clone();
    prop.on_change(move |old: &i32, new: &i32| log_clone.lock().unwrap().push((*old, *new)));
    log
}

fn assert_chain(log: &[(i32, i32)], initial: i32, current: i32) -> std::result::Result<(), TestCaseError> {
    let mut expected_old = initial;
    for &(old, new) in log {
        prop_assert_eq!(old, expected_old);
        expected_old = new;
    }
    prop_assert_eq!(expected_old, current);
    Ok(())
}

proptest! {
    #[test]
    fn mutable_chain_is_unbroken(concurrent in any::<bool>(), ops in proptest::collection::vec(op(), 0..40)) {
        let prop = property_of(0, concurrent);
        let log = record(&prop.clone().as_property());
        for op in &ops {
            apply(&prop, op);
        }
        assert_chain(&log.lock().unwrap(), 0, prop.value())?;
    }

    #[test]
    fn distinct_never_repeats(concurrent in any::<bool>(), ops in proptest::collection::vec(op(), 0..40)) {
        let prop = property_of(0, concurrent);
        let distinct = prop.distinct_eq();
        let log = record(&distinct);
        for op in &ops {
            apply(&prop, op);
        }
        let log = log.lock().unwrap();
        prop_assert!(log.iter().all(|(old, new)| old != new));
        assert_chain(&log, 0, prop.value())?;
    }

    #[test]
    fn mapped_chain_mirrors_source(concurrent in any::<bool>(), ops in proptest::collection::vec(op(), 0..40)) {
        let prop = property_of(0, concurrent);
        let source_log = record(&prop.clone().as_property());
        let tripled = prop.map(|v: &i32| v * 3);
        let mapped_log = record(&tripled);
        for op in &ops {
            apply(&prop, op);
        }
        let expected: Vec<(i32, i32)> =
            source_log.lock().unwrap().iter().map(|(o, n)| (o * 3, n * 3)).collect();
        prop_assert_eq!(&*mapped_log.lock().unwrap(), &expected);
        prop_assert_eq!(tripled.value(), prop.value() * 3);
    }
}
