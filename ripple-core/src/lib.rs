//! Ripple Core
//!
//! Observable properties that propagate value changes to their listeners,
//! for single-threaded and multi-threaded consumers alike.
//! It implements:
//!
//! - A lock-free notification core with ordered, non-overlapping delivery
//! - Mutable properties with compare-and-set and upstream binding
//! - Derived properties (map, combine, select, filter, debounce, periodic
//!   refresh, two-way bind)
//! - Diff-aware properties for consumers that need more than `(old, new)`
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `notify`: Listener bookkeeping and the delivery algorithm
//! - `property`: Read and write contracts, mutable properties, builders
//! - `derived`: Properties recomputed from upstream properties
//! - `diff`: Properties delivering a diff alongside each change
//! - `executor`: Where callbacks run, and delayed tasks for debounce
//! - `context`: Thread confinement
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::prelude::*;
//!
//! let count = concurrent_property_of(0);
//! let doubled = count.map(|c| c * 2);
//!
//! doubled.on_change(|old, new| println!("doubled: {old} -> {new}"));
//!
//! count.set(5);
//! // prints: "doubled: 0 -> 10"
//! ```

pub mod context;
pub mod derived;
pub mod diff;
pub mod error;
pub mod executor;
pub mod notify;
pub mod property;

pub use error::{PropertyError, Result};
pub use executor::{executor_for_current_thread, Executor, ExecutorScope};

/// Everything needed to build and observe properties.
pub mod prelude {
    pub use crate::diff::{calculate_diff_on, ConcurrentMutableDiff, DiffProperty};
    pub use crate::executor::{EventLoop, Executor, ExecutorScope, ExecutorWorker, InPlaceWorker};
    pub use crate::notify::{ChangeListener, Listener, ListenerId};
    pub use crate::property::{
        all_values, any_value, concurrent_property_of, confined_property_of, contains_all_values,
        contains_value, filter_values, first_value, fold_values, immutable_property_of, map_all,
        map_value_list, property_of, updated_every, value_list, BoolPropertyExt, EmptinessExt,
        MutProp, MutableBoolExt, MutableProperty, MutablePropertyExt, Prop, Property,
        PropertyExt, StrPropertyExt,
    };
    pub use crate::{PropertyError, Result};
}
