//! Shortcuts for properties holding strings and collections.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use super::{Prop, PropertyExt, Value};

/// Values that can be empty.
pub trait Emptiable {
    fn is_empty_value(&self) -> bool;
}

impl Emptiable for String {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<A> Emptiable for Vec<A> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<A> Emptiable for VecDeque<A> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<A, S> Emptiable for HashSet<A, S> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V, S> Emptiable for HashMap<K, V, S> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<A> Emptiable for BTreeSet<A> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> Emptiable for BTreeMap<K, V> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<A: Emptiable> Emptiable for Option<A> {
    /// `None` counts as empty.
    fn is_empty_value(&self) -> bool {
        self.as_ref().map_or(true, Emptiable::is_empty_value)
    }
}

pub trait EmptinessExt<T: Value + Emptiable>: PropertyExt<T> {
    fn is_empty(&self) -> Prop<bool> {
        self.map(|value: &T| value.is_empty_value())
    }

    fn is_not_empty(&self) -> Prop<bool> {
        self.map(|value: &T| !value.is_empty_value())
    }
}

impl<T: Value + Emptiable, P: PropertyExt<T>> EmptinessExt<T> for P {}

/// Text views of a string property.
pub trait StrPropertyExt: PropertyExt<String> {
    /// Length in chars, not bytes.
    fn char_count(&self) -> Prop<usize> {
        self.map(|s: &String| s.chars().count())
    }

    /// Empty or whitespace only.
    fn is_blank(&self) -> Prop<bool> {
        self.map(|s: &String| s.trim().is_empty())
    }

    fn is_not_blank(&self) -> Prop<bool> {
        self.map(|s: &String| !s.trim().is_empty())
    }

    fn trimmed(&self) -> Prop<String> {
        self.map(|s: &String| s.trim().to_string())
    }
}

impl<P: PropertyExt<String>> StrPropertyExt for P {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{concurrent_property_of, immutable_property_of, MutableProperty, Property};

    #[test]
    fn emptiness_follows_the_collection() {
        let items = concurrent_property_of(Vec::<u8>::new());
        let empty = items.is_empty();
        let not_empty = items.is_not_empty();
        assert!(empty.value());
        assert!(!not_empty.value());

        items.set(vec![1]);
        assert!(!empty.value());
        assert!(not_empty.value());
    }

    #[test]
    fn missing_collection_is_empty() {
        let tags = concurrent_property_of(Some(HashSet::from(["a"])));
        let empty = tags.is_empty();
        assert!(!empty.value());
        tags.set(None);
        assert!(empty.value());
    }

    #[test]
    fn text_views() {
        let name = concurrent_property_of("  né ".to_string());
        let trimmed = name.trimmed();
        let chars = name.char_count();
        let blank = name.is_blank();

        assert_eq!(trimmed.value(), "né");
        assert_eq!(chars.value(), 5);
        assert!(!blank.value());

        name.set("   ".into());
        assert!(blank.value());
        assert!(!name.is_not_blank().value());
        assert!(immutable_property_of(String::new()).is_empty().value());
    }
}
