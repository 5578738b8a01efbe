//! Properties computed over a list of properties.
//!
//! All of these are [`map_all`] underneath: they degenerate to an immutable
//! property when no input can change, and fail with
//! [`NoExecutor`](crate::PropertyError::NoExecutor) when concurrent and
//! confined inputs are mixed on a thread without an executor.

use super::{immutable_property_of, Prop, Value};
use crate::derived::MultiMapped;
use crate::error::Result;

/// `transform(&[p.value() for p in props])`.
pub fn map_all<A, T, F>(props: Vec<Prop<A>>, transform: F) -> Result<Prop<T>>
where
    A: Value,
    T: Value,
    F: Fn(&[A]) -> T + Send + Sync + 'static,
{
    if !props.iter().any(|p| p.may_change()) {
        let values: Vec<A> = props.iter().map(|p| p.value()).collect();
        return Ok(immutable_property_of(transform(&values)));
    }
    let combined: Prop<T> = MultiMapped::build(props, transform)?;
    Ok(combined)
}

/// `transform` applied to each current value, in order.
pub fn map_value_list<A, T, F>(props: Vec<Prop<A>>, transform: F) -> Result<Prop<Vec<T>>>
where
    A: Value,
    T: Value,
    F: Fn(&A) -> T + Send + Sync + 'static,
{
    map_all(props, move |values: &[A]| values.iter().map(&transform).collect())
}

/// The current values, in order.
pub fn value_list<A: Value>(props: Vec<Prop<A>>) -> Result<Prop<Vec<A>>> {
    map_all(props, |values: &[A]| values.to_vec())
}

/// Left fold over the current values of `props`.
pub fn fold_values<A, T, F>(props: Vec<Prop<A>>, init: T, f: F) -> Result<Prop<T>>
where
    A: Value,
    T: Value,
    F: Fn(T, &A) -> T + Send + Sync + 'static,
{
    map_all(props, move |values: &[A]| values.iter().fold(init.clone(), &f))
}

/// First current value matching `predicate`, if any.
pub fn first_value<A, P>(props: Vec<Prop<A>>, predicate: P) -> Result<Prop<Option<A>>>
where
    A: Value,
    P: Fn(&A) -> bool + Send + Sync + 'static,
{
    map_all(props, move |values: &[A]| values.iter().find(|v| predicate(v)).cloned())
}

/// Current values matching `predicate`, in order.
pub fn filter_values<A, P>(props: Vec<Prop<A>>, predicate: P) -> Result<Prop<Vec<A>>>
where
    A: Value,
    P: Fn(&A) -> bool + Send + Sync + 'static,
{
    map_all(props, move |values: &[A]| {
        values.iter().filter(|v| predicate(v)).cloned().collect()
    })
}

/// Whether any current value equals `value`.
pub fn contains_value<A>(props: Vec<Prop<A>>, value: A) -> Result<Prop<bool>>
where
    A: Value + PartialEq,
{
    map_all(props, move |values: &[A]| values.contains(&value))
}

/// Whether every one of `wanted` is among the current values.
pub fn contains_all_values<A>(props: Vec<Prop<A>>, wanted: Vec<A>) -> Result<Prop<bool>>
where
    A: Value + PartialEq,
{
    map_all(props, move |values: &[A]| wanted.iter().all(|w| values.contains(w)))
}

pub fn all_values(props: Vec<Prop<bool>>) -> Result<Prop<bool>> {
    map_all(props, |values: &[bool]| values.iter().all(|b| *b))
}

pub fn any_value(props: Vec<Prop<bool>>) -> Result<Prop<bool>> {
    map_all(props, |values: &[bool]| values.iter().any(|b| *b))
}
