//! Per-field fold functions and their registry.
//!
//! # Responsibility
//! - Turn a field's ordered raw values into one current value.
//! - Resolve which reducer applies to a field key.
//!
//! # Invariants
//! - Reducers are pure: the result depends only on `current` and `next`.
//! - Every fold starts from `Value::Null`.
//! - Field keys without a registered reducer fold with [`Replace`].

use crate::model::Value;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

mod array;

pub use array::ArrayReducer;

/// Field keys holding entity links, folded as ordered sets.
pub const LINK_FIELDS: [&str; 2] = ["inbound", "outbound"];

/// Combines the running value of a field with the next raw value.
pub trait Reducer: Send + Sync {
    fn reduce(&self, current: Value, next: &Value) -> Value;
}

impl<F> Reducer for F
where
    F: Fn(Value, &Value) -> Value + Send + Sync,
{
    fn reduce(&self, current: Value, next: &Value) -> Value {
        self(current, next)
    }
}

/// Last write wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Replace;

impl Reducer for Replace {
    fn reduce(&self, _current: Value, next: &Value) -> Value {
        next.clone()
    }
}

static REPLACE: Replace = Replace;

/// Left fold of `values` from `Value::Null`.
pub fn fold<'a, I>(reducer: &dyn Reducer, values: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
{
    values
        .into_iter()
        .fold(Value::Null, |current, next| reducer.reduce(current, next))
}

/// Field key to reducer lookup with a `Replace` fallback.
#[derive(Default)]
pub struct ReducerRegistry {
    reducers: BTreeMap<String, Box<dyn Reducer>>,
}

impl ReducerRegistry {
    /// Registry with no entries; every field folds with `Replace`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry used by the application: link fields fold as ordered sets.
    pub fn standard() -> Self {
        LINK_FIELDS
            .iter()
            .fold(Self::new(), |registry, key| registry.with(*key, ArrayReducer))
    }

    /// Registers `reducer` for `field_key`, replacing any earlier entry.
    pub fn with(mut self, field_key: impl Into<String>, reducer: impl Reducer + 'static) -> Self {
        self.register(field_key, reducer);
        self
    }

    pub fn register(&mut self, field_key: impl Into<String>, reducer: impl Reducer + 'static) {
        self.reducers.insert(field_key.into(), Box::new(reducer));
    }

    pub fn resolve(&self, field_key: &str) -> &dyn Reducer {
        match self.reducers.get(field_key) {
            Some(reducer) => reducer.as_ref(),
            None => &REPLACE,
        }
    }

    pub fn is_registered(&self, field_key: &str) -> bool {
        self.reducers.contains_key(field_key)
    }
}

impl Debug for ReducerRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerRegistry")
            .field("fields", &self.reducers.keys().collect::<Vec<_>>())
            .finish()
    }
}
