//! Implementation of activations.
//!
//! An activation is the caller-supplied binding of variable names to values
//! or thunks used during one evaluation. Activations are read-only views
//! owned by the caller; the evaluator borrows them for the duration of a
//! single evaluation, and a shared activation may be read concurrently from
//! multiple evaluations.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::value::Value;

/// A trait implemented by variable resolvers.
pub trait Activation: Send + Sync {
    /// Resolves a variable name to a value.
    ///
    /// Returns `None` when the activation has no binding for the name.
    fn resolve(&self, name: &str) -> Option<Value>;
}

impl<A: Activation + ?Sized> Activation for &A {
    fn resolve(&self, name: &str) -> Option<Value> {
        (**self).resolve(name)
    }
}

impl Activation for HashMap<String, Value> {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

/// An activation with no bindings.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyActivation;

impl Activation for EmptyActivation {
    fn resolve(&self, _: &str) -> Option<Value> {
        None
    }
}

/// A single binding in a [`Bindings`] activation.
enum Binding {
    /// The binding holds a value.
    Value(Value),
    /// The binding holds a thunk invoked on each resolution.
    Thunk(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Thunk(_) => f.debug_tuple("Thunk").finish(),
        }
    }
}

/// A map-backed activation with value and thunk bindings.
#[derive(Debug, Default)]
pub struct Bindings {
    /// The bindings by variable name.
    values: IndexMap<String, Binding>,
}

impl Bindings {
    /// Creates a new, empty set of bindings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a variable name to a value.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), Binding::Value(value.into()));
        self
    }

    /// Binds a variable name to a thunk.
    ///
    /// The thunk is invoked on each resolution of the name; implementations
    /// that are expensive should memoize internally.
    pub fn bind_thunk(
        mut self,
        name: impl Into<String>,
        thunk: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        self.values.insert(name.into(), Binding::Thunk(Arc::new(thunk)));
        self
    }

    /// Inserts a value binding into the set.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(name.into(), Binding::Value(value.into()));
    }
}

impl Activation for Bindings {
    fn resolve(&self, name: &str) -> Option<Value> {
        match self.values.get(name)? {
            Binding::Value(value) => Some(value.clone()),
            Binding::Thunk(thunk) => Some((**thunk)()),
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn bindings_resolve_values_and_thunks() {
        let bindings = Bindings::new()
            .bind("x", 1i64)
            .bind_thunk("y", || Value::string("lazy"));

        assert_eq!(bindings.resolve("x").unwrap().as_int(), Some(1));
        assert_eq!(bindings.resolve("y").unwrap().as_str(), Some("lazy"));
        assert!(bindings.resolve("z").is_none());
    }
}
