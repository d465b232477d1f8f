use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::{Function, Value, builtins};

/// Lexical scope: bindings plus an optional enclosing scope.
///
/// Environments are built mutably and then frozen behind an `Arc`; lookups
/// walk the parent chain.
#[derive(Clone, Default)]
pub struct Environment {
    parent: Option<Arc<Environment>>,
    bindings: BTreeMap<String, Value>,
}

impl Environment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_parent(parent: Arc<Environment>) -> Self {
        Self {
            parent: Some(parent),
            bindings: BTreeMap::new(),
        }
    }

    /// Shared scope holding the builtin library. Built once per process.
    #[must_use]
    pub fn base() -> Arc<Environment> {
        static BASE: OnceLock<Arc<Environment>> = OnceLock::new();
        Arc::clone(BASE.get_or_init(|| {
            let mut env = Environment::new();
            builtins::install(&mut env);
            Arc::new(env)
        }))
    }

    /// Fresh top-level scope whose parent is [`Environment::base`].
    #[must_use]
    pub fn global() -> Self {
        Self::with_parent(Self::base())
    }

    pub fn define(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.bindings.insert(name.into(), value.into());
    }

    /// Builder form of [`Environment::define`].
    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.define(name, value);
        self
    }

    #[must_use]
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Arc<Environment>> {
        self.parent.as_ref()
    }

    /// Binding visible from this scope, searching enclosing scopes.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        let mut scope = self;
        loop {
            if let Some(value) = scope.bindings.get(name) {
                return Some(value);
            }
            scope = scope.parent.as_deref()?;
        }
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Nearest binding of `name` that holds a function; non-function
    /// bindings in between are skipped, as in call position.
    #[must_use]
    pub fn lookup_function(&self, name: &str) -> Option<&Function> {
        let mut scope = self;
        loop {
            if let Some(Value::Function(function)) = scope.bindings.get(name) {
                return Some(function);
            }
            scope = scope.parent.as_deref()?;
        }
    }

    /// Names bound directly in this scope.
    pub fn local_names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fpl_types::Scalar;

    use super::Environment;
    use crate::Value;

    #[test]
    fn lookup_walks_enclosing_scopes() {
        let outer = Environment::global().bind("year", 1980_i64).into_shared();
        let inner = Environment::with_parent(Arc::clone(&outer)).bind("id", "a");

        assert_eq!(inner.lookup("year"), Some(Value::Scalar(Scalar::Int64(1980))));
        assert_eq!(inner.lookup("id"), Some(Value::from("a")));
        assert!(!outer.has("id"));
        assert!(inner.lookup("missing").is_none());
    }

    #[test]
    fn inner_binding_shadows_outer() {
        let outer = Environment::global().bind("x", 1_i64).into_shared();
        let inner = Environment::with_parent(outer).bind("x", 2_i64);
        assert_eq!(inner.lookup("x"), Some(Value::from(2_i64)));
    }

    #[test]
    fn function_lookup_skips_non_function_bindings() {
        let env = Environment::global().bind("mean", 3_i64);
        assert_eq!(env.lookup("mean"), Some(Value::from(3_i64)));
        let function = env.lookup_function("mean").expect("builtin mean");
        assert_eq!(function.label(), "mean");
    }

    #[test]
    fn base_environment_is_shared() {
        assert!(Arc::ptr_eq(&Environment::base(), &Environment::base()));
    }
}
