//! Evaluation contexts.
//!
//! A [`Context`] is an immutable mapping of named variables (current frame,
//! frames per second, anything a collaborator adds) that parameterizes a
//! computation. The same plug evaluated under two different contexts
//! legitimately produces, and caches, two different results — the context's
//! hash is part of every cache key.
//!
//! Each thread carries a "current" context. It is never mutated in place:
//! [`EditableScope`] captures the current snapshot, publishes modified
//! copies, and restores the previous snapshot when the scope exits — also
//! when a panic unwinds through it. This lets a node evaluate its input
//! under a modified context while its caller continues to see its own.

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::graph::Name;
use crate::hash::{ContentHash, ContentHasher};
use crate::value::Value;

thread_local! {
    static CURRENT: RefCell<Arc<Context>> = RefCell::new(Arc::new(Context::new()));
}

/// An immutable snapshot of named variables.
#[derive(Debug, Clone)]
pub struct Context {
    variables: IndexMap<Name, Value>,
    hash: ContentHash,
}

impl Context {
    /// Creates the default context: `frame = 1.0`,
    /// `framesPerSecond = 24.0`.
    pub fn new() -> Self {
        let mut variables = IndexMap::new();
        variables.insert(Name::new("frame"), Value::Float(1.0));
        variables.insert(Name::new("framesPerSecond"), Value::Float(24.0));
        let hash = Self::compute_hash(&variables);
        Self { variables, hash }
    }

    /// The calling thread's current context.
    pub fn current() -> Arc<Context> {
        CURRENT.with(|c| c.borrow().clone())
    }

    /// Looks up a variable.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Returns a copy with one variable replaced or added.
    pub fn with_variable(&self, name: impl Into<Name>, value: impl Into<Value>) -> Self {
        let mut variables = self.variables.clone();
        variables.insert(name.into(), value.into());
        let hash = Self::compute_hash(&variables);
        Self { variables, hash }
    }

    /// Names of every variable, in insertion order.
    pub fn variable_names(&self) -> impl Iterator<Item = &Name> {
        self.variables.keys()
    }

    /// The current frame, defaulting to 1.0 if unset or mistyped.
    pub fn frame(&self) -> f64 {
        match self.get("frame") {
            Some(Value::Float(f)) => *f,
            _ => 1.0,
        }
    }

    /// The playback rate, defaulting to 24.0 if unset or mistyped.
    pub fn frames_per_second(&self) -> f64 {
        match self.get("framesPerSecond") {
            Some(Value::Float(f)) => *f,
            _ => 24.0,
        }
    }

    /// A 128-bit hash of every variable, independent of insertion order.
    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    fn compute_hash(variables: &IndexMap<Name, Value>) -> ContentHash {
        // Sort by name so logically equal contexts hash equally regardless
        // of the order variables were added.
        let mut names: Vec<&Name> = variables.keys().collect();
        names.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));

        let mut hasher = ContentHasher::new();
        for name in names {
            hasher.append_str(name.as_str());
            variables[name].fold_into(&mut hasher);
        }
        hasher.finish()
    }

    /// Replaces the thread's current context, returning the previous one.
    fn install(context: Arc<Context>) -> Arc<Context> {
        CURRENT.with(|c| std::mem::replace(&mut *c.borrow_mut(), context))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for Context {}

/// Scope guard that overrides the thread's current context.
///
/// On construction it captures the current context as its base; each
/// [`set`](EditableScope::set) publishes a modified snapshot. Dropping the
/// scope restores the context that was current when it was created,
/// including when a panic unwinds through it.
pub struct EditableScope {
    saved: Arc<Context>,
}

impl EditableScope {
    /// Opens a scope based on the thread's current context.
    pub fn new() -> Self {
        let saved = Context::current();
        Self { saved }
    }

    /// Opens a scope based on an explicit context, installing it.
    pub fn with(base: Arc<Context>) -> Self {
        let saved = Context::install(base);
        Self { saved }
    }

    /// Overrides one variable for the remainder of the scope.
    pub fn set(&mut self, name: impl Into<Name>, value: impl Into<Value>) {
        let next = Arc::new(Context::current().with_variable(name, value));
        Context::install(next);
    }

    /// Overrides the current frame.
    pub fn set_frame(&mut self, frame: f64) {
        self.set("frame", frame);
    }
}

impl Default for EditableScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EditableScope {
    fn drop(&mut self) {
        Context::install(self.saved.clone());
    }
}
