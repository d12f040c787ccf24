//! Error types for strand-core.
//!
//! The taxonomy mirrors the three ways the engine can fail:
//!
//! - [`StructuralError`]: an invalid graph edit (`set_input`, child
//!   management). The graph is left unchanged.
//! - [`ValueError`]: an invalid `set_value` (connected plug, read-only plug,
//!   or value of the wrong type).
//! - [`ComputeError`]: a failure raised from a node's `hash()` or `compute()`.
//!   It carries the plug at which the failure originated, so callers can
//!   distinguish the true source from plugs that merely forwarded it.
//!
//! None of these are fatal: a failed computation is never cached, so the next
//! request simply retries from scratch.

use std::sync::Arc;

use thiserror::Error;

use crate::graph::{ComponentId, PlugId};
use crate::value::ValueType;

/// Error when a value has the wrong type.
#[derive(Debug, Clone, Error)]
#[error("type error: expected {expected}, got {got}")]
pub struct TypeError {
    /// The type that was expected.
    pub expected: ValueType,
    /// The type that was actually provided.
    pub got: ValueType,
}

impl TypeError {
    /// Create a new type error.
    pub fn expected(expected: ValueType, got: ValueType) -> Self {
        Self { expected, got }
    }
}

/// Errors raised by invalid graph edits.
///
/// A rejected edit leaves the graph exactly as it was; validation always
/// completes before any mutation begins.
#[derive(Debug, Clone, Error)]
pub enum StructuralError {
    /// The referenced component does not exist in the graph.
    #[error("unknown component {0}")]
    UnknownComponent(ComponentId),

    /// The referenced component exists but is not a plug.
    #[error("component {0} is not a plug")]
    NotAPlug(ComponentId),

    /// The referenced component exists but is not a node.
    #[error("component {0} is not a node")]
    NotANode(ComponentId),

    /// Component names must start with a letter or underscore and contain
    /// only letters, digits and underscores.
    #[error("invalid component name {0:?}")]
    InvalidName(String),

    /// Only In-direction plugs accept inputs under the default policy.
    #[error("plug {0} has direction Out and cannot take an input")]
    NotAnInput(PlugId),

    /// The plug's `ACCEPTS_INPUTS` flag is unset.
    #[error("plug {0} does not accept inputs")]
    InputsNotAccepted(PlugId),

    /// The plug's `READ_ONLY` flag is set.
    #[error("plug {0} is read only")]
    ReadOnly(PlugId),

    /// The candidate's value type does not match the plug's.
    #[error("cannot connect {candidate} to {plug}: expected {expected}, got {got}")]
    TypeMismatch {
        /// The plug being connected.
        plug: PlugId,
        /// The candidate input.
        candidate: PlugId,
        /// The plug's value type.
        expected: ValueType,
        /// The candidate's value type.
        got: ValueType,
    },

    /// A `PlugSpec` default whose type does not match the declared type.
    #[error("default value has type {got}, plug declared {expected}")]
    DefaultType {
        /// The plug's declared value type.
        expected: ValueType,
        /// The default value's type.
        got: ValueType,
    },

    /// The connection would create a dependency cycle and the plug does not
    /// carry `ACCEPTS_DEPENDENCY_CYCLES`.
    #[error("connecting {candidate} to {plug} would create a cycle")]
    Cycle {
        /// The plug being connected.
        plug: PlugId,
        /// The candidate input.
        candidate: PlugId,
    },

    /// The owning node's `accepts_input` hook vetoed the connection.
    #[error("node rejected connection of {candidate} to {plug}")]
    NodeRejected {
        /// The plug being connected.
        plug: PlugId,
        /// The candidate input.
        candidate: PlugId,
    },
}

/// Errors raised by invalid `set_value` calls.
#[derive(Debug, Clone, Error)]
pub enum ValueError {
    /// The plug has an input connection; its value is derived, not stored.
    #[error("cannot set value on connected plug {0}")]
    Connected(PlugId),

    /// The plug's `READ_ONLY` flag is set.
    #[error("cannot set value on read-only plug {0}")]
    ReadOnly(PlugId),

    /// The value's type does not match the plug's declared type.
    #[error("cannot set value on plug {plug}: {source}")]
    Type {
        /// The plug being written.
        plug: PlugId,
        /// The underlying type mismatch.
        source: TypeError,
    },
}

/// A failure raised from a node's `hash()` or `compute()`.
///
/// Cheap to clone: under `TaskCollaboration` the one computing thread's error
/// is delivered to every concurrent waiter.
#[derive(Debug, Clone, Error)]
#[error("compute error at {source_plug}: {message}")]
pub struct ComputeError {
    /// The plug at which the failure first originated.
    pub source_plug: PlugId,
    /// Human-readable description of the failure.
    pub message: Arc<str>,
}

impl ComputeError {
    /// Create a new compute error originating at `source_plug`.
    pub fn new(source_plug: PlugId, message: impl Into<String>) -> Self {
        Self {
            source_plug,
            message: message.into().into(),
        }
    }
}

/// Top-level error type for the engine.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// An invalid graph edit.
    #[error(transparent)]
    Structural(#[from] StructuralError),

    /// An invalid `set_value`.
    #[error(transparent)]
    Value(#[from] ValueError),

    /// A failure inside a node's `hash()` or `compute()`.
    #[error(transparent)]
    Compute(#[from] ComputeError),

    /// A value's type did not match what the caller asked for.
    #[error(transparent)]
    Type(#[from] TypeError),

    /// A plug that can neither be computed nor fall back to a stored or
    /// default value. Guards against Out plugs with no owning compute node.
    #[error("plug {0} cannot be resolved: no input, no value, no compute node")]
    Unresolved(PlugId),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
