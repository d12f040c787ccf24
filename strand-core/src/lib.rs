//! Strand Core
//!
//! This crate provides a dependency-graph evaluation engine: nodes expose
//! typed plugs, plugs connect into a dataflow graph, and output values are
//! derived on demand, memoized by content hash.
//!
//! - Structural edits (`add_node`, `add_plug`, `set_input`, `set_value`)
//!   require `&mut Graph` and are therefore single-threaded by
//!   construction.
//! - Evaluation (`value`, `value_hash`) takes `&Graph` and may run from any
//!   number of threads at once, sharing the hash and value caches.
//! - A [`Context`](context::Context) of named variables scopes every
//!   evaluation; the same plug under different contexts yields independent
//!   results.
//! - Every hash and compute runs as a [`Process`](process::Process) that
//!   registered [`Monitor`](monitor::Monitor)s observe.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: the component tree, plugs, connections and dirty propagation
//! - `eval`: the hash/compute pipeline resolving plugs to values
//! - `context`: immutable variable snapshots and the thread-local current
//!   context
//! - `cache`: the sharded memory-bounded caches backing memoization
//! - `process` / `monitor`: per-thread evaluation stacks and their
//!   observers
//!
//! # Example
//!
//! ```rust,ignore
//! use strand_core::{Graph, PlugSpec, Value, ValueType};
//!
//! let mut graph = Graph::new();
//! let node = graph.add_node("add", Box::new(AddNode))?;
//! let lhs = graph.add_plug(node, "lhs", PlugSpec::input(ValueType::Int))?;
//! let out = graph.add_plug(node, "out", PlugSpec::output(ValueType::Int))?;
//!
//! graph.set_value(lhs, Value::Int(2))?;
//! assert_eq!(graph.value(out)?, Value::Int(2));
//!
//! // Cached: a second request re-uses the computed value.
//! assert_eq!(graph.value(out)?, Value::Int(2));
//! ```

pub mod cache;
pub mod context;
pub mod error;
pub mod eval;
pub mod graph;
pub mod hash;
pub mod monitor;
pub mod process;
pub mod value;

pub use context::{Context, EditableScope};
pub use error::{ComputeError, Error, Result, StructuralError, TypeError, ValueError};
pub use eval::Evaluation;
pub use graph::{
    Affected, CachePolicy, ComponentId, ComputeNode, Direction, Graph, GraphEvent, ListenerId,
    Name, NodeId, PlugFlags, PlugId, PlugSpec,
};
pub use hash::{ContentHash, ContentHasher};
pub use monitor::{
    deregister_monitor, register_monitor, Monitor, PerformanceMonitor, PlugStatistics,
};
pub use process::{Process, ProcessKind};
pub use value::{Value, ValueType};
