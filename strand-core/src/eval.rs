//! Plug resolution: the hash/compute engine.
//!
//! [`Graph::value`] resolves a plug under the current [`Context`]. The
//! plug's source is found by following input connections; a source with a
//! stored value yields it directly, while a source owned by a
//! [`ComputeNode`](crate::graph::ComputeNode) goes through the two-stage
//! pipeline:
//!
//! 1. **Hash.** The engine folds the node's type name and the output's path
//!    within the node into a [`ContentHasher`], then lets the node fold in
//!    everything its compute depends on. The result is memoized in the hash
//!    cache, keyed by plug, context and the plug's dirty count.
//! 2. **Compute.** The value cache is consulted with the content hash; on a
//!    miss the node's `compute` runs and the result is stored. Identical
//!    hashes share one cache entry no matter which plug produced them.
//!
//! Both stages run inside a [`Process`](crate::process::Process) scope, so
//! monitors observe them and recursion onto an in-flight plug is reported
//! as a cycle instead of overflowing the stack. Failures are wrapped in
//! [`ComputeError`] carrying the originating plug, and every computed plug
//! the failure unwinds through raises a
//! [`GraphEvent::PlugErrored`](crate::graph::GraphEvent) naming itself and
//! that origin.

use std::sync::Arc;

use tracing::debug;

use crate::cache::CacheCost;
use crate::context::{Context, EditableScope};
use crate::error::{ComputeError, Error, Result};
use crate::graph::{CachePolicy, Direction, Graph, NodeId, PlugFlags, PlugId};
use crate::hash::{ContentHash, ContentHasher};
use crate::process::{ProcessKind, ProcessScope};
use crate::value::Value;

/// Hash-cache key. Including the dirty count means an edit invalidates by
/// making old entries unreachable; nothing is ever searched and removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HashCacheKey {
    plug: PlugId,
    context: ContentHash,
    dirty_count: u64,
}

impl CacheCost for HashCacheKey {
    fn cost(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}

impl Graph {
    /// The value of a plug under the calling thread's current context.
    pub fn value(&self, plug: PlugId) -> Result<Value> {
        Evaluation::new(self).value(plug)
    }

    /// The value of a plug under an explicit context.
    pub fn value_in(&self, plug: PlugId, context: Arc<Context>) -> Result<Value> {
        let _scope = EditableScope::with(context);
        self.value(plug)
    }

    /// The content hash of a plug under the calling thread's current
    /// context. Equal hashes guarantee equal values.
    pub fn value_hash(&self, plug: PlugId) -> Result<ContentHash> {
        Evaluation::new(self).hash(plug)
    }
}

/// How a source plug yields its value.
enum Resolution {
    /// A stored (or default) value, returned as-is.
    Static(Value),
    /// An output owned by this node; hash and compute.
    Computed(NodeId),
}

/// Handle through which node implementations read the graph during hash and
/// compute. Borrowed, cheap to copy around; one per top-level request.
pub struct Evaluation<'g> {
    graph: &'g Graph,
}

impl<'g> Evaluation<'g> {
    pub(crate) fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }

    /// The graph being evaluated. Immutable: structure cannot change while
    /// any evaluation borrows it.
    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    /// The context this evaluation runs under.
    pub fn context(&self) -> Arc<Context> {
        Context::current()
    }

    /// Resolves a plug to its value.
    pub fn value(&self, plug: PlugId) -> Result<Value> {
        let source = self.graph.source(plug)?;
        match self.resolution(source)? {
            Resolution::Static(value) => Ok(value),
            Resolution::Computed(node) => self.computed_value(source, node),
        }
    }

    /// Resolves a plug to its content hash without computing its value.
    pub fn hash(&self, plug: PlugId) -> Result<ContentHash> {
        let source = self.graph.source(plug)?;
        match self.resolution(source)? {
            Resolution::Static(value) => {
                let mut hasher = ContentHasher::new();
                value.fold_into(&mut hasher);
                Ok(hasher.finish())
            }
            Resolution::Computed(node) => self.computed_hash(source, node),
        }
    }

    fn resolution(&self, source: PlugId) -> Result<Resolution> {
        let state = self.graph.plug_state(source)?;
        if state.direction == Direction::Out {
            if let Some(node) = self.graph.owning_node(source) {
                return Ok(Resolution::Computed(node));
            }
        }
        match &state.static_value {
            Some(value) => Ok(Resolution::Static(value.clone())),
            None if state.direction == Direction::In => {
                Ok(Resolution::Static(state.default.clone()))
            }
            // A free-floating output that was never given a value has
            // nothing to resolve to; defaulting here would mask the
            // modelling error.
            None => Err(Error::Unresolved(source)),
        }
    }

    fn computed_hash(&self, source: PlugId, node: NodeId) -> Result<ContentHash> {
        let behavior = self.graph.behavior(node)?;
        let context = Context::current().hash();
        let key = HashCacheKey {
            plug: source,
            context,
            dirty_count: self.graph.dirty_count(source),
        };
        let run = || -> Result<ContentHash> {
            let _scope = ProcessScope::push(ProcessKind::Hash, source, context)?;
            let mut hasher = ContentHasher::new();
            hasher.append_str(behavior.type_name());
            hasher.append_str(&self.graph.relative_name(source, node)?);
            behavior.hash(source, self, &mut hasher)?;
            Ok(hasher.finish())
        };
        let result = match behavior.hash_cache_policy(source) {
            CachePolicy::Uncached => run(),
            policy => self.graph.hash_cache.get_or_compute(key, policy, run),
        };
        self.tag_failure(source, result)
    }

    fn computed_value(&self, source: PlugId, node: NodeId) -> Result<Value> {
        // Hash failures are attributed by computed_hash for this same
        // plug; propagate them untouched to avoid a duplicate event.
        let hash = self.computed_hash(source, node)?;
        let behavior = self.graph.behavior(node)?;
        let state = self.graph.plug_state(source)?;
        let context = Context::current().hash();
        let expected = state.value_type;
        let run = || -> Result<Value> {
            let _scope = ProcessScope::push(ProcessKind::Compute, source, context)?;
            let value = behavior.compute(source, self)?;
            if value.value_type() != expected {
                return Err(ComputeError::new(
                    source,
                    format!(
                        "compute produced {:?} for a {:?} plug",
                        value.value_type(),
                        expected
                    ),
                )
                .into());
            }
            Ok(value)
        };
        let policy = if state.flags.contains(PlugFlags::CACHEABLE) {
            behavior.compute_cache_policy(source)
        } else {
            CachePolicy::Uncached
        };
        let result = match policy {
            CachePolicy::Uncached => run(),
            policy => self.graph.value_cache.get_or_compute(hash, policy, run),
        };
        self.tag_failure(source, result)
    }

    /// Wraps a failure in a [`ComputeError`] attributed to its origin and
    /// announces it for this plug. Called once per computed plug the
    /// failure unwinds through, so listeners see the whole affected path.
    fn tag_failure<T>(&self, plug: PlugId, result: Result<T>) -> Result<T> {
        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let compute = match error {
            // Already attributed upstream; keep the origin.
            Error::Compute(compute) => compute,
            other => ComputeError::new(plug, other.to_string()),
        };
        debug!(%plug, source = %compute.source_plug, message = %compute.message, "evaluation failed");
        self.graph.emit(&crate::graph::GraphEvent::PlugErrored {
            plug,
            source: compute.source_plug,
        });
        Err(Error::Compute(compute))
    }
}
