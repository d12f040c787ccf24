//! The dependency graph: components, plugs, nodes, and dirty propagation.
//!
//! A [`Graph`] owns every node and plug in one arena and exposes the whole
//! structural API: tree edits, connections, flags, static values, and the
//! notification stream collaborators subscribe to.
//!
//! # Threading
//!
//! The split between editing and evaluation is encoded in the borrow rules:
//! every structural edit takes `&mut Graph` and is therefore confined to a
//! single graph-owning thread, while evaluation takes `&Graph` and may run
//! from many threads at once against the structurally stable snapshot. The
//! caches behind evaluation are internally synchronized.

mod component;
mod dirty;
mod node;
mod plug;

pub use component::{ComponentId, Name, NodeId, PlugId};
pub use node::{Affected, CachePolicy, ComputeNode};
pub use plug::{Direction, PlugFlags, PlugSpec};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::cache::ShardedCache;
use crate::eval::HashCacheKey;
use crate::hash::ContentHash;
use crate::value::Value;

use component::Component;

/// Default budget for computed values: 1 GiB.
const DEFAULT_VALUE_CACHE_BYTES: usize = 1024 * 1024 * 1024;

/// Default budget for memoized hashes: 32 MiB.
const DEFAULT_HASH_CACHE_BYTES: usize = 32 * 1024 * 1024;

/// Notifications raised by graph edits and evaluation failures.
///
/// Listeners run synchronously on the thread that raised the event and must
/// not subscribe or unsubscribe from within a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphEvent {
    /// A component was added to the tree.
    ChildAdded(ComponentId),
    /// A component (and its subtree) was removed.
    ChildRemoved(ComponentId),
    /// A plug's input edge changed.
    InputChanged {
        /// The downstream plug whose input changed.
        plug: PlugId,
        /// The new input, `None` on disconnect.
        input: Option<PlugId>,
    },
    /// A plug's cached state stopped being trustworthy. Raised once per
    /// plug per edit.
    PlugDirtied(PlugId),
    /// Evaluation failed at or upstream of this plug.
    PlugErrored {
        /// A plug on the failing evaluation path.
        plug: PlugId,
        /// The plug at which the failure originated.
        source: PlugId,
    },
}

/// Identifier of a registered event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Box<dyn Fn(&GraphEvent) + Send + Sync>;

/// A graph of nodes and plugs, plus the caches evaluation runs against.
pub struct Graph {
    pub(crate) components: HashMap<ComponentId, Component>,
    pub(crate) roots: Vec<ComponentId>,
    pub(crate) next_id: u64,
    pub(crate) value_cache: ShardedCache<ContentHash, Value>,
    pub(crate) hash_cache: ShardedCache<HashCacheKey, ContentHash>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

impl Graph {
    /// Creates an empty graph with default cache budgets.
    pub fn new() -> Self {
        Self::with_cache_limits(DEFAULT_VALUE_CACHE_BYTES, DEFAULT_HASH_CACHE_BYTES)
    }

    /// Creates an empty graph with explicit cache budgets in bytes.
    pub fn with_cache_limits(value_bytes: usize, hash_bytes: usize) -> Self {
        Self {
            components: HashMap::new(),
            roots: Vec::new(),
            next_id: 1,
            value_cache: ShardedCache::new(value_bytes),
            hash_cache: ShardedCache::new(hash_bytes),
            listeners: RwLock::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Registers an event listener.
    pub fn subscribe(&self, listener: impl Fn(&GraphEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Box::new(listener)));
        id
    }

    /// Removes a previously registered listener.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners.write().retain(|(l, _)| *l != id);
    }

    pub(crate) fn emit(&self, event: &GraphEvent) {
        for (_, listener) in self.listeners.read().iter() {
            listener(event);
        }
    }

    /// The value cache's memory budget in bytes.
    pub fn cache_memory_limit(&self) -> usize {
        self.value_cache.memory_limit()
    }

    /// Reconfigures the value cache's memory budget, evicting immediately.
    pub fn set_cache_memory_limit(&self, bytes: usize) {
        self.value_cache.set_memory_limit(bytes);
    }

    /// Approximate bytes currently held by the value cache.
    pub fn cache_memory_usage(&self) -> usize {
        self.value_cache.memory_usage()
    }

    /// Drops every cached value. In-flight computations are unaffected;
    /// subsequent requests recompute.
    pub fn clear_cache(&self) {
        self.value_cache.clear();
    }

    /// The hash cache's memory budget in bytes.
    pub fn hash_cache_memory_limit(&self) -> usize {
        self.hash_cache.memory_limit()
    }

    /// Reconfigures the hash cache's memory budget.
    pub fn set_hash_cache_memory_limit(&self, bytes: usize) {
        self.hash_cache.set_memory_limit(bytes);
    }

    /// Drops every memoized hash.
    pub fn clear_hash_cache(&self) {
        self.hash_cache.clear();
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
