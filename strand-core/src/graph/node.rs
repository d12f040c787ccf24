//! The compute contract between nodes and the engine.
//!
//! A node's output plugs are never assigned values directly. Instead the
//! node implements [`ComputeNode`]: a `hash`/`compute` pair the engine uses
//! to resolve derived values, `affects` to drive dirty propagation, and a
//! pair of cache-policy hooks. This is an open trait — collaborators add new
//! node kinds without the engine enumerating them.

use smallvec::SmallVec;

use crate::error::Result;
use crate::eval::Evaluation;
use crate::graph::{Graph, PlugId};
use crate::hash::ContentHasher;
use crate::value::Value;

/// How results for a plug interact with the global caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Bypass the cache entirely. For computations cheaper than hashing, or
    /// with side effects that make reuse unsafe.
    Uncached,
    /// Ordinary memoization. Concurrent requesters of one key may compute
    /// redundantly, so `compute()` must tolerate that.
    Standard,
    /// Concurrent requesters of one key collapse onto a single execution;
    /// every waiter receives its result.
    TaskCollaboration,
    /// Memoized, but never joins the in-flight collaboration table. Required
    /// when recursive evaluation inside a collaborative compute could
    /// otherwise deadlock waiting on itself.
    TaskIsolation,
}

/// Affected-plug list returned by [`ComputeNode::affects`]. Most nodes
/// affect a handful of outputs, so this avoids allocation in the common
/// case.
pub type Affected = SmallVec<[PlugId; 4]>;

/// Compute behavior implemented by node authors.
///
/// `hash` and `compute` must be pure functions of the graph, the plug, and
/// the current context: no hidden inputs, no structural mutation. They may
/// read other plugs through the [`Evaluation`] handle, which recursively
/// resolves them under their own process scopes.
pub trait ComputeNode: Send + Sync {
    /// Stable name of the node type. Folded into every output hash, so two
    /// node types that compute differently must report different names.
    fn type_name(&self) -> &'static str;

    /// The output plugs whose values depend on `input`.
    ///
    /// Dirty propagation calls this when `input` changes; returning too few
    /// plugs leaves stale values downstream.
    fn affects(&self, graph: &Graph, input: PlugId) -> Affected;

    /// Folds everything `compute` would depend on into `hasher`: the hash of
    /// every upstream plug read, and every context variable read. The engine
    /// has already folded the node type and the output's relative path.
    fn hash(&self, output: PlugId, eval: &Evaluation<'_>, hasher: &mut ContentHasher)
        -> Result<()>;

    /// Produces the value of `output` under the current context.
    ///
    /// Must not mutate graph structure. Under `Standard` policy it must be
    /// safe to run redundantly from concurrent threads.
    fn compute(&self, output: PlugId, eval: &Evaluation<'_>) -> Result<Value>;

    /// Cache policy for this output's hash.
    fn hash_cache_policy(&self, _output: PlugId) -> CachePolicy {
        CachePolicy::Standard
    }

    /// Cache policy for this output's computed value.
    fn compute_cache_policy(&self, _output: PlugId) -> CachePolicy {
        CachePolicy::Standard
    }

    /// Node-level veto over `plug` receiving `candidate` as its input.
    /// Runs after the engine's own checks have passed.
    fn accepts_input(&self, _graph: &Graph, _plug: PlugId, _candidate: PlugId) -> bool {
        true
    }
}
