//! Dirty propagation.
//!
//! When a plug's value or connection changes, everything downstream of it
//! must stop trusting cached state. Propagation walks the transitive closure
//! of two edge kinds: connection edges (a plug's output set) and
//! node-internal dependencies (`affects()` on In plugs). Each reachable plug
//! is visited once per edit, gets its dirty count bumped — which retires its
//! hash-cache entries by making their keys unreachable — and raises exactly
//! one `PlugDirtied` notification. Nothing is recomputed eagerly and no
//! cache entry is deleted.

use smallvec::SmallVec;
use tracing::trace;

use crate::graph::{Direction, Graph, GraphEvent, PlugId};

impl Graph {
    /// Every plug whose value may have changed when `origin` changed,
    /// including `origin` itself. Each plug appears once.
    pub(crate) fn dirty_closure(&self, origin: PlugId) -> Vec<PlugId> {
        let mut visited = std::collections::HashSet::new();
        let mut order = Vec::new();
        let mut frontier: SmallVec<[PlugId; 8]> = SmallVec::new();
        frontier.push(origin);

        while let Some(plug) = frontier.pop() {
            if !visited.insert(plug) {
                continue;
            }
            order.push(plug);

            let Ok(state) = self.plug_state(plug) else {
                continue;
            };
            frontier.extend(state.outputs.iter().copied());

            // An In plug dirties the outputs its node derives from it.
            if state.direction == Direction::In {
                if let Some(node) = self.owning_node(plug) {
                    if let Ok(behavior) = self.behavior(node) {
                        frontier.extend(behavior.affects(self, plug));
                    }
                }
            }
        }
        order
    }

    /// Marks `origin` and everything downstream dirty, raising one
    /// `PlugDirtied` notification per affected plug.
    pub(crate) fn propagate_dirty(&mut self, origin: PlugId) {
        let affected = self.dirty_closure(origin);
        trace!(origin = %origin, count = affected.len(), "dirty propagation");

        for &plug in &affected {
            if let Ok(state) = self.plug_state_mut(plug) {
                state.dirty_count += 1;
            }
        }
        for &plug in &affected {
            self.emit(&GraphEvent::PlugDirtied(plug));
        }
    }

    /// How many times this plug has been dirtied. Part of hash-cache keys.
    pub(crate) fn dirty_count(&self, plug: PlugId) -> u64 {
        self.plug_state(plug).map(|s| s.dirty_count).unwrap_or(0)
    }
}
