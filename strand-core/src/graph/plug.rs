//! Plugs: typed connection endpoints.
//!
//! A plug has a direction, a flags bitmask, a declared value type, at most
//! one input edge, and an ordered set of output edges. Connection edits are
//! atomic: `set_input` validates everything before touching the graph, so a
//! rejected edit leaves no partial state behind.
//!
//! Connection changes are structural only. No value is computed here;
//! downstream invalidation happens through dirty propagation after the edge
//! has changed.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{Error, StructuralError, ValueError};
use crate::graph::component::Payload;
use crate::graph::{ComponentId, Graph, GraphEvent, NodeId, PlugId};
use crate::value::{Value, ValueType};

/// Which way a plug faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Receives data; may carry one input edge.
    In,
    /// Produces data; derived through the owning node's compute behavior.
    Out,
}

/// Per-plug behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlugFlags(u32);

impl PlugFlags {
    /// No flags set.
    pub const NONE: PlugFlags = PlugFlags(0);
    /// The plug was added at runtime rather than by its node's constructor.
    /// External serializers use this to decide what to persist.
    pub const DYNAMIC: PlugFlags = PlugFlags(1 << 0);
    /// External serializers should persist this plug.
    pub const SERIALISABLE: PlugFlags = PlugFlags(1 << 1);
    /// The plug may be given an input connection.
    pub const ACCEPTS_INPUTS: PlugFlags = PlugFlags(1 << 2);
    /// Computed results for this plug may be cached.
    pub const CACHEABLE: PlugFlags = PlugFlags(1 << 3);
    /// The plug rejects `set_value` and new input connections.
    pub const READ_ONLY: PlugFlags = PlugFlags(1 << 4);
    /// Suppresses cycle rejection when connecting this plug. For
    /// collaborators that manage deliberate feedback loops themselves.
    pub const ACCEPTS_DEPENDENCY_CYCLES: PlugFlags = PlugFlags(1 << 5);

    /// The flags a plug is created with unless overridden.
    pub const DEFAULT: PlugFlags = PlugFlags(
        Self::SERIALISABLE.0 | Self::ACCEPTS_INPUTS.0 | Self::CACHEABLE.0,
    );

    /// True if every flag in `other` is set in `self`.
    pub fn contains(self, other: PlugFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `self` with the given flags set or cleared.
    pub fn with(self, other: PlugFlags, enable: bool) -> PlugFlags {
        if enable {
            PlugFlags(self.0 | other.0)
        } else {
            PlugFlags(self.0 & !other.0)
        }
    }
}

impl std::ops::BitOr for PlugFlags {
    type Output = PlugFlags;

    fn bitor(self, rhs: PlugFlags) -> PlugFlags {
        PlugFlags(self.0 | rhs.0)
    }
}

/// Mutable state of one plug.
pub(crate) struct PlugState {
    pub(crate) direction: Direction,
    pub(crate) flags: PlugFlags,
    pub(crate) value_type: ValueType,
    pub(crate) default: Value,
    pub(crate) static_value: Option<Value>,
    pub(crate) input: Option<PlugId>,
    pub(crate) outputs: IndexSet<PlugId>,
    /// Bumped every time dirty propagation touches this plug; part of the
    /// hash-cache key, so stale hash entries become unreachable.
    pub(crate) dirty_count: u64,
}

/// Description of a plug to add to the graph.
#[derive(Debug, Clone)]
pub struct PlugSpec {
    direction: Direction,
    value_type: ValueType,
    default: Option<Value>,
    flags: PlugFlags,
}

impl PlugSpec {
    /// An In-direction plug of the given type.
    pub fn input(value_type: ValueType) -> Self {
        Self {
            direction: Direction::In,
            value_type,
            default: None,
            flags: PlugFlags::DEFAULT,
        }
    }

    /// An Out-direction plug of the given type.
    pub fn output(value_type: ValueType) -> Self {
        Self {
            direction: Direction::Out,
            value_type,
            default: None,
            flags: PlugFlags::DEFAULT,
        }
    }

    /// Overrides the default value (otherwise the type's default).
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Overrides the flags.
    pub fn with_flags(mut self, flags: PlugFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl Graph {
    pub(crate) fn plug_state(&self, plug: PlugId) -> Result<&PlugState, StructuralError> {
        match &self.component(plug.0)?.payload {
            Payload::Plug(state) => Ok(state),
            Payload::Node(_) => Err(StructuralError::NotAPlug(plug.0)),
        }
    }

    pub(crate) fn plug_state_mut(&mut self, plug: PlugId) -> Result<&mut PlugState, StructuralError> {
        match &mut self.component_mut(plug.0)?.payload {
            Payload::Plug(state) => Ok(state),
            Payload::Node(_) => Err(StructuralError::NotAPlug(plug.0)),
        }
    }

    /// Adds a plug under a node or another plug.
    pub fn add_plug(
        &mut self,
        parent: impl Into<ComponentId>,
        name: &str,
        spec: PlugSpec,
    ) -> Result<PlugId, StructuralError> {
        let default = match spec.default {
            Some(value) => {
                if value.value_type() != spec.value_type {
                    return Err(StructuralError::DefaultType {
                        expected: spec.value_type,
                        got: value.value_type(),
                    });
                }
                value
            }
            None => spec.value_type.default_value(),
        };
        let state = PlugState {
            direction: spec.direction,
            flags: spec.flags,
            value_type: spec.value_type,
            default,
            static_value: None,
            input: None,
            outputs: IndexSet::new(),
            dirty_count: 0,
        };
        let id = self.add_component(parent.into(), name, Payload::Plug(state))?;
        Ok(PlugId(id))
    }

    /// The plug's direction.
    pub fn direction(&self, plug: PlugId) -> Result<Direction, StructuralError> {
        Ok(self.plug_state(plug)?.direction)
    }

    /// The plug's flags.
    pub fn flags(&self, plug: PlugId) -> Result<PlugFlags, StructuralError> {
        Ok(self.plug_state(plug)?.flags)
    }

    /// Replaces the plug's flags wholesale.
    pub fn set_flags(&mut self, plug: PlugId, flags: PlugFlags) -> Result<(), StructuralError> {
        self.plug_state_mut(plug)?.flags = flags;
        Ok(())
    }

    /// Sets or clears the given flags, leaving the rest untouched.
    pub fn set_flags_enabled(
        &mut self,
        plug: PlugId,
        flags: PlugFlags,
        enable: bool,
    ) -> Result<(), StructuralError> {
        let state = self.plug_state_mut(plug)?;
        state.flags = state.flags.with(flags, enable);
        Ok(())
    }

    /// The plug's declared value type.
    pub fn value_type(&self, plug: PlugId) -> Result<ValueType, StructuralError> {
        Ok(self.plug_state(plug)?.value_type)
    }

    /// The immediate upstream plug, if connected.
    pub fn input(&self, plug: PlugId) -> Result<Option<PlugId>, StructuralError> {
        Ok(self.plug_state(plug)?.input)
    }

    /// Downstream plugs consuming this one, in connection order.
    pub fn outputs(&self, plug: PlugId) -> Result<Vec<PlugId>, StructuralError> {
        Ok(self.plug_state(plug)?.outputs.iter().copied().collect())
    }

    /// Follows input edges transitively to the originating plug.
    ///
    /// Returns the plug itself if it has no input. Tolerates deliberate
    /// dependency cycles by stopping when a plug repeats.
    pub fn source(&self, plug: PlugId) -> Result<PlugId, StructuralError> {
        let mut seen = Vec::new();
        let mut current = plug;
        loop {
            match self.plug_state(current)?.input {
                Some(upstream) if !seen.contains(&upstream) => {
                    seen.push(current);
                    current = upstream;
                }
                _ => return Ok(current),
            }
        }
    }

    /// Whether `set_input(plug, Some(candidate))` would be accepted.
    pub fn accepts_input(&self, plug: PlugId, candidate: PlugId) -> bool {
        self.check_input(plug, candidate).is_ok()
    }

    fn check_input(&self, plug: PlugId, candidate: PlugId) -> Result<(), StructuralError> {
        let state = self.plug_state(plug)?;
        let upstream = self.plug_state(candidate)?;

        if state.direction != Direction::In {
            return Err(StructuralError::NotAnInput(plug));
        }
        if !state.flags.contains(PlugFlags::ACCEPTS_INPUTS) {
            return Err(StructuralError::InputsNotAccepted(plug));
        }
        if state.flags.contains(PlugFlags::READ_ONLY) {
            return Err(StructuralError::ReadOnly(plug));
        }
        if state.value_type != upstream.value_type {
            return Err(StructuralError::TypeMismatch {
                plug,
                candidate,
                expected: state.value_type,
                got: upstream.value_type,
            });
        }
        if !state.flags.contains(PlugFlags::ACCEPTS_DEPENDENCY_CYCLES)
            && self.depends_on(candidate, plug)
        {
            return Err(StructuralError::Cycle { plug, candidate });
        }
        if let Some(node) = self.owning_node(plug) {
            let behavior = self.behavior(node)?;
            if !behavior.accepts_input(self, plug, candidate) {
                return Err(StructuralError::NodeRejected { plug, candidate });
            }
        }
        Ok(())
    }

    /// True if `plug`'s value depends (transitively) on `target`, following
    /// both connection edges and node-internal affects() dependencies. A
    /// plug carrying `ACCEPTS_DEPENDENCY_CYCLES` breaks the chain: its own
    /// dependencies are not followed.
    fn depends_on(&self, plug: PlugId, target: PlugId) -> bool {
        let mut stack = vec![plug];
        let mut seen = std::collections::HashSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            let Ok(state) = self.plug_state(current) else {
                continue;
            };
            if state.flags.contains(PlugFlags::ACCEPTS_DEPENDENCY_CYCLES) {
                continue;
            }
            if let Some(input) = state.input {
                stack.push(input);
            }
            if state.direction == Direction::Out {
                if let Some(node) = self.owning_node(current) {
                    stack.extend(self.node_inputs_affecting(node, current));
                }
            }
        }
        false
    }

    /// In plugs of `node` whose affects() set includes `output`.
    fn node_inputs_affecting(&self, node: NodeId, output: PlugId) -> Vec<PlugId> {
        let Ok(behavior) = self.behavior(node) else {
            return Vec::new();
        };
        let mut affecting = Vec::new();
        let mut stack: Vec<ComponentId> = self
            .children(node)
            .map(|c| c.to_vec())
            .unwrap_or_default();
        while let Some(id) = stack.pop() {
            if let Ok(children) = self.children(id) {
                stack.extend(children.iter().copied());
            }
            let plug = PlugId(id);
            let Ok(state) = self.plug_state(plug) else {
                continue;
            };
            if state.direction == Direction::In
                && behavior.affects(self, plug).contains(&output)
            {
                affecting.push(plug);
            }
        }
        affecting
    }

    /// Connects or disconnects the plug's input.
    ///
    /// `Some(candidate)` validates the connection (direction, flags, types,
    /// cycles, node veto), atomically replaces any existing edge, notifies,
    /// and dirties downstream. `None` severs any existing edge.
    pub fn set_input(&mut self, plug: PlugId, candidate: Option<PlugId>) -> Result<(), Error> {
        match candidate {
            Some(candidate) => {
                self.check_input(plug, candidate)?;
                if self.plug_state(plug)?.input == Some(candidate) {
                    return Ok(());
                }
                if let Some(old) = self.plug_state(plug)?.input {
                    self.plug_state_mut(old)?.outputs.shift_remove(&plug);
                }
                self.plug_state_mut(plug)?.input = Some(candidate);
                self.plug_state_mut(candidate)?.outputs.insert(plug);
                self.emit(&GraphEvent::InputChanged {
                    plug,
                    input: Some(candidate),
                });
                self.propagate_dirty(plug);
                Ok(())
            }
            None => {
                if self.plug_state(plug)?.input.is_some() {
                    self.disconnect(plug);
                }
                Ok(())
            }
        }
    }

    /// Severs an existing input edge, notifying and dirtying downstream.
    /// Caller has checked the plug exists and is connected.
    pub(crate) fn disconnect(&mut self, plug: PlugId) {
        let Ok(state) = self.plug_state_mut(plug) else {
            return;
        };
        let Some(old) = state.input.take() else {
            return;
        };
        if let Ok(upstream) = self.plug_state_mut(old) {
            upstream.outputs.shift_remove(&plug);
        }
        self.emit(&GraphEvent::InputChanged { plug, input: None });
        self.propagate_dirty(plug);
    }

    /// Disconnects every downstream consumer of this plug.
    ///
    /// Each consumer's input becomes `None` and each disconnection raises
    /// its own notification.
    pub fn remove_outputs(&mut self, plug: PlugId) -> Result<(), StructuralError> {
        let consumers: Vec<PlugId> = self.plug_state(plug)?.outputs.iter().copied().collect();
        for consumer in consumers {
            self.disconnect(consumer);
        }
        Ok(())
    }

    /// Stores a static value on an unconnected, writable plug.
    ///
    /// Dirties the plug and everything downstream of it; the next value
    /// request recomputes instead of reusing pre-edit cache entries.
    /// Setting a value equal to the current one is a no-op.
    pub fn set_value(&mut self, plug: PlugId, value: impl Into<Value>) -> Result<(), Error> {
        let value = value.into();
        let state = self.plug_state(plug)?;
        if state.input.is_some() {
            return Err(ValueError::Connected(plug).into());
        }
        if state.flags.contains(PlugFlags::READ_ONLY) {
            return Err(ValueError::ReadOnly(plug).into());
        }
        if value.value_type() != state.value_type {
            return Err(ValueError::Type {
                plug,
                source: crate::error::TypeError::expected(state.value_type, value.value_type()),
            }
            .into());
        }
        if state.static_value.as_ref() == Some(&value) {
            return Ok(());
        }
        self.plug_state_mut(plug)?.static_value = Some(value);
        self.propagate_dirty(plug);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::tests::null_node;
    use crate::graph::Graph;

    fn rig() -> (Graph, PlugId, PlugId) {
        let mut graph = Graph::new();
        let a = graph.add_node("a", null_node()).unwrap();
        let b = graph.add_node("b", null_node()).unwrap();
        let out = graph
            .add_plug(a, "out", PlugSpec::output(ValueType::Int))
            .unwrap();
        let inp = graph
            .add_plug(b, "in", PlugSpec::input(ValueType::Int))
            .unwrap();
        (graph, out, inp)
    }

    #[test]
    fn flags_contain_and_with() {
        let flags = PlugFlags::DEFAULT;
        assert!(flags.contains(PlugFlags::ACCEPTS_INPUTS));
        assert!(!flags.contains(PlugFlags::READ_ONLY));

        let flags = flags.with(PlugFlags::READ_ONLY, true);
        assert!(flags.contains(PlugFlags::READ_ONLY));
        let flags = flags.with(PlugFlags::READ_ONLY, false);
        assert!(!flags.contains(PlugFlags::READ_ONLY));
    }

    #[test]
    fn connect_maintains_both_edge_sides() {
        let (mut graph, out, inp) = rig();
        graph.set_input(inp, Some(out)).unwrap();

        assert_eq!(graph.input(inp).unwrap(), Some(out));
        assert_eq!(graph.outputs(out).unwrap(), vec![inp]);
    }

    #[test]
    fn disconnect_clears_both_edge_sides() {
        let (mut graph, out, inp) = rig();
        graph.set_input(inp, Some(out)).unwrap();
        graph.set_input(inp, None).unwrap();

        assert_eq!(graph.input(inp).unwrap(), None);
        assert!(graph.outputs(out).unwrap().is_empty());
    }

    #[test]
    fn remove_outputs_disconnects_every_consumer() {
        let (mut graph, out, inp) = rig();
        let c = graph.add_node("c", null_node()).unwrap();
        let inp2 = graph
            .add_plug(c, "in", PlugSpec::input(ValueType::Int))
            .unwrap();
        graph.set_input(inp, Some(out)).unwrap();
        graph.set_input(inp2, Some(out)).unwrap();

        graph.remove_outputs(out).unwrap();
        assert!(graph.outputs(out).unwrap().is_empty());
        assert_eq!(graph.input(inp).unwrap(), None);
        assert_eq!(graph.input(inp2).unwrap(), None);
    }

    #[test]
    fn mistyped_default_is_rejected() {
        let mut graph = Graph::new();
        let node = graph.add_node("n", null_node()).unwrap();
        let err = graph
            .add_plug(
                node,
                "in",
                PlugSpec::input(ValueType::Int).with_default(Value::Bool(true)),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StructuralError::DefaultType {
                expected: ValueType::Int,
                got: ValueType::Bool,
            }
        ));
        assert_eq!(graph.plug_child(node, "in").unwrap(), None);
    }

    #[test]
    fn out_plugs_reject_inputs() {
        let (mut graph, out, inp) = rig();
        let err = graph.set_input(out, Some(inp)).unwrap_err();
        assert!(matches!(
            err,
            Error::Structural(StructuralError::NotAnInput(_))
        ));
    }

    #[test]
    fn read_only_plugs_reject_inputs() {
        let (mut graph, out, inp) = rig();
        graph
            .set_flags_enabled(inp, PlugFlags::READ_ONLY, true)
            .unwrap();
        let err = graph.set_input(inp, Some(out)).unwrap_err();
        assert!(matches!(
            err,
            Error::Structural(StructuralError::ReadOnly(_))
        ));
        // Rejection left the graph untouched.
        assert_eq!(graph.input(inp).unwrap(), None);
        assert!(graph.outputs(out).unwrap().is_empty());
    }

    #[test]
    fn type_mismatch_rejects_connection() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", null_node()).unwrap();
        let out = graph
            .add_plug(a, "out", PlugSpec::output(ValueType::Float))
            .unwrap();
        let inp = graph
            .add_plug(a, "in", PlugSpec::input(ValueType::Int))
            .unwrap();
        assert!(!graph.accepts_input(inp, out));
    }

    #[test]
    fn source_follows_chains() {
        let (mut graph, out, inp) = rig();
        let c = graph.add_node("c", null_node()).unwrap();
        let relay_in = graph
            .add_plug(c, "in", PlugSpec::input(ValueType::Int))
            .unwrap();

        graph.set_input(relay_in, Some(out)).unwrap();
        graph.set_input(inp, Some(relay_in)).unwrap();

        assert_eq!(graph.source(inp).unwrap(), out);
        assert_eq!(graph.source(out).unwrap(), out);
    }

    #[test]
    fn connection_cycles_are_rejected() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", null_node()).unwrap();
        let x = graph
            .add_plug(a, "x", PlugSpec::input(ValueType::Int))
            .unwrap();
        let y = graph
            .add_plug(a, "y", PlugSpec::input(ValueType::Int))
            .unwrap();
        graph.set_input(y, Some(x)).unwrap();

        let err = graph.set_input(x, Some(y)).unwrap_err();
        assert!(matches!(err, Error::Structural(StructuralError::Cycle { .. })));
        assert_eq!(graph.input(x).unwrap(), None);
    }

    #[test]
    fn cycle_flag_permits_deliberate_loops() {
        let mut graph = Graph::new();
        let a = graph.add_node("a", null_node()).unwrap();
        let x = graph
            .add_plug(a, "x", PlugSpec::input(ValueType::Int))
            .unwrap();
        let y = graph
            .add_plug(a, "y", PlugSpec::input(ValueType::Int))
            .unwrap();
        graph.set_input(y, Some(x)).unwrap();
        graph
            .set_flags_enabled(x, PlugFlags::ACCEPTS_DEPENDENCY_CYCLES, true)
            .unwrap();

        graph.set_input(x, Some(y)).unwrap();
        assert_eq!(graph.input(x).unwrap(), Some(y));
        // source() terminates on the loop instead of spinning.
        let source = graph.source(x).unwrap();
        assert!(source == x || source == y);
    }

    #[test]
    fn cycle_flag_anywhere_on_the_chain_permits_the_loop() {
        // x -> y -> z with the flag on the middle plug; closing the loop at
        // x is fine because the chain back to it is broken at y.
        let mut graph = Graph::new();
        let a = graph.add_node("a", null_node()).unwrap();
        let x = graph
            .add_plug(a, "x", PlugSpec::input(ValueType::Int))
            .unwrap();
        let y = graph
            .add_plug(a, "y", PlugSpec::input(ValueType::Int))
            .unwrap();
        let z = graph
            .add_plug(a, "z", PlugSpec::input(ValueType::Int))
            .unwrap();
        graph.set_input(y, Some(x)).unwrap();
        graph.set_input(z, Some(y)).unwrap();
        graph
            .set_flags_enabled(y, PlugFlags::ACCEPTS_DEPENDENCY_CYCLES, true)
            .unwrap();

        graph.set_input(x, Some(z)).unwrap();
        assert_eq!(graph.input(x).unwrap(), Some(z));

        // Without a flagged plug on the chain the same loop is rejected.
        graph
            .set_flags_enabled(y, PlugFlags::ACCEPTS_DEPENDENCY_CYCLES, false)
            .unwrap();
        graph.set_input(x, None).unwrap();
        let err = graph.set_input(x, Some(z)).unwrap_err();
        assert!(matches!(err, Error::Structural(StructuralError::Cycle { .. })));
    }

    #[test]
    fn set_value_round_trips() {
        let (mut graph, _, inp) = rig();
        graph.set_value(inp, 42i64).unwrap();
        assert_eq!(graph.value(inp).unwrap(), Value::Int(42));
    }

    #[test]
    fn set_value_rejects_connected_plug() {
        let (mut graph, out, inp) = rig();
        graph.set_input(inp, Some(out)).unwrap();
        let err = graph.set_value(inp, 1i64).unwrap_err();
        assert!(matches!(err, Error::Value(ValueError::Connected(_))));
    }

    #[test]
    fn set_value_rejects_read_only_plug() {
        let (mut graph, _, inp) = rig();
        graph
            .set_flags_enabled(inp, PlugFlags::READ_ONLY, true)
            .unwrap();
        let err = graph.set_value(inp, 1i64).unwrap_err();
        assert!(matches!(err, Error::Value(ValueError::ReadOnly(_))));
    }

    #[test]
    fn set_value_rejects_wrong_type() {
        let (mut graph, _, inp) = rig();
        let err = graph.set_value(inp, 1.5f64).unwrap_err();
        assert!(matches!(err, Error::Value(ValueError::Type { .. })));
    }
}
