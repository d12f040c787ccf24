//! Graph components: the named tree nodes and plugs live in.
//!
//! Every node and plug is a component in a single tree owned by the
//! [`Graph`](super::Graph) arena: nodes sit at the root, plugs are children
//! of nodes (or of other plugs). Components are addressed by stable ids;
//! parent links are plain back-references, so ownership is strictly
//! top-down and the structure can never form a reference cycle.
//!
//! Names are interned: constructing the same [`Name`] twice yields two
//! handles to one shared allocation. Names are unique among siblings; a
//! colliding name is mangled with a numeric suffix on insertion.

use std::borrow::Borrow;
use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::error::StructuralError;
use crate::graph::node::ComputeNode;
use crate::graph::plug::PlugState;
use crate::graph::{Graph, GraphEvent};

static INTERNER: OnceLock<DashMap<String, Arc<str>>> = OnceLock::new();

fn interner() -> &'static DashMap<String, Arc<str>> {
    INTERNER.get_or_init(DashMap::new)
}

/// An interned component name.
///
/// Equality and hashing are by content; interning only deduplicates the
/// backing allocation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Arc<str>);

impl Name {
    /// Interns a string as a name. No validity checking happens here; the
    /// graph validates names at the point a component is added.
    pub fn new(s: &str) -> Self {
        if let Some(existing) = interner().get(s) {
            return Self(existing.clone());
        }
        let arc: Arc<str> = Arc::from(s);
        interner().insert(s.to_owned(), arc.clone());
        Self(arc)
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A valid name is non-empty, starts with a letter or underscore, and
    /// contains only letters, digits, and underscores.
    pub fn is_valid(s: &str) -> bool {
        let mut chars = s.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name::new(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Self {
        Name::new(&s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({:?})", &*self.0)
    }
}

/// Stable identifier of a component in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub(crate) u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identifier of a component known to be a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) ComponentId);

/// Identifier of a component known to be a plug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlugId(pub(crate) ComponentId);

impl PlugId {
    #[cfg(test)]
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(ComponentId(raw))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for PlugId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<NodeId> for ComponentId {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl From<PlugId> for ComponentId {
    fn from(id: PlugId) -> Self {
        id.0
    }
}

/// What a component is, beyond its place in the tree.
pub(crate) enum Payload {
    /// A node carrying collaborator-implemented compute behavior.
    Node(Box<dyn ComputeNode>),
    /// A plug: a typed connection endpoint.
    Plug(PlugState),
}

/// One entry in the component tree.
pub(crate) struct Component {
    pub(crate) name: Name,
    pub(crate) parent: Option<ComponentId>,
    pub(crate) children: Vec<ComponentId>,
    pub(crate) payload: Payload,
}

impl Graph {
    pub(crate) fn component(&self, id: ComponentId) -> Result<&Component, StructuralError> {
        self.components
            .get(&id)
            .ok_or(StructuralError::UnknownComponent(id))
    }

    pub(crate) fn component_mut(
        &mut self,
        id: ComponentId,
    ) -> Result<&mut Component, StructuralError> {
        self.components
            .get_mut(&id)
            .ok_or(StructuralError::UnknownComponent(id))
    }

    fn next_component_id(&mut self) -> ComponentId {
        let id = ComponentId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Adds a node at the root of the graph.
    ///
    /// The name is mangled with a numeric suffix if another root component
    /// already uses it.
    pub fn add_node(
        &mut self,
        name: &str,
        behavior: Box<dyn ComputeNode>,
    ) -> Result<NodeId, StructuralError> {
        if !Name::is_valid(name) {
            return Err(StructuralError::InvalidName(name.to_owned()));
        }
        let unique = self.unique_sibling_name(None, name);
        let id = self.next_component_id();
        self.components.insert(
            id,
            Component {
                name: unique,
                parent: None,
                children: Vec::new(),
                payload: Payload::Node(behavior),
            },
        );
        self.roots.push(id);
        self.emit(&GraphEvent::ChildAdded(id));
        Ok(NodeId(id))
    }

    pub(crate) fn add_component(
        &mut self,
        parent: ComponentId,
        name: &str,
        payload: Payload,
    ) -> Result<ComponentId, StructuralError> {
        if !Name::is_valid(name) {
            return Err(StructuralError::InvalidName(name.to_owned()));
        }
        self.component(parent)?;
        let unique = self.unique_sibling_name(Some(parent), name);
        let id = self.next_component_id();
        self.components.insert(
            id,
            Component {
                name: unique,
                parent: Some(parent),
                children: Vec::new(),
                payload,
            },
        );
        self.components
            .get_mut(&parent)
            .expect("parent validated above")
            .children
            .push(id);
        self.emit(&GraphEvent::ChildAdded(id));
        Ok(id)
    }

    /// Removes a component and its entire subtree.
    ///
    /// Every plug in the subtree is disconnected first: consumers outside
    /// the subtree lose their input (each disconnection raises its own
    /// notification and dirties downstream), and upstream plugs forget the
    /// removed consumers.
    pub fn remove_component(&mut self, id: impl Into<ComponentId>) -> Result<(), StructuralError> {
        let id = id.into();
        self.component(id)?;

        let subtree = self.collect_subtree(id);
        let in_subtree: std::collections::HashSet<ComponentId> =
            subtree.iter().copied().collect();

        // Sever every edge crossing the subtree boundary before anything is
        // dropped, so no plug is left referring to a dead component.
        for &member in &subtree {
            let plug = PlugId(member);
            let Ok(state) = self.plug_state(plug) else {
                continue;
            };
            let input = state.input;
            let outputs: Vec<PlugId> = state.outputs.iter().copied().collect();

            if let Some(input) = input {
                if !in_subtree.contains(&input.0) {
                    if let Ok(upstream) = self.plug_state_mut(input) {
                        upstream.outputs.shift_remove(&plug);
                    }
                }
            }
            for consumer in outputs {
                if !in_subtree.contains(&consumer.0) {
                    self.disconnect(consumer);
                }
            }
        }

        for &member in &subtree {
            self.components.remove(&member);
        }
        self.detach_from_parent(id);
        self.emit(&GraphEvent::ChildRemoved(id));
        Ok(())
    }

    fn detach_from_parent(&mut self, id: ComponentId) {
        self.roots.retain(|&r| r != id);
        for component in self.components.values_mut() {
            component.children.retain(|&c| c != id);
        }
    }

    fn collect_subtree(&self, id: ComponentId) -> Vec<ComponentId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(component) = self.components.get(&current) {
                stack.extend(component.children.iter().copied());
            }
        }
        out
    }

    fn unique_sibling_name(&self, parent: Option<ComponentId>, name: &str) -> Name {
        let taken = |candidate: &str| {
            let siblings: &[ComponentId] = match parent {
                Some(p) => &self.components[&p].children,
                None => &self.roots,
            };
            siblings
                .iter()
                .any(|s| self.components[s].name.as_str() == candidate)
        };

        if !taken(name) {
            return Name::new(name);
        }

        // Mangle: strip any trailing digits and count up from there.
        let stem_end = name
            .rfind(|c: char| !c.is_ascii_digit())
            .map(|i| i + 1)
            .unwrap_or(0);
        let stem = &name[..stem_end];
        let start: u64 = name[stem_end..].parse().map(|n: u64| n + 1).unwrap_or(1);

        for n in start.. {
            let candidate = format!("{stem}{n}");
            if !taken(&candidate) {
                return Name::new(&candidate);
            }
        }
        unreachable!("some numeric suffix is always free")
    }

    /// The component's name.
    pub fn name(&self, id: impl Into<ComponentId>) -> Result<&Name, StructuralError> {
        Ok(&self.component(id.into())?.name)
    }

    /// The component's parent, or `None` at the root.
    pub fn parent(&self, id: impl Into<ComponentId>) -> Result<Option<ComponentId>, StructuralError> {
        Ok(self.component(id.into())?.parent)
    }

    /// The component's children, in insertion order.
    pub fn children(&self, id: impl Into<ComponentId>) -> Result<&[ComponentId], StructuralError> {
        Ok(&self.component(id.into())?.children)
    }

    /// Root-level components, in insertion order.
    pub fn roots(&self) -> &[ComponentId] {
        &self.roots
    }

    /// Looks up a direct child by name.
    pub fn child(
        &self,
        parent: impl Into<ComponentId>,
        name: &str,
    ) -> Result<Option<ComponentId>, StructuralError> {
        let parent = self.component(parent.into())?;
        Ok(parent
            .children
            .iter()
            .copied()
            .find(|c| self.components[c].name.as_str() == name))
    }

    /// Looks up a direct child known to be a plug.
    pub fn plug_child(
        &self,
        parent: impl Into<ComponentId>,
        name: &str,
    ) -> Result<Option<PlugId>, StructuralError> {
        Ok(self
            .child(parent, name)?
            .filter(|c| matches!(self.components[c].payload, Payload::Plug(_)))
            .map(PlugId))
    }

    /// The path from the root to this component, joined with `.`.
    pub fn full_name(&self, id: impl Into<ComponentId>) -> Result<String, StructuralError> {
        let mut id = id.into();
        let mut parts = vec![self.component(id)?.name.as_str().to_owned()];
        while let Some(parent) = self.component(id)?.parent {
            parts.push(self.component(parent)?.name.as_str().to_owned());
            id = parent;
        }
        parts.reverse();
        Ok(parts.join("."))
    }

    /// The path from `ancestor` (exclusive) to `descendant`, joined with `.`.
    pub fn relative_name(
        &self,
        descendant: impl Into<ComponentId>,
        ancestor: impl Into<ComponentId>,
    ) -> Result<String, StructuralError> {
        let ancestor = ancestor.into();
        let mut id = descendant.into();
        let mut parts = vec![self.component(id)?.name.as_str().to_owned()];
        while let Some(parent) = self.component(id)?.parent {
            if parent == ancestor {
                parts.reverse();
                return Ok(parts.join("."));
            }
            parts.push(self.component(parent)?.name.as_str().to_owned());
            id = parent;
        }
        Err(StructuralError::UnknownComponent(ancestor))
    }

    /// The nearest ancestor (or self) that is a node.
    pub fn owning_node(&self, id: impl Into<ComponentId>) -> Option<NodeId> {
        let mut current = Some(id.into());
        while let Some(id) = current {
            let component = self.components.get(&id)?;
            if matches!(component.payload, Payload::Node(_)) {
                return Some(NodeId(id));
            }
            current = component.parent;
        }
        None
    }

    /// The node's compute behavior.
    pub(crate) fn behavior(&self, node: NodeId) -> Result<&dyn ComputeNode, StructuralError> {
        match &self.component(node.0)?.payload {
            Payload::Node(behavior) => Ok(behavior.as_ref()),
            Payload::Plug(_) => Err(StructuralError::NotANode(node.0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::plug::PlugSpec;
    use crate::graph::Graph;
    use crate::value::ValueType;

    #[test]
    fn names_are_interned() {
        let a = Name::new("frame");
        let b = Name::new("frame");
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(&a.0, &b.0));
    }

    #[test]
    fn name_validity() {
        assert!(Name::is_valid("a"));
        assert!(Name::is_valid("_hidden"));
        assert!(Name::is_valid("plug2"));
        assert!(!Name::is_valid(""));
        assert!(!Name::is_valid("2plug"));
        assert!(!Name::is_valid("a.b"));
        assert!(!Name::is_valid("a b"));
    }

    #[test]
    fn sibling_names_are_mangled() {
        let mut graph = Graph::new();
        let a = graph.add_node("add", crate::graph::node::tests::null_node()).unwrap();
        let b = graph.add_node("add", crate::graph::node::tests::null_node()).unwrap();
        let c = graph.add_node("add", crate::graph::node::tests::null_node()).unwrap();

        assert_eq!(graph.name(a).unwrap().as_str(), "add");
        assert_eq!(graph.name(b).unwrap().as_str(), "add1");
        assert_eq!(graph.name(c).unwrap().as_str(), "add2");
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut graph = Graph::new();
        let err = graph
            .add_node("not a name", crate::graph::node::tests::null_node())
            .unwrap_err();
        assert!(matches!(err, StructuralError::InvalidName(_)));
    }

    #[test]
    fn tree_structure_and_paths() {
        let mut graph = Graph::new();
        let node = graph.add_node("add", crate::graph::node::tests::null_node()).unwrap();
        let plug = graph
            .add_plug(node, "a", PlugSpec::input(ValueType::Int))
            .unwrap();

        assert_eq!(graph.parent(plug).unwrap(), Some(node.into()));
        assert_eq!(graph.children(node).unwrap(), &[plug.into()]);
        assert_eq!(graph.full_name(plug).unwrap(), "add.a");
        assert_eq!(graph.relative_name(plug, node).unwrap(), "a");
        assert_eq!(graph.owning_node(plug), Some(node));
        assert_eq!(graph.plug_child(node, "a").unwrap(), Some(plug));
        assert_eq!(graph.plug_child(node, "b").unwrap(), None);
    }

    #[test]
    fn remove_component_removes_subtree() {
        let mut graph = Graph::new();
        let node = graph.add_node("n", crate::graph::node::tests::null_node()).unwrap();
        let plug = graph
            .add_plug(node, "a", PlugSpec::input(ValueType::Int))
            .unwrap();

        graph.remove_component(node).unwrap();
        assert!(graph.name(node).is_err());
        assert!(graph.name(plug).is_err());
        assert!(graph.roots().is_empty());
    }
}
