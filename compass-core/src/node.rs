use crate::edge::EdgeIndex;
use crate::state::NodeState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeIndex(usize);

impl Deref for NodeIndex {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for NodeIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Meta data common to all nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMeta {
    pub(crate) index: NodeIndex,
    name: String,
}

impl NodeMeta {
    fn new(index: &NodeIndex, name: &str) -> Self {
        Self {
            index: *index,
            name: name.to_string(),
        }
    }

    pub fn index(&self) -> &NodeIndex {
        &self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A point in the network holding inventory against a target level.
///
/// Static configuration only; the run-time inventory and target live in
/// [`NodeState`](crate::state::NodeState). A node is never destroyed during a run, but
/// may be deactivated to remove it from flow resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub meta: NodeMeta,
    initial_inventory: f64,
    target: f64,
    active: bool,
    incoming_edges: Vec<EdgeIndex>,
    outgoing_edges: Vec<EdgeIndex>,
}

impl Node {
    pub(crate) fn new(index: &NodeIndex, name: &str, initial_inventory: f64, target: f64) -> Self {
        Self {
            meta: NodeMeta::new(index, name),
            initial_inventory,
            target,
            active: true,
            incoming_edges: Vec::new(),
            outgoing_edges: Vec::new(),
        }
    }

    /// Get a node's name
    pub fn name(&self) -> &str {
        self.meta.name()
    }

    /// Get a node's index
    pub fn index(&self) -> NodeIndex {
        self.meta.index
    }

    pub fn initial_inventory(&self) -> f64 {
        self.initial_inventory
    }

    /// The configured target inventory. This is the initial value only; demand
    /// disruptions adjust the run-time target in state.
    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub(crate) fn add_incoming_edge(&mut self, edge: EdgeIndex) {
        self.incoming_edges.push(edge);
    }

    pub(crate) fn add_outgoing_edge(&mut self, edge: EdgeIndex) {
        self.outgoing_edges.push(edge);
    }

    pub fn incoming_edges(&self) -> &[EdgeIndex] {
        &self.incoming_edges
    }

    pub fn outgoing_edges(&self) -> &[EdgeIndex] {
        &self.outgoing_edges
    }

    pub fn default_state(&self) -> NodeState {
        NodeState::new(self.initial_inventory, self.target)
    }
}

#[derive(Default)]
pub struct NodeVec {
    nodes: Vec<Node>,
}

impl Deref for NodeVec {
    type Target = Vec<Node>;

    fn deref(&self) -> &Self::Target {
        &self.nodes
    }
}

impl DerefMut for NodeVec {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.nodes
    }
}

impl NodeVec {
    pub fn get(&self, index: &NodeIndex) -> Option<&Node> {
        self.nodes.get(index.0)
    }

    pub fn get_mut(&mut self, index: &NodeIndex) -> Option<&mut Node> {
        self.nodes.get_mut(index.0)
    }

    pub fn push_new(&mut self, name: &str, initial_inventory: f64, target: f64) -> NodeIndex {
        let node_index = NodeIndex(self.nodes.len());
        let node = Node::new(&node_index, name, initial_inventory, target);
        self.nodes.push(node);
        node_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_new() {
        let mut nodes = NodeVec::default();
        let idx = nodes.push_new("depot", 100.0, 50.0);
        assert_eq!(*idx.deref(), 0);

        let node = nodes.get(&idx).unwrap();
        assert_eq!(node.name(), "depot");
        assert_eq!(node.initial_inventory(), 100.0);
        assert_eq!(node.target(), 50.0);
        assert!(node.is_active());
        assert!(node.outgoing_edges().is_empty());
    }

    #[test]
    fn test_default_state() {
        let mut nodes = NodeVec::default();
        let idx = nodes.push_new("depot", 75.0, 50.0);
        let state = nodes.get(&idx).unwrap().default_state();
        assert_eq!(state.inventory(), 75.0);
        assert_eq!(state.target(), 50.0);
    }
}
