use crate::node::NodeIndex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeIndex(usize);

impl Deref for EdgeIndex {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for EdgeIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The capacity forecast for an edge.
///
/// This is the time-varying upper bound on flow, before any outage scaling is
/// applied. A series holds its last value for ticks beyond its length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CapacityProfile {
    Constant(f64),
    Series(Vec<f64>),
}

impl CapacityProfile {
    /// The capacity for a given tick.
    pub fn value(&self, tick: usize) -> f64 {
        match self {
            Self::Constant(v) => *v,
            Self::Series(values) => match values.get(tick) {
                Some(v) => *v,
                None => values.last().copied().unwrap_or_default(),
            },
        }
    }

    /// The first negative value in the profile, if any.
    pub(crate) fn first_negative(&self) -> Option<f64> {
        match self {
            Self::Constant(v) => (*v < 0.0).then_some(*v),
            Self::Series(values) => values.iter().find(|v| **v < 0.0).copied(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Self::Constant(_) => false,
            Self::Series(values) => values.is_empty(),
        }
    }
}

impl From<f64> for CapacityProfile {
    fn from(v: f64) -> Self {
        Self::Constant(v)
    }
}

impl From<Vec<f64>> for CapacityProfile {
    fn from(values: Vec<f64>) -> Self {
        Self::Series(values)
    }
}

/// A directed, capacity-limited connection between two nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub(crate) index: EdgeIndex,
    from_node_index: NodeIndex,
    to_node_index: NodeIndex,
    capacity: CapacityProfile,
}

impl Edge {
    pub(crate) fn new(
        index: EdgeIndex,
        from_node_index: NodeIndex,
        to_node_index: NodeIndex,
        capacity: CapacityProfile,
    ) -> Self {
        Self {
            index,
            from_node_index,
            to_node_index,
            capacity,
        }
    }

    pub fn index(&self) -> EdgeIndex {
        self.index
    }

    pub fn from_node_index(&self) -> NodeIndex {
        self.from_node_index
    }

    pub fn to_node_index(&self) -> NodeIndex {
        self.to_node_index
    }

    pub fn capacity(&self) -> &CapacityProfile {
        &self.capacity
    }

    pub(crate) fn set_capacity(&mut self, capacity: CapacityProfile) {
        self.capacity = capacity;
    }
}

#[derive(Default)]
pub struct EdgeVec {
    edges: Vec<Edge>,
}

impl Deref for EdgeVec {
    type Target = Vec<Edge>;

    fn deref(&self) -> &Self::Target {
        &self.edges
    }
}

impl DerefMut for EdgeVec {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.edges
    }
}

impl EdgeVec {
    pub fn get(&self, index: &EdgeIndex) -> Option<&Edge> {
        self.edges.get(index.0)
    }

    pub fn get_mut(&mut self, index: &EdgeIndex) -> Option<&mut Edge> {
        self.edges.get_mut(index.0)
    }

    pub fn push(
        &mut self,
        from_node_index: NodeIndex,
        to_node_index: NodeIndex,
        capacity: CapacityProfile,
    ) -> EdgeIndex {
        let index = EdgeIndex(self.edges.len());
        let edge = Edge::new(index, from_node_index, to_node_index, capacity);
        self.edges.push(edge);
        index
    }
}
