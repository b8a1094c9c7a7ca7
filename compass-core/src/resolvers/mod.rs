use crate::edge::EdgeIndex;
use crate::network::Network;
use crate::state::{NetworkState, NetworkStateError};
use crate::timestep::Timestep;
use thiserror::Error;

mod greedy;
mod proportional;

pub use greedy::GreedyResolver;
pub use proportional::ProportionalResolver;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("state error: {0}")]
    State(#[from] NetworkStateError),
}

/// A single edge's share of a tick's flow.
///
/// Assignments are created from the pre-tick snapshot and discarded once applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowAssignment {
    pub edge_index: EdgeIndex,
    pub flow: f64,
}

impl FlowAssignment {
    pub fn new(edge_index: EdgeIndex, flow: f64) -> Self {
        Self { edge_index, flow }
    }
}

/// A policy for splitting each source node's surplus across its outgoing edges.
///
/// Implementations must read only the pre-tick snapshot (`state`), so that the result
/// is independent of the order in which edges are considered, and must never assign
/// more total outflow to a node than its surplus, more flow to an edge than its
/// resolved capacity, nor any negative flow.
pub trait FlowResolver: Send {
    fn name() -> &'static str
    where
        Self: Sized;

    fn setup(network: &Network) -> Box<Self>
    where
        Self: Sized;

    /// Compute one [`FlowAssignment`] per edge for the given tick.
    fn resolve(
        &mut self,
        network: &Network,
        timestep: &Timestep,
        state: &NetworkState,
    ) -> Result<Vec<FlowAssignment>, ResolveError>;
}
