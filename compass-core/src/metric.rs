use crate::edge::EdgeIndex;
use crate::network::Network;
use crate::node::NodeIndex;
use crate::state::{NetworkState, NetworkStateError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricF64Error {
    #[error("state error: {0}")]
    State(#[from] NetworkStateError),
}

/// A read-only observable over the network and its state.
///
/// Metrics are how drivers and recorders read values out of a run without touching
/// the underlying state vectors directly.
#[derive(Clone, Debug, PartialEq)]
pub enum MetricF64 {
    NodeInventory(NodeIndex),
    NodeTarget(NodeIndex),
    /// The ratio of a node's inventory to its target level.
    NodePotential(NodeIndex),
    NodeSurplus(NodeIndex),
    NodeDeficit(NodeIndex),
    NodeInFlow(NodeIndex),
    NodeOutFlow(NodeIndex),
    EdgeFlow(EdgeIndex),
    /// The per-tick resolved capacity, including any outage scaling.
    EdgeCapacity(EdgeIndex),
    TotalInventory,
    /// Summed deficit across active nodes only; inactive nodes make no demand.
    TotalDeficit,
    ExternalBalance,
    Constant(f64),
}

impl MetricF64 {
    pub fn get_value(&self, network: &Network, state: &NetworkState) -> Result<f64, MetricF64Error> {
        match self {
            Self::NodeInventory(idx) => Ok(state.get_node_inventory(idx)?),
            Self::NodeTarget(idx) => Ok(state.get_node_target(idx)?),
            Self::NodePotential(idx) => Ok(state.get_node_potential(idx)?),
            Self::NodeSurplus(idx) => Ok(state.get_node_surplus(idx)?),
            Self::NodeDeficit(idx) => Ok(state.get_node_deficit(idx)?),
            Self::NodeInFlow(idx) => Ok(state.get_node_in_flow(idx)?),
            Self::NodeOutFlow(idx) => Ok(state.get_node_out_flow(idx)?),
            Self::EdgeFlow(idx) => Ok(state.get_edge_flow(idx)?),
            Self::EdgeCapacity(idx) => Ok(state.get_edge_capacity(idx)?),
            Self::TotalInventory => Ok(state.total_inventory()),
            Self::TotalDeficit => network
                .nodes()
                .iter()
                .filter(|n| n.is_active())
                .map(|n| state.get_node_deficit(&n.index()))
                .sum::<Result<f64, _>>()
                .map_err(MetricF64Error::State),
            Self::ExternalBalance => Ok(state.external_balance()),
            Self::Constant(v) => Ok(*v),
        }
    }
}
