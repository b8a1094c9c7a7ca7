use crate::network::Network;
use crate::resolvers::{FlowAssignment, FlowResolver, ResolveError};
use crate::state::NetworkState;
use crate::timestep::Timestep;
use num::Zero;

/// An alternative flow policy: each source's surplus is offered to its outgoing
/// edges in registration order, each edge taking `min(remaining surplus, demand,
/// capacity)` until the surplus is spent.
///
/// Earlier-registered edges are favoured when demand exceeds surplus, which makes
/// registration order an explicit priority ranking.
pub struct GreedyResolver;

impl FlowResolver for GreedyResolver {
    fn name() -> &'static str {
        "greedy"
    }

    fn setup(_network: &Network) -> Box<Self> {
        Box::new(Self)
    }

    fn resolve(
        &mut self,
        network: &Network,
        _timestep: &Timestep,
        state: &NetworkState,
    ) -> Result<Vec<FlowAssignment>, ResolveError> {
        let mut flows = vec![0.0; network.edges().len()];

        for node in network.nodes().iter() {
            if !node.is_active() {
                continue;
            }

            let mut remaining = state.get_node_surplus(&node.index())?;
            if remaining.is_zero() {
                continue;
            }

            for edge_index in node.outgoing_edges() {
                let edge = &network.edges()[**edge_index];
                let destination = &network.nodes()[*edge.to_node_index()];
                if !destination.is_active() {
                    continue;
                }

                let demand = state.get_node_deficit(&edge.to_node_index())?;
                let capacity = state.get_edge_capacity(edge_index)?;

                let flow = remaining.min(demand).min(capacity);
                flows[**edge_index] = flow;
                remaining -= flow;

                if remaining.is_zero() {
                    break;
                }
            }
        }

        Ok(network
            .edges()
            .iter()
            .map(|edge| FlowAssignment::new(edge.index(), flows[*edge.index()]))
            .collect())
    }
}
