use crate::network::Network;
use crate::resolvers::{FlowAssignment, FlowResolver, ResolveError};
use crate::state::NetworkState;
use crate::timestep::Timestep;
use num::Zero;

/// The default flow policy: each source's surplus is offered to its deficit
/// neighbours in proportion to their share of the total neighbouring demand.
///
/// Per edge the flow is `min(supply, demand, capacity)`; when the combined demand of
/// a source's neighbours exceeds its surplus the demand term is replaced by the
/// proportional share `surplus * demand / total_demand`. Inactive nodes contribute
/// neither supply nor demand.
pub struct ProportionalResolver;

impl FlowResolver for ProportionalResolver {
    fn name() -> &'static str {
        "proportional"
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

            let surplus = state.get_node_surplus(&node.index())?;
            if surplus.is_zero() {
                continue;
            }

            // Demand is read from the snapshot for every outgoing neighbour before any
            // allocation, so the split is independent of edge order.
            let mut total_demand = 0.0;
            let mut demands = Vec::with_capacity(node.outgoing_edges().len());
            for edge_index in node.outgoing_edges() {
                let edge = &network.edges()[**edge_index];
                let destination = &network.nodes()[*edge.to_node_index()];

                let demand = if destination.is_active() {
                    state.get_node_deficit(&edge.to_node_index())?
                } else {
                    0.0
                };

                total_demand += demand;
                demands.push((edge_index, demand));
            }

            if total_demand.is_zero() {
                continue;
            }

            for (edge_index, demand) in demands {
                let capacity = state.get_edge_capacity(edge_index)?;

                let share = if total_demand > surplus {
                    surplus * demand / total_demand
                } else {
                    demand
                };

                flows[**edge_index] = share.min(demand).min(capacity);
            }
        }

        Ok(network
            .edges()
            .iter()
            .map(|edge| FlowAssignment::new(edge.index(), flows[*edge.index()]))
            .collect())
    }
}
