use crate::edge::{Edge, EdgeIndex};
use crate::node::NodeIndex;
use std::num::NonZeroUsize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum NetworkStateError {
    #[error("Node index not found: {0}")]
    NodeIndexNotFound(NodeIndex),
    #[error("Edge index not found: {0}")]
    EdgeIndexNotFound(EdgeIndex),
    #[error("inventory on node {index} would become negative ({inventory} {delta:+})")]
    NegativeInventory {
        index: NodeIndex,
        inventory: f64,
        delta: f64,
    },
    #[error("target on node {index} is not positive: {target}")]
    InvalidTarget { index: NodeIndex, target: f64 },
}

/// State of a single node.
///
/// The inventory persists across ticks; the in/out flow accumulators are reset at the
/// start of each tick. The target lives here rather than on the node because demand
/// disruptions adjust it at run time.
#[derive(Clone, Copy, Debug)]
pub struct NodeState {
    inventory: f64,
    target: f64,
    in_flow: f64,
    out_flow: f64,
}

impl NodeState {
    pub(crate) fn new(initial_inventory: f64, target: f64) -> Self {
        Self {
            inventory: initial_inventory,
            target,
            in_flow: 0.0,
            out_flow: 0.0,
        }
    }

    fn reset(&mut self) {
        self.in_flow = 0.0;
        self.out_flow = 0.0;
        // Inventory and target remain unchanged
    }

    fn add_in_flow(&mut self, flow: f64) {
        self.in_flow += flow;
        self.inventory += flow;
    }

    fn add_out_flow(&mut self, flow: f64) {
        self.out_flow += flow;
        self.inventory -= flow;
    }

    pub fn inventory(&self) -> f64 {
        self.inventory
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn in_flow(&self) -> f64 {
        self.in_flow
    }

    pub fn out_flow(&self) -> f64 {
        self.out_flow
    }

    /// Inventory above target, clamped to zero.
    pub fn surplus(&self) -> f64 {
        (self.inventory - self.target).max(0.0)
    }

    /// Inventory below target, clamped to zero.
    pub fn deficit(&self) -> f64 {
        (self.target - self.inventory).max(0.0)
    }
}

/// A bounded-duration multiplicative reduction of an edge's capacity.
///
/// The countdown is advanced once per tick; when it reaches zero the edge's capacity
/// profile applies unscaled again.
#[derive(Clone, Copy, Debug)]
pub struct EdgeOutage {
    factor: f64,
    remaining: NonZeroUsize,
}

impl EdgeOutage {
    pub(crate) fn new(factor: f64, duration: NonZeroUsize) -> Self {
        Self {
            factor,
            remaining: duration,
        }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn remaining(&self) -> NonZeroUsize {
        self.remaining
    }
}

/// State of a single edge.
///
/// The capacity is the per-tick resolved value (profile value scaled by any active
/// outage); both it and the flow are rewritten every tick.
#[derive(Clone, Copy, Debug, Default)]
pub struct EdgeState {
    capacity: f64,
    flow: f64,
    outage: Option<EdgeOutage>,
}

impl EdgeState {
    fn reset(&mut self) {
        self.flow = 0.0;
    }

    fn add_flow(&mut self, flow: f64) {
        self.flow += flow;
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn flow(&self) -> f64 {
        self.flow
    }

    pub fn outage(&self) -> Option<&EdgeOutage> {
        self.outage.as_ref()
    }

    /// Advance the outage countdown. Returns true if the outage expired on this call.
    fn countdown_outage(&mut self) -> bool {
        match self.outage {
            Some(outage) => match NonZeroUsize::new(outage.remaining.get() - 1) {
                Some(remaining) => {
                    self.outage = Some(EdgeOutage {
                        factor: outage.factor,
                        remaining,
                    });
                    false
                }
                None => {
                    self.outage = None;
                    true
                }
            },
            None => false,
        }
    }
}

// State of the nodes and edges
#[derive(Clone, Debug)]
pub struct NetworkState {
    node_states: Vec<NodeState>,
    edge_states: Vec<EdgeState>,
    total_external_in: f64,
    total_external_out: f64,
}

impl NetworkState {
    pub fn new(initial_node_states: Vec<NodeState>, num_edges: usize) -> Self {
        Self {
            node_states: initial_node_states,
            edge_states: (0..num_edges).map(|_| EdgeState::default()).collect(),
            total_external_in: 0.0,
            total_external_out: 0.0,
        }
    }

    /// Reset the current flow information
    ///
    /// This method should be called between each tick to set all the flow states to
    /// zero. Non-flow state (inventory, targets, outages) is retained.
    pub fn reset(&mut self) {
        for ns in self.node_states.iter_mut() {
            ns.reset()
        }

        for es in self.edge_states.iter_mut() {
            es.reset()
        }
    }

    /// Apply a resolved flow along `edge`, decrementing the source inventory and
    /// incrementing the destination inventory.
    ///
    /// Callers are expected to have validated the flow against the pre-tick snapshot;
    /// this method performs no bounds checking of its own.
    pub fn add_flow(&mut self, edge: &Edge, flow: f64) -> Result<(), NetworkStateError> {
        let from_node_index = edge.from_node_index();
        match self.node_states.get_mut(*from_node_index) {
            Some(s) => s.add_out_flow(flow),
            None => return Err(NetworkStateError::NodeIndexNotFound(from_node_index)),
        };

        let to_node_index = edge.to_node_index();
        match self.node_states.get_mut(*to_node_index) {
            Some(s) => s.add_in_flow(flow),
            None => return Err(NetworkStateError::NodeIndexNotFound(to_node_index)),
        };

        let edge_index = edge.index();
        match self.edge_states.get_mut(*edge_index) {
            Some(s) => s.add_flow(flow),
            None => return Err(NetworkStateError::EdgeIndexNotFound(edge_index)),
        };

        Ok(())
    }

    /// Adjust a node's inventory by `delta`, rejecting any adjustment that would make
    /// it negative. No state is mutated on error.
    pub fn apply_inventory_delta(
        &mut self,
        node_index: &NodeIndex,
        delta: f64,
    ) -> Result<(), NetworkStateError> {
        let state = self
            .node_states
            .get_mut(**node_index)
            .ok_or(NetworkStateError::NodeIndexNotFound(*node_index))?;

        let result = state.inventory + delta;
        if result < 0.0 {
            return Err(NetworkStateError::NegativeInventory {
                index: *node_index,
                inventory: state.inventory,
                delta,
            });
        }
        state.inventory = result;
        Ok(())
    }

    fn node_state(&self, node_index: &NodeIndex) -> Result<&NodeState, NetworkStateError> {
        self.node_states
            .get(**node_index)
            .ok_or(NetworkStateError::NodeIndexNotFound(*node_index))
    }

    fn edge_state(&self, edge_index: &EdgeIndex) -> Result<&EdgeState, NetworkStateError> {
        self.edge_states
            .get(**edge_index)
            .ok_or(NetworkStateError::EdgeIndexNotFound(*edge_index))
    }

    pub fn get_node_inventory(&self, node_index: &NodeIndex) -> Result<f64, NetworkStateError> {
        Ok(self.node_state(node_index)?.inventory())
    }

    pub fn get_node_target(&self, node_index: &NodeIndex) -> Result<f64, NetworkStateError> {
        Ok(self.node_state(node_index)?.target())
    }

    pub fn set_node_target(
        &mut self,
        node_index: &NodeIndex,
        target: f64,
    ) -> Result<(), NetworkStateError> {
        if target <= 0.0 {
            return Err(NetworkStateError::InvalidTarget {
                index: *node_index,
                target,
            });
        }
        let state = self
            .node_states
            .get_mut(**node_index)
            .ok_or(NetworkStateError::NodeIndexNotFound(*node_index))?;
        state.target = target;
        Ok(())
    }

    /// The ratio of a node's inventory to its target level.
    pub fn get_node_potential(&self, node_index: &NodeIndex) -> Result<f64, NetworkStateError> {
        let state = self.node_state(node_index)?;
        if state.target() <= 0.0 {
            return Err(NetworkStateError::InvalidTarget {
                index: *node_index,
                target: state.target(),
            });
        }
        Ok(state.inventory() / state.target())
    }

    pub fn get_node_surplus(&self, node_index: &NodeIndex) -> Result<f64, NetworkStateError> {
        Ok(self.node_state(node_index)?.surplus())
    }

    pub fn get_node_deficit(&self, node_index: &NodeIndex) -> Result<f64, NetworkStateError> {
        Ok(self.node_state(node_index)?.deficit())
    }

    pub fn get_node_in_flow(&self, node_index: &NodeIndex) -> Result<f64, NetworkStateError> {
        Ok(self.node_state(node_index)?.in_flow())
    }

    pub fn get_node_out_flow(&self, node_index: &NodeIndex) -> Result<f64, NetworkStateError> {
        Ok(self.node_state(node_index)?.out_flow())
    }

    pub fn get_edge_flow(&self, edge_index: &EdgeIndex) -> Result<f64, NetworkStateError> {
        Ok(self.edge_state(edge_index)?.flow())
    }

    /// The per-tick resolved capacity of an edge (profile value scaled by any active
    /// outage).
    pub fn get_edge_capacity(&self, edge_index: &EdgeIndex) -> Result<f64, NetworkStateError> {
        Ok(self.edge_state(edge_index)?.capacity())
    }

    pub fn get_edge_outage(&self, edge_index: &EdgeIndex) -> Option<&EdgeOutage> {
        self.edge_states.get(**edge_index).and_then(|s| s.outage())
    }

    pub(crate) fn set_edge_capacity(
        &mut self,
        edge_index: &EdgeIndex,
        capacity: f64,
    ) -> Result<(), NetworkStateError> {
        let state = self
            .edge_states
            .get_mut(**edge_index)
            .ok_or(NetworkStateError::EdgeIndexNotFound(*edge_index))?;
        state.capacity = capacity;
        Ok(())
    }

    /// Install an outage on an edge, returning any outage it replaced.
    pub(crate) fn set_edge_outage(
        &mut self,
        edge_index: &EdgeIndex,
        outage: EdgeOutage,
    ) -> Result<Option<EdgeOutage>, NetworkStateError> {
        let state = self
            .edge_states
            .get_mut(**edge_index)
            .ok_or(NetworkStateError::EdgeIndexNotFound(*edge_index))?;
        Ok(state.outage.replace(outage))
    }

    /// Deliver `amount` to a node from outside the network, recording it in the
    /// external ledger.
    pub(crate) fn add_external_in(
        &mut self,
        node_index: &NodeIndex,
        amount: f64,
    ) -> Result<(), NetworkStateError> {
        self.apply_inventory_delta(node_index, amount)?;
        self.total_external_in += amount;
        Ok(())
    }

    /// Remove `amount` from a node to outside the network, recording it in the
    /// external ledger. Fails if the node's inventory is insufficient.
    pub(crate) fn add_external_out(
        &mut self,
        node_index: &NodeIndex,
        amount: f64,
    ) -> Result<(), NetworkStateError> {
        self.apply_inventory_delta(node_index, -amount)?;
        self.total_external_out += amount;
        Ok(())
    }

    pub fn total_inventory(&self) -> f64 {
        self.node_states.iter().map(|s| s.inventory()).sum()
    }

    pub fn total_external_in(&self) -> f64 {
        self.total_external_in
    }

    pub fn total_external_out(&self) -> f64 {
        self.total_external_out
    }

    /// Net quantity that has crossed the network boundary since the run began.
    pub fn external_balance(&self) -> f64 {
        self.total_external_in - self.total_external_out
    }

    pub fn node_states(&self) -> &[NodeState] {
        &self.node_states
    }

    pub fn edge_states(&self) -> &[EdgeState] {
        &self.edge_states
    }

    /// Complete a tick after all the flow has been added.
    ///
    /// Advances outage countdowns so that expired outages stop scaling capacity from
    /// the next tick onwards.
    pub(crate) fn complete(&mut self) {
        for (idx, es) in self.edge_states.iter_mut().enumerate() {
            if es.countdown_outage() {
                debug!("outage expired on edge {}, capacity restored", idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeVec;
    use crate::node::NodeVec;
    use float_cmp::assert_approx_eq;

    fn two_node_state() -> (NetworkState, Edge) {
        let mut nodes = NodeVec::default();
        let a = nodes.push_new("a", 100.0, 50.0);
        let b = nodes.push_new("b", 0.0, 50.0);

        let mut edges = EdgeVec::default();
        let edge_index = edges.push(a, b, 100.0.into());
        let edge = edges.get(&edge_index).unwrap().clone();

        let state = NetworkState::new(nodes.iter().map(|n| n.default_state()).collect(), 1);
        (state, edge)
    }

    #[test]
    fn test_add_flow() {
        let (mut state, edge) = two_node_state();

        state.add_flow(&edge, 50.0).unwrap();

        assert_approx_eq!(f64, state.get_node_inventory(&edge.from_node_index()).unwrap(), 50.0);
        assert_approx_eq!(f64, state.get_node_inventory(&edge.to_node_index()).unwrap(), 50.0);
        assert_approx_eq!(f64, state.get_node_out_flow(&edge.from_node_index()).unwrap(), 50.0);
        assert_approx_eq!(f64, state.get_node_in_flow(&edge.to_node_index()).unwrap(), 50.0);
        assert_approx_eq!(f64, state.get_edge_flow(&edge.index()).unwrap(), 50.0);
        assert_approx_eq!(f64, state.total_inventory(), 100.0);
    }

    #[test]
    fn test_reset_retains_inventory() {
        let (mut state, edge) = two_node_state();
        state.add_flow(&edge, 10.0).unwrap();
        state.reset();

        assert_approx_eq!(f64, state.get_edge_flow(&edge.index()).unwrap(), 0.0);
        assert_approx_eq!(f64, state.get_node_out_flow(&edge.from_node_index()).unwrap(), 0.0);
        assert_approx_eq!(f64, state.get_node_inventory(&edge.from_node_index()).unwrap(), 90.0);
    }

    #[test]
    fn test_apply_inventory_delta_rejects_negative_result() {
        let (mut state, edge) = two_node_state();
        let node = edge.to_node_index();

        assert!(matches!(
            state.apply_inventory_delta(&node, -1.0),
            Err(NetworkStateError::NegativeInventory { .. })
        ));
        // No mutation on error.
        assert_approx_eq!(f64, state.get_node_inventory(&node).unwrap(), 0.0);

        state.apply_inventory_delta(&node, 25.0).unwrap();
        assert_approx_eq!(f64, state.get_node_inventory(&node).unwrap(), 25.0);
    }

    #[test]
    fn test_potential_surplus_and_deficit() {
        let (state, edge) = two_node_state();
        let a = edge.from_node_index();
        let b = edge.to_node_index();

        assert_approx_eq!(f64, state.get_node_potential(&a).unwrap(), 2.0);
        assert_approx_eq!(f64, state.get_node_potential(&b).unwrap(), 0.0);
        assert_approx_eq!(f64, state.get_node_surplus(&a).unwrap(), 50.0);
        assert_approx_eq!(f64, state.get_node_deficit(&a).unwrap(), 0.0);
        assert_approx_eq!(f64, state.get_node_deficit(&b).unwrap(), 50.0);
    }

    #[test]
    fn test_set_node_target_validation() {
        let (mut state, edge) = two_node_state();
        let a = edge.from_node_index();

        state.set_node_target(&a, 80.0).unwrap();
        assert_approx_eq!(f64, state.get_node_target(&a).unwrap(), 80.0);

        assert!(matches!(
            state.set_node_target(&a, 0.0),
            Err(NetworkStateError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_external_ledger() {
        let (mut state, edge) = two_node_state();
        let a = edge.from_node_index();

        state.add_external_in(&a, 30.0).unwrap();
        state.add_external_out(&a, 10.0).unwrap();

        assert_approx_eq!(f64, state.get_node_inventory(&a).unwrap(), 120.0);
        assert_approx_eq!(f64, state.total_external_in(), 30.0);
        assert_approx_eq!(f64, state.total_external_out(), 10.0);
        assert_approx_eq!(f64, state.external_balance(), 20.0);
        assert_approx_eq!(f64, state.total_inventory(), 120.0);

        assert!(matches!(
            state.add_external_out(&a, 1000.0),
            Err(NetworkStateError::NegativeInventory { .. })
        ));
    }

    #[test]
    fn test_outage_countdown() {
        let (mut state, edge) = two_node_state();
        let idx = edge.index();

        state
            .set_edge_outage(&idx, EdgeOutage::new(0.0, NonZeroUsize::new(2).unwrap()))
            .unwrap();
        assert_eq!(state.get_edge_outage(&idx).unwrap().remaining().get(), 2);

        state.complete();
        assert_eq!(state.get_edge_outage(&idx).unwrap().remaining().get(), 1);

        state.complete();
        assert!(state.get_edge_outage(&idx).is_none());
    }
}
