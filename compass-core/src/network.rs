use crate::edge::{CapacityProfile, Edge, EdgeIndex, EdgeVec};
use crate::node::{Node, NodeIndex, NodeVec};
use crate::recorders::{Recorder, RecorderIndex};
use crate::resolvers::{FlowAssignment, FlowResolver, ResolveError};
use crate::state::{NetworkState, NetworkStateError};
use crate::timestep::Timestep;
use float_cmp::{approx_eq, F64Margin};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("node with name `{name}` already exists")]
    NodeAlreadyExists { name: String },
    #[error("node with name `{name}` not found")]
    NodeNotFound { name: String },
    #[error("node with index `{index}` not found")]
    NodeIndexNotFound { index: NodeIndex },
    #[error("edge with index `{index}` not found")]
    EdgeIndexNotFound { index: EdgeIndex },
    #[error("cannot connect a node to itself: `{name}`")]
    NodeConnectToSelf { name: String },
    #[error("initial inventory for node `{name}` is negative: {value}")]
    NegativeInitialInventory { name: String, value: f64 },
    #[error("target inventory for node `{name}` is not positive: {value}")]
    InvalidTarget { name: String, value: f64 },
    #[error("negative capacity: {value}")]
    NegativeCapacity { value: f64 },
    #[error("capacity series must contain at least one value")]
    EmptyCapacitySeries,
    #[error("recorder name `{name}` already exists")]
    RecorderNameAlreadyExists { name: String },
}

/// A violation of the flow invariants detected before a tick's deltas are applied.
///
/// These indicate a defective resolver; the offending tick is abandoned with no state
/// mutation, and the simulation remains usable once the resolver is fixed.
#[derive(Error, Debug)]
pub enum ConservationError {
    #[error("negative flow {flow} on edge {edge}")]
    NegativeFlow { edge: EdgeIndex, flow: f64 },
    #[error("flow {flow} on edge {edge} exceeds its capacity {capacity}")]
    FlowExceedsCapacity {
        edge: EdgeIndex,
        flow: f64,
        capacity: f64,
    },
    #[error("total outflow {outflow} from node {node} exceeds its inventory {inventory}")]
    OutflowExceedsInventory {
        node: NodeIndex,
        outflow: f64,
        inventory: f64,
    },
    #[error("flow assigned to unknown edge {edge}")]
    UnknownEdge { edge: EdgeIndex },
}

#[derive(Error, Debug)]
pub enum NetworkStepError {
    #[error("error resolving flows: {0}")]
    Resolve(#[from] ResolveError),
    #[error("conservation violated: {0}")]
    ConservationViolation(#[from] ConservationError),
    #[error("state error: {0}")]
    State(#[from] NetworkStateError),
}

/// Tolerance for comparing resolved flows against their bounds. Allows for rounding
/// in proportional shares without letting real violations through.
const FLOW_MARGIN: F64Margin = F64Margin {
    ulps: 5,
    epsilon: 1e-9,
};

fn exceeds(value: f64, bound: f64) -> bool {
    value > bound && !approx_eq!(f64, value, bound, FLOW_MARGIN)
}

/// A network of inventory-holding nodes joined by directed, capacity-limited edges.
///
/// This struct is the main entry point for constructing a network and should be used
/// to represent a discrete system. A network holds static configuration only; the
/// evolving inventories, targets, and flows of a run live in a [`NetworkState`]
/// created by [`Network::create_initial_state`].
#[derive(Default)]
pub struct Network {
    nodes: NodeVec,
    edges: EdgeVec,
    recorders: Vec<Box<dyn Recorder>>,
}

impl Network {
    pub fn nodes(&self) -> &NodeVec {
        &self.nodes
    }

    pub fn edges(&self) -> &EdgeVec {
        &self.edges
    }

    pub fn recorders(&self) -> &Vec<Box<dyn Recorder>> {
        &self.recorders
    }

    /// Add a new node to the network.
    pub fn add_node(
        &mut self,
        name: &str,
        initial_inventory: f64,
        target: f64,
    ) -> Result<NodeIndex, NetworkError> {
        // Check for name.
        if self.get_node_by_name(name).is_some() {
            return Err(NetworkError::NodeAlreadyExists {
                name: name.to_string(),
            });
        }

        if initial_inventory < 0.0 {
            return Err(NetworkError::NegativeInitialInventory {
                name: name.to_string(),
                value: initial_inventory,
            });
        }

        if target <= 0.0 {
            return Err(NetworkError::InvalidTarget {
                name: name.to_string(),
                value: target,
            });
        }

        Ok(self.nodes.push_new(name, initial_inventory, target))
    }

    /// Connect two nodes together with a new edge.
    pub fn connect_nodes<C: Into<CapacityProfile>>(
        &mut self,
        from_node_index: NodeIndex,
        to_node_index: NodeIndex,
        capacity: C,
    ) -> Result<EdgeIndex, NetworkError> {
        // Validate everything up-front so a failure leaves the network untouched.
        let from_node = self
            .nodes
            .get(&from_node_index)
            .ok_or(NetworkError::NodeIndexNotFound {
                index: from_node_index,
            })?;

        // Self connections are not allowed.
        if from_node_index == to_node_index {
            return Err(NetworkError::NodeConnectToSelf {
                name: from_node.name().to_string(),
            });
        }

        self.nodes
            .get(&to_node_index)
            .ok_or(NetworkError::NodeIndexNotFound {
                index: to_node_index,
            })?;

        let capacity = capacity.into();
        Self::validate_capacity(&capacity)?;

        let edge_index = self.edges.push(from_node_index, to_node_index, capacity);

        self.nodes
            .get_mut(&from_node_index)
            .expect("from node checked above")
            .add_outgoing_edge(edge_index);
        self.nodes
            .get_mut(&to_node_index)
            .expect("to node checked above")
            .add_incoming_edge(edge_index);

        Ok(edge_index)
    }

    fn validate_capacity(capacity: &CapacityProfile) -> Result<(), NetworkError> {
        if capacity.is_empty() {
            return Err(NetworkError::EmptyCapacitySeries);
        }
        if let Some(value) = capacity.first_negative() {
            return Err(NetworkError::NegativeCapacity { value });
        }
        Ok(())
    }

    /// Replace an edge's capacity profile.
    pub fn set_edge_capacity<C: Into<CapacityProfile>>(
        &mut self,
        index: &EdgeIndex,
        capacity: C,
    ) -> Result<(), NetworkError> {
        let capacity = capacity.into();
        Self::validate_capacity(&capacity)?;

        let edge = self
            .edges
            .get_mut(index)
            .ok_or(NetworkError::EdgeIndexNotFound { index: *index })?;
        edge.set_capacity(capacity);
        Ok(())
    }

    /// Activate or deactivate a node. An inactive node keeps its inventory but takes
    /// no part in flow resolution.
    pub fn set_node_active(&mut self, index: &NodeIndex, active: bool) -> Result<(), NetworkError> {
        let node = self
            .nodes
            .get_mut(index)
            .ok_or(NetworkError::NodeIndexNotFound { index: *index })?;
        node.set_active(active);
        Ok(())
    }

    /// Activate or deactivate a node by name.
    pub fn set_node_active_by_name(&mut self, name: &str, active: bool) -> Result<(), NetworkError> {
        let index = self
            .get_node_index_by_name(name)
            .ok_or_else(|| NetworkError::NodeNotFound {
                name: name.to_string(),
            })?;
        self.set_node_active(&index, active)
    }

    pub fn get_node(&self, index: &NodeIndex) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn get_node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name() == name)
    }

    pub fn get_node_index_by_name(&self, name: &str) -> Option<NodeIndex> {
        self.get_node_by_name(name).map(|n| n.index())
    }

    pub fn get_edge(&self, index: &EdgeIndex) -> Option<&Edge> {
        self.edges.get(index)
    }

    pub fn get_edge_index(&self, from_node_index: NodeIndex, to_node_index: NodeIndex) -> Option<EdgeIndex> {
        self.edges
            .iter()
            .find(|e| e.from_node_index() == from_node_index && e.to_node_index() == to_node_index)
            .map(|e| e.index())
    }

    /// Iterate over a node's outgoing edges.
    ///
    /// The iterator is lazy and may be restarted by calling this method again.
    pub fn edges_from(
        &self,
        index: &NodeIndex,
    ) -> Result<impl Iterator<Item = &Edge> + '_, NetworkError> {
        let node = self
            .nodes
            .get(index)
            .ok_or(NetworkError::NodeIndexNotFound { index: *index })?;
        Ok(node
            .outgoing_edges()
            .iter()
            .map(move |edge_index| &self.edges[**edge_index]))
    }

    pub fn add_recorder(&mut self, recorder: Box<dyn Recorder>) -> Result<RecorderIndex, NetworkError> {
        if self.get_recorder_index_by_name(recorder.name()).is_some() {
            return Err(NetworkError::RecorderNameAlreadyExists {
                name: recorder.name().to_string(),
            });
        }

        let recorder_index = RecorderIndex::new(self.recorders.len());
        self.recorders.push(recorder);
        Ok(recorder_index)
    }

    pub fn get_recorder_index_by_name(&self, name: &str) -> Option<RecorderIndex> {
        self.recorders
            .iter()
            .position(|r| r.name() == name)
            .map(RecorderIndex::new)
    }

    /// Create the initial state for a run.
    pub fn create_initial_state(&self) -> NetworkState {
        let initial_node_states = self.nodes.iter().map(|n| n.default_state()).collect();
        NetworkState::new(initial_node_states, self.edges.len())
    }

    /// Write each edge's per-tick capacity (profile value scaled by any active
    /// outage) into the state.
    pub(crate) fn resolve_capacities(
        &self,
        timestep: &Timestep,
        state: &mut NetworkState,
    ) -> Result<(), NetworkStateError> {
        for edge in self.edges.iter() {
            let factor = state
                .get_edge_outage(&edge.index())
                .map(|outage| outage.factor())
                .unwrap_or(1.0);
            let capacity = edge.capacity().value(timestep.index) * factor;
            state.set_edge_capacity(&edge.index(), capacity)?;
        }
        Ok(())
    }

    /// Check a tick's assignments against the pre-tick snapshot.
    ///
    /// All-or-nothing: if any assignment would break an invariant the whole tick is
    /// rejected before a single delta is applied.
    fn validate_assignments(
        &self,
        assignments: &[FlowAssignment],
        state: &NetworkState,
    ) -> Result<(), NetworkStepError> {
        let mut outflows = vec![0.0; self.nodes.len()];

        for assignment in assignments {
            if assignment.flow < 0.0 {
                return Err(ConservationError::NegativeFlow {
                    edge: assignment.edge_index,
                    flow: assignment.flow,
                }
                .into());
            }

            let edge = self
                .edges
                .get(&assignment.edge_index)
                .ok_or(ConservationError::UnknownEdge {
                    edge: assignment.edge_index,
                })?;

            let capacity = state.get_edge_capacity(&edge.index())?;
            if exceeds(assignment.flow, capacity) {
                return Err(ConservationError::FlowExceedsCapacity {
                    edge: assignment.edge_index,
                    flow: assignment.flow,
                    capacity,
                }
                .into());
            }

            outflows[*edge.from_node_index()] += assignment.flow;
        }

        for node in self.nodes.iter() {
            let outflow = outflows[*node.index()];
            let inventory = state.get_node_inventory(&node.index())?;
            if exceeds(outflow, inventory) {
                return Err(ConservationError::OutflowExceedsInventory {
                    node: node.index(),
                    outflow,
                    inventory,
                }
                .into());
            }
        }

        Ok(())
    }

    /// Perform a single tick mutating the current state.
    ///
    /// Resolves per-tick capacities, runs the resolver against the snapshot,
    /// validates the assignments, and applies every delta pairwise so that the total
    /// inventory is conserved exactly.
    pub fn step<R>(
        &self,
        timestep: &Timestep,
        resolver: &mut Box<R>,
        state: &mut NetworkState,
    ) -> Result<(), NetworkStepError>
    where
        R: FlowResolver,
    {
        state.reset();
        self.resolve_capacities(timestep, state)?;

        let assignments = resolver.resolve(self, timestep, state)?;
        self.validate_assignments(&assignments, state)?;

        let total_before = state.total_inventory();
        for assignment in &assignments {
            let edge = self
                .edges
                .get(&assignment.edge_index)
                .expect("assignments validated above");
            state.add_flow(edge, assignment.flow)?;
        }

        debug_assert!(
            approx_eq!(
                f64,
                state.total_inventory(),
                total_before,
                F64Margin {
                    ulps: 5,
                    epsilon: 1e-6
                }
            ),
            "mass-balance error: total inventory drifted within a tick"
        );

        state.complete();

        debug!(
            "tick {} complete, total inventory {}",
            timestep.index,
            state.total_inventory()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolvers::ProportionalResolver;
    use float_cmp::assert_approx_eq;
    use std::ops::Deref;

    #[test]
    fn test_simple_network() {
        let mut network = Network::default();

        let supplier = network.add_node("supplier", 100.0, 50.0).unwrap();
        let consumer = network.add_node("consumer", 0.0, 50.0).unwrap();

        assert_eq!(*supplier.deref(), 0);
        assert_eq!(*consumer.deref(), 1);

        let edge = network.connect_nodes(supplier, consumer, 100.0).unwrap();
        assert_eq!(*edge.deref(), 0);

        // Now assert the internal structure is as expected.
        let supplier = network.get_node_by_name("supplier").unwrap();
        let consumer = network.get_node_by_name("consumer").unwrap();
        assert_eq!(supplier.outgoing_edges().len(), 1);
        assert_eq!(consumer.incoming_edges().len(), 1);

        assert!(network.get_edge_index(supplier.index(), consumer.index()).is_some());
    }

    #[test]
    /// Test the duplicate node names are not permitted.
    fn test_duplicate_node_name() {
        let mut network = Network::default();

        network.add_node("my-node", 0.0, 10.0).unwrap();
        // Second add with the same name
        assert!(matches!(
            network.add_node("my-node", 0.0, 10.0),
            Err(NetworkError::NodeAlreadyExists { name }) if name == "my-node"
        ));
    }

    #[test]
    fn test_invalid_node_values_are_rejected() {
        let mut network = Network::default();

        assert!(matches!(
            network.add_node("negative", -1.0, 10.0),
            Err(NetworkError::NegativeInitialInventory { .. })
        ));
        assert!(matches!(
            network.add_node("no-target", 10.0, 0.0),
            Err(NetworkError::InvalidTarget { .. })
        ));
        // Failed registrations leave nothing behind.
        assert!(network.nodes().is_empty());
    }

    #[test]
    fn test_invalid_connections_are_rejected() {
        let mut network = Network::default();
        let a = network.add_node("a", 10.0, 10.0).unwrap();
        let b = network.add_node("b", 10.0, 10.0).unwrap();

        assert!(matches!(
            network.connect_nodes(a, a, 10.0),
            Err(NetworkError::NodeConnectToSelf { .. })
        ));
        assert!(matches!(
            network.connect_nodes(a, b, -5.0),
            Err(NetworkError::NegativeCapacity { value }) if value == -5.0
        ));
        assert!(matches!(
            network.connect_nodes(a, b, Vec::<f64>::new()),
            Err(NetworkError::EmptyCapacitySeries)
        ));
        assert!(network.edges().is_empty());
    }

    #[test]
    fn test_edges_from_is_restartable() {
        let mut network = Network::default();
        let hub = network.add_node("hub", 10.0, 10.0).unwrap();
        let first = network.add_node("first", 0.0, 10.0).unwrap();
        let second = network.add_node("second", 0.0, 10.0).unwrap();
        network.connect_nodes(hub, first, 1.0).unwrap();
        network.connect_nodes(hub, second, 1.0).unwrap();

        let destinations: Vec<_> = network
            .edges_from(&hub)
            .unwrap()
            .map(|e| e.to_node_index())
            .collect();
        assert_eq!(destinations, vec![first, second]);

        // A second call restarts the iteration.
        assert_eq!(network.edges_from(&hub).unwrap().count(), 2);
        assert_eq!(network.edges_from(&first).unwrap().count(), 0);
    }

    #[test]
    fn test_set_node_active_by_name() {
        let mut network = Network::default();
        network.add_node("depot", 10.0, 10.0).unwrap();

        network.set_node_active_by_name("depot", false).unwrap();
        assert!(!network.get_node_by_name("depot").unwrap().is_active());

        assert!(matches!(
            network.set_node_active_by_name("missing", true),
            Err(NetworkError::NodeNotFound { .. })
        ));
    }

    fn step_once(network: &Network, state: &mut NetworkState) {
        let mut resolver = ProportionalResolver::setup(network);
        network.step(&Timestep::new(0), &mut resolver, state).unwrap();
    }

    #[test]
    fn test_set_edge_capacity() {
        let mut network = Network::default();
        let a = network.add_node("a", 100.0, 50.0).unwrap();
        let b = network.add_node("b", 0.0, 50.0).unwrap();
        let edge = network.connect_nodes(a, b, 100.0).unwrap();

        network.set_edge_capacity(&edge, 5.0).unwrap();
        assert!(matches!(
            network.set_edge_capacity(&edge, -1.0),
            Err(NetworkError::NegativeCapacity { .. })
        ));

        let mut state = network.create_initial_state();
        step_once(&network, &mut state);
        assert_approx_eq!(f64, state.get_edge_flow(&edge).unwrap(), 5.0);
    }

    #[test]
    fn test_step_moves_surplus_to_deficit() {
        let mut network = Network::default();
        let a = network.add_node("a", 100.0, 50.0).unwrap();
        let b = network.add_node("b", 0.0, 50.0).unwrap();
        let edge = network.connect_nodes(a, b, 100.0).unwrap();

        let mut state = network.create_initial_state();
        step_once(&network, &mut state);

        assert_approx_eq!(f64, state.get_edge_flow(&edge).unwrap(), 50.0);
        assert_approx_eq!(f64, state.get_node_inventory(&a).unwrap(), 50.0);
        assert_approx_eq!(f64, state.get_node_inventory(&b).unwrap(), 50.0);
        assert_approx_eq!(f64, state.total_inventory(), 100.0);
    }

    #[test]
    fn test_step_respects_capacity() {
        let mut network = Network::default();
        let a = network.add_node("a", 100.0, 50.0).unwrap();
        let b = network.add_node("b", 0.0, 50.0).unwrap();
        let edge = network.connect_nodes(a, b, 20.0).unwrap();

        let mut state = network.create_initial_state();
        step_once(&network, &mut state);

        assert_approx_eq!(f64, state.get_edge_flow(&edge).unwrap(), 20.0);
        assert_approx_eq!(f64, state.get_node_inventory(&a).unwrap(), 80.0);
        assert_approx_eq!(f64, state.get_node_inventory(&b).unwrap(), 20.0);
    }

    #[test]
    fn test_step_without_surplus_changes_nothing() {
        let mut network = Network::default();
        let a = network.add_node("a", 50.0, 50.0).unwrap();
        let b = network.add_node("b", 40.0, 50.0).unwrap();
        network.connect_nodes(a, b, 100.0).unwrap();

        let mut state = network.create_initial_state();
        step_once(&network, &mut state);

        assert_approx_eq!(f64, state.get_node_inventory(&a).unwrap(), 50.0);
        assert_approx_eq!(f64, state.get_node_inventory(&b).unwrap(), 40.0);
    }

    #[test]
    fn test_step_rejects_defective_assignments() {
        struct BrokenResolver;

        impl FlowResolver for BrokenResolver {
            fn name() -> &'static str {
                "broken"
            }

            fn setup(_network: &Network) -> Box<Self> {
                Box::new(Self)
            }

            fn resolve(
                &mut self,
                network: &Network,
                _timestep: &Timestep,
                _state: &NetworkState,
            ) -> Result<Vec<FlowAssignment>, ResolveError> {
                // Claims far more flow than the source holds.
                Ok(network
                    .edges()
                    .iter()
                    .map(|e| FlowAssignment::new(e.index(), 1e6))
                    .collect())
            }
        }

        let mut network = Network::default();
        let a = network.add_node("a", 100.0, 50.0).unwrap();
        let b = network.add_node("b", 0.0, 50.0).unwrap();
        network.connect_nodes(a, b, 1e9).unwrap();

        let mut state = network.create_initial_state();
        let mut resolver = BrokenResolver::setup(&network);
        let result = network.step(&Timestep::new(0), &mut resolver, &mut state);

        assert!(matches!(
            result,
            Err(NetworkStepError::ConservationViolation(
                ConservationError::OutflowExceedsInventory { .. }
            ))
        ));
        // The tick failed atomically: nothing was applied.
        assert_approx_eq!(f64, state.get_node_inventory(&a).unwrap(), 100.0);
        assert_approx_eq!(f64, state.get_node_inventory(&b).unwrap(), 0.0);
    }

    #[test]
    fn test_step_rejects_flow_over_capacity() {
        struct OverCapacityResolver;

        impl FlowResolver for OverCapacityResolver {
            fn name() -> &'static str {
                "over-capacity"
            }

            fn setup(_network: &Network) -> Box<Self> {
                Box::new(Self)
            }

            fn resolve(
                &mut self,
                network: &Network,
                _timestep: &Timestep,
                _state: &NetworkState,
            ) -> Result<Vec<FlowAssignment>, ResolveError> {
                Ok(network
                    .edges()
                    .iter()
                    .map(|e| FlowAssignment::new(e.index(), 30.0))
                    .collect())
            }
        }

        let mut network = Network::default();
        let a = network.add_node("a", 100.0, 50.0).unwrap();
        let b = network.add_node("b", 0.0, 50.0).unwrap();
        network.connect_nodes(a, b, 20.0).unwrap();

        let mut state = network.create_initial_state();
        let mut resolver = OverCapacityResolver::setup(&network);
        let result = network.step(&Timestep::new(0), &mut resolver, &mut state);

        assert!(matches!(
            result,
            Err(NetworkStepError::ConservationViolation(
                ConservationError::FlowExceedsCapacity { .. }
            ))
        ));
        assert_approx_eq!(f64, state.get_node_inventory(&a).unwrap(), 100.0);
    }

    #[test]
    fn test_capacity_series_is_followed() {
        let mut network = Network::default();
        let a = network.add_node("a", 1000.0, 10.0).unwrap();
        let b = network.add_node("b", 0.0, 500.0).unwrap();
        let edge = network
            .connect_nodes(a, b, vec![5.0, 10.0, 0.0])
            .unwrap();

        let mut state = network.create_initial_state();
        let mut resolver = ProportionalResolver::setup(&network);

        for (tick, expected) in [(0, 5.0), (1, 10.0), (2, 0.0), (3, 0.0)] {
            network.step(&Timestep::new(tick), &mut resolver, &mut state).unwrap();
            assert_approx_eq!(f64, state.get_edge_flow(&edge).unwrap(), expected);
        }
    }
}
