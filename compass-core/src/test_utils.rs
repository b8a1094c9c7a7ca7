/// Utilities for unit tests.
use crate::metric::MetricF64;
use crate::model::Model;
use crate::network::Network;
use crate::node::NodeIndex;
use crate::recorders::AssertionF64Recorder;
use crate::resolvers::ProportionalResolver;
use crate::timestep::{TimeDomain, Timestepper};
use ndarray::Array1;
use rand::Rng;
use rand_distr::{Distribution, Normal};

pub fn default_timestepper() -> Timestepper {
    Timestepper::new(15)
}

pub fn default_time_domain() -> TimeDomain {
    default_timestepper().into()
}

/// Create a simple test network: a surplus supplier feeding a deficit consumer over
/// a single edge with the given capacity.
pub fn simple_network(network: &mut Network, capacity: f64) -> (NodeIndex, NodeIndex) {
    let supplier = network.add_node("supplier", 100.0, 50.0).unwrap();
    let consumer = network.add_node("consumer", 0.0, 50.0).unwrap();
    network.connect_nodes(supplier, consumer, capacity).unwrap();
    (supplier, consumer)
}

/// Create a simple test model with two nodes.
pub fn simple_model(capacity: f64) -> Model {
    let mut network = Network::default();
    simple_network(&mut network, capacity);
    Model::new(default_time_domain(), network)
}

/// A three node chain. The middle node settles on its target and relays nothing
/// beyond it, since flow only moves down local potential gradients.
pub fn chain_model() -> Model {
    let mut network = Network::default();
    let a = network.add_node("a", 120.0, 40.0).unwrap();
    let b = network.add_node("b", 0.0, 40.0).unwrap();
    let c = network.add_node("c", 0.0, 40.0).unwrap();
    network.connect_nodes(a, b, 100.0).unwrap();
    network.connect_nodes(b, c, 100.0).unwrap();
    Model::new(default_time_domain(), network)
}

/// Add an assertion recorder for the given metric to the model and run it with the
/// default resolver.
///
/// The expected values must cover every tick of the model's domain.
pub fn run_and_assert_metric(
    model: &mut Model,
    metric: MetricF64,
    expected_values: Array1<f64>,
    ulps: Option<i64>,
    epsilon: Option<f64>,
) {
    let recorder = AssertionF64Recorder::new("assert", metric, expected_values, ulps, epsilon);
    model.network_mut().add_recorder(Box::new(recorder)).unwrap();
    model.run::<ProportionalResolver>().unwrap();
}

/// Make a random network with `num_nodes` nodes (at least two) and up to
/// `max_out_degree` outgoing edges per node.
///
/// Inventories, targets, and capacities are drawn from normal distributions and
/// clamped to valid ranges, so a seeded `rng` yields a reproducible network.
pub fn make_random_network<R: Rng>(num_nodes: usize, max_out_degree: usize, rng: &mut R) -> Network {
    let inventory_distr: Normal<f64> = Normal::new(100.0, 30.0).unwrap();
    let target_distr: Normal<f64> = Normal::new(75.0, 15.0).unwrap();
    let capacity_distr: Normal<f64> = Normal::new(25.0, 10.0).unwrap();

    let mut network = Network::default();

    for i in 0..num_nodes {
        let inventory = inventory_distr.sample(rng).max(0.0);
        let target = target_distr.sample(rng).max(1.0);
        network
            .add_node(&format!("node-{i}"), inventory, target)
            .unwrap();
    }

    let indices: Vec<NodeIndex> = network.nodes().iter().map(|n| n.index()).collect();
    for &from in &indices {
        let out_degree = rng.gen_range(1..=max_out_degree);
        for _ in 0..out_degree {
            let to = indices[rng.gen_range(0..num_nodes)];
            if to == from {
                continue;
            }
            let capacity = capacity_distr.sample(rng).max(0.0);
            network.connect_nodes(from, to, capacity).unwrap();
        }
    }

    network
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepError;
    use crate::resolvers::{FlowResolver, GreedyResolver};
    use crate::timestep::Timestepper;
    use float_cmp::assert_approx_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_simple_model_trajectory() {
        let mut model = simple_model(20.0);
        let supplier = model.network().get_node_index_by_name("supplier").unwrap();

        // Inventory drains by the edge capacity each tick until the surplus is gone.
        let expected = Array1::from_shape_fn(15, |i| (100.0 - 20.0 * (i as f64 + 1.0)).max(50.0));
        run_and_assert_metric(&mut model, MetricF64::NodeInventory(supplier), expected, None, None);
    }

    #[test]
    fn test_chain_settles_at_targets() {
        let model = chain_model();
        let mut state = model.setup::<ProportionalResolver>();
        model.run_with_state(&mut state).unwrap();

        let a = model.network().get_node_index_by_name("a").unwrap();
        let b = model.network().get_node_index_by_name("b").unwrap();
        let c = model.network().get_node_index_by_name("c").unwrap();

        let network_state = state.network_state();
        assert_approx_eq!(f64, network_state.get_node_inventory(&a).unwrap(), 80.0);
        assert_approx_eq!(f64, network_state.get_node_inventory(&b).unwrap(), 40.0);
        assert_approx_eq!(f64, network_state.get_node_inventory(&c).unwrap(), 0.0);
    }

    fn check_invariants_over_run<R: FlowResolver>(model: &Model) {
        let mut state = model.setup::<R>();
        let initial_total = state.network_state().total_inventory();

        loop {
            match model.step(&mut state) {
                Ok(_) => {}
                Err(StepError::EndOfTicks) => break,
                Err(e) => panic!("step failed: {e}"),
            }

            let network_state = state.network_state();

            for node in model.network().nodes().iter() {
                let inventory = network_state.get_node_inventory(&node.index()).unwrap();
                assert!(inventory >= 0.0, "negative inventory on {}", node.name());
            }

            for edge in model.network().edges().iter() {
                let flow = network_state.get_edge_flow(&edge.index()).unwrap();
                let capacity = network_state.get_edge_capacity(&edge.index()).unwrap();
                assert!(flow >= 0.0, "negative flow on edge {}", edge.index());
                assert!(
                    flow <= capacity + 1e-9,
                    "flow {} exceeds capacity {} on edge {}",
                    flow,
                    capacity,
                    edge.index()
                );
            }

            assert_approx_eq!(
                f64,
                network_state.total_inventory(),
                initial_total,
                epsilon = 1e-6
            );
        }
    }

    #[test]
    fn test_random_network_invariants() {
        // ChaCha8 should be consistent across builds and platforms
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let network = make_random_network(20, 3, &mut rng);
        let model = Model::new(Timestepper::new(20).into(), network);

        check_invariants_over_run::<ProportionalResolver>(&model);
        check_invariants_over_run::<GreedyResolver>(&model);
    }

    #[test]
    fn test_random_network_is_reproducible() {
        let make = || {
            let mut rng = ChaCha8Rng::seed_from_u64(7);
            make_random_network(10, 2, &mut rng)
        };

        let first = make();
        let second = make();

        assert_eq!(first.nodes().len(), second.nodes().len());
        assert_eq!(first.edges().len(), second.edges().len());
        for (a, b) in first.nodes().iter().zip(second.nodes().iter()) {
            assert_approx_eq!(f64, a.initial_inventory(), b.initial_inventory());
            assert_approx_eq!(f64, a.target(), b.target());
        }
    }
}
