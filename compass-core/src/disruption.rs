use crate::edge::EdgeIndex;
use crate::network::Network;
use crate::node::NodeIndex;
use crate::state::{EdgeOutage, NetworkState, NetworkStateError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised when scheduling a disruption.
#[derive(Error, Debug)]
pub enum DisruptionScheduleError {
    #[error("outage factor is negative: {factor}")]
    NegativeFactor { factor: f64 },
    #[error("external transfer amount is negative: {amount}")]
    NegativeAmount { amount: f64 },
}

/// Errors raised when applying a disruption at the start of a tick.
#[derive(Error, Debug)]
pub enum DisruptionError {
    #[error("edge with index `{index}` not found")]
    EdgeIndexNotFound { index: EdgeIndex },
    #[error("node with index `{index}` not found")]
    NodeIndexNotFound { index: NodeIndex },
    #[error("demand shift on node {index} would make its target non-positive: {target}")]
    InvalidTarget { index: NodeIndex, target: f64 },
    #[error("state error: {0}")]
    State(#[from] NetworkStateError),
}

/// An exogenous shock applied at the start of a tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Disruption {
    /// Scale an edge's capacity by `factor` for `duration` ticks, after which the
    /// edge's capacity profile applies unscaled again. A factor of zero is a full
    /// outage.
    CapacityOutage {
        edge: EdgeIndex,
        factor: f64,
        duration: NonZeroUsize,
    },
    /// Shift a node's target inventory by `delta`. The shift is permanent; the
    /// resulting target must remain positive.
    DemandShift { node: NodeIndex, delta: f64 },
    /// Deliver `amount` to a node from outside the network.
    ExternalInflow { node: NodeIndex, amount: f64 },
    /// Remove `amount` from a node to outside the network. Fails the tick if the
    /// node's inventory is insufficient; clamping is the driver's responsibility.
    ExternalOutflow { node: NodeIndex, amount: f64 },
}

impl Disruption {
    fn validate(&self) -> Result<(), DisruptionScheduleError> {
        match self {
            Self::CapacityOutage { factor, .. } => {
                if *factor < 0.0 {
                    return Err(DisruptionScheduleError::NegativeFactor { factor: *factor });
                }
            }
            Self::DemandShift { .. } => {}
            Self::ExternalInflow { amount, .. } | Self::ExternalOutflow { amount, .. } => {
                if *amount < 0.0 {
                    return Err(DisruptionScheduleError::NegativeAmount { amount: *amount });
                }
            }
        }
        Ok(())
    }

    /// Apply the disruption to the given state.
    ///
    /// Every applied event is logged; these are the only external mutations of a run
    /// and the conservation ledger accounts for them explicitly.
    pub(crate) fn apply(
        &self,
        network: &Network,
        state: &mut NetworkState,
    ) -> Result<(), DisruptionError> {
        match self {
            Self::CapacityOutage {
                edge,
                factor,
                duration,
            } => {
                network
                    .get_edge(edge)
                    .ok_or(DisruptionError::EdgeIndexNotFound { index: *edge })?;

                let replaced = state.set_edge_outage(edge, EdgeOutage::new(*factor, *duration))?;
                if replaced.is_some() {
                    warn!("edge {} already had an active outage, replacing it", edge);
                }
                info!(
                    "capacity outage on edge {}: factor {} for {} ticks",
                    edge, factor, duration
                );
            }
            Self::DemandShift { node, delta } => {
                let target = state.get_node_target(node).map_err(|_| {
                    DisruptionError::NodeIndexNotFound { index: *node }
                })?;

                let new_target = target + delta;
                if new_target <= 0.0 {
                    return Err(DisruptionError::InvalidTarget {
                        index: *node,
                        target: new_target,
                    });
                }
                state.set_node_target(node, new_target)?;
                info!(
                    "demand shift on node {}: target {} -> {}",
                    node, target, new_target
                );
            }
            Self::ExternalInflow { node, amount } => {
                state.add_external_in(node, *amount)?;
                info!("external inflow of {} into node {}", amount, node);
            }
            Self::ExternalOutflow { node, amount } => {
                state.add_external_out(node, *amount)?;
                info!("external outflow of {} from node {}", amount, node);
            }
        }
        Ok(())
    }
}

/// An ordered queue of disruptions keyed by the tick they apply to.
///
/// Events are consumed by the stepper at the start of their tick; events scheduled
/// for a tick that has already passed are applied at the next tick to run.
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct DisruptionSchedule {
    queue: BTreeMap<usize, Vec<Disruption>>,
}

impl DisruptionSchedule {
    pub fn schedule(
        &mut self,
        tick: usize,
        disruption: Disruption,
    ) -> Result<(), DisruptionScheduleError> {
        disruption.validate()?;
        self.queue.entry(tick).or_default().push(disruption);
        Ok(())
    }

    /// All events due at or before `tick`, in scheduling order.
    pub(crate) fn due(&self, tick: usize) -> Vec<Disruption> {
        self.queue
            .range(..=tick)
            .flat_map(|(_, disruptions)| disruptions.iter().cloned())
            .collect()
    }

    /// Remove all events due at or before `tick`.
    pub(crate) fn clear_through(&mut self, tick: usize) {
        let remaining = self.queue.split_off(&(tick + 1));
        self.queue = remaining;
    }

    /// The tick of the next pending event, if any.
    pub fn next_tick(&self) -> Option<usize> {
        self.queue.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.queue.values().map(|d| d.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift() -> Disruption {
        let mut network = Network::default();
        let node = network.add_node("a", 1.0, 1.0).unwrap();
        Disruption::DemandShift { node, delta: 1.0 }
    }

    #[test]
    fn test_schedule_orders_by_tick() {
        let mut schedule = DisruptionSchedule::default();
        schedule.schedule(5, shift()).unwrap();
        schedule.schedule(2, shift()).unwrap();

        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule.next_tick(), Some(2));

        assert_eq!(schedule.due(1).len(), 0);
        assert_eq!(schedule.due(2).len(), 1);
        assert_eq!(schedule.due(5).len(), 2);

        schedule.clear_through(2);
        assert_eq!(schedule.next_tick(), Some(5));
        schedule.clear_through(5);
        assert!(schedule.is_empty());
    }

    #[test]
    fn test_invalid_disruptions_are_rejected() {
        let mut schedule = DisruptionSchedule::default();

        let mut network = Network::default();
        let a = network.add_node("a", 1.0, 1.0).unwrap();
        let b = network.add_node("b", 1.0, 1.0).unwrap();
        let edge = network.connect_nodes(a, b, 1.0).unwrap();

        assert!(matches!(
            schedule.schedule(
                0,
                Disruption::CapacityOutage {
                    edge,
                    factor: -0.5,
                    duration: NonZeroUsize::new(1).unwrap(),
                }
            ),
            Err(DisruptionScheduleError::NegativeFactor { .. })
        ));

        assert!(matches!(
            schedule.schedule(0, Disruption::ExternalInflow { node: a, amount: -1.0 }),
            Err(DisruptionScheduleError::NegativeAmount { .. })
        ));

        assert!(schedule.is_empty());
    }

    #[test]
    fn test_apply_demand_shift() {
        let mut network = Network::default();
        let a = network.add_node("a", 100.0, 50.0).unwrap();
        let mut state = network.create_initial_state();

        Disruption::DemandShift { node: a, delta: 25.0 }
            .apply(&network, &mut state)
            .unwrap();
        assert_eq!(state.get_node_target(&a).unwrap(), 75.0);

        assert!(matches!(
            Disruption::DemandShift { node: a, delta: -75.0 }.apply(&network, &mut state),
            Err(DisruptionError::InvalidTarget { .. })
        ));
        // Target unchanged after the failed shift.
        assert_eq!(state.get_node_target(&a).unwrap(), 75.0);
    }

    #[test]
    fn test_apply_external_transfers() {
        let mut network = Network::default();
        let a = network.add_node("a", 10.0, 50.0).unwrap();
        let mut state = network.create_initial_state();

        Disruption::ExternalInflow { node: a, amount: 5.0 }
            .apply(&network, &mut state)
            .unwrap();
        Disruption::ExternalOutflow { node: a, amount: 12.0 }
            .apply(&network, &mut state)
            .unwrap();

        assert_eq!(state.get_node_inventory(&a).unwrap(), 3.0);
        assert_eq!(state.external_balance(), -7.0);

        assert!(matches!(
            Disruption::ExternalOutflow { node: a, amount: 100.0 }.apply(&network, &mut state),
            Err(DisruptionError::State(NetworkStateError::NegativeInventory { .. }))
        ));
    }
}
