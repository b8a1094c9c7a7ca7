use crate::disruption::{Disruption, DisruptionError, DisruptionSchedule, DisruptionScheduleError};
use crate::network::{Network, NetworkStepError};
use crate::recorders::{
    RecorderFinalResult, RecorderFinaliseError, RecorderInternalState, RecorderSaveError,
};
use crate::resolvers::FlowResolver;
use crate::state::NetworkState;
use crate::timestep::TimeDomain;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StepError {
    #[error("No more ticks")]
    EndOfTicks,
    #[error("error applying disruption at tick {tick}: {source}")]
    Disruption {
        tick: usize,
        #[source]
        source: DisruptionError,
    },
    #[error("error stepping network: {0}")]
    Network(#[from] NetworkStepError),
    #[error("error saving recorder `{name}`: {source}")]
    RecorderSave {
        name: String,
        #[source]
        source: RecorderSaveError,
    },
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Step(#[from] StepError),
    #[error("error finalising recorder `{name}`: {source}")]
    RecorderFinalise {
        name: String,
        #[source]
        source: RecorderFinaliseError,
    },
}

/// The mutable state of a single run.
pub struct ModelState<R> {
    current_tick_idx: usize,
    state: NetworkState,
    disruptions: DisruptionSchedule,
    recorder_state: Vec<Option<Box<dyn RecorderInternalState>>>,
    resolver: R,
}

impl<R> ModelState<R> {
    pub fn network_state(&self) -> &NetworkState {
        &self.state
    }

    pub fn network_state_mut(&mut self) -> &mut NetworkState {
        &mut self.state
    }

    /// The index of the next tick to be simulated.
    pub fn current_tick(&self) -> usize {
        self.current_tick_idx
    }

    /// Schedule an additional disruption mid-run.
    pub fn schedule_disruption(
        &mut self,
        tick: usize,
        disruption: Disruption,
    ) -> Result<(), DisruptionScheduleError> {
        self.disruptions.schedule(tick, disruption)
    }
}

/// The results of a run.
///
/// Only recorders which produced a final result are present.
pub struct RunResult {
    results: HashMap<String, Box<dyn RecorderFinalResult>>,
}

impl RunResult {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Get the result of a recorder by name.
    pub fn get(&self, name: &str) -> Option<&dyn RecorderFinalResult> {
        self.results.get(name).map(|r| r.as_ref())
    }

    /// Get the aggregated value of a recorder by name, if it exists and can be
    /// aggregated.
    pub fn get_aggregated_value(&self, name: &str) -> Option<f64> {
        self.results.get(name).and_then(|r| r.aggregated_value().ok())
    }
}

/// A network paired with a bounded tick domain and a disruption schedule.
///
/// The network is immutable while a run is in progress; everything that evolves
/// (inventories, targets, outages, the tick cursor) lives in a [`ModelState`] so that
/// several independent runs can be taken from the same model.
pub struct Model {
    domain: TimeDomain,
    network: Network,
    disruptions: DisruptionSchedule,
}

impl Model {
    /// Construct a new model from a [`TimeDomain`] and [`Network`].
    pub fn new(domain: TimeDomain, network: Network) -> Self {
        Self {
            domain,
            network,
            disruptions: DisruptionSchedule::default(),
        }
    }

    pub fn domain(&self) -> &TimeDomain {
        &self.domain
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn network_mut(&mut self) -> &mut Network {
        &mut self.network
    }

    pub fn disruptions(&self) -> &DisruptionSchedule {
        &self.disruptions
    }

    /// Schedule a disruption for the start of the given tick.
    pub fn schedule_disruption(
        &mut self,
        tick: usize,
        disruption: Disruption,
    ) -> Result<(), DisruptionScheduleError> {
        self.disruptions.schedule(tick, disruption)
    }

    /// Create the state for a fresh run using resolver `R`.
    pub fn setup<R>(&self) -> ModelState<Box<R>>
    where
        R: FlowResolver,
    {
        ModelState {
            current_tick_idx: 0,
            state: self.network.create_initial_state(),
            disruptions: self.disruptions.clone(),
            recorder_state: self
                .network
                .recorders()
                .iter()
                .map(|r| r.setup(&self.domain, &self.network))
                .collect(),
            resolver: R::setup(&self.network),
        }
    }

    /// Advance the run by a single tick.
    ///
    /// Due disruptions are applied first, then flows are resolved and applied. The
    /// tick is all-or-nothing: on any error the previous state is kept intact and the
    /// tick may be retried once the cause is fixed.
    pub fn step<R>(&self, state: &mut ModelState<Box<R>>) -> Result<(), StepError>
    where
        R: FlowResolver,
    {
        let timestep = self
            .domain
            .timesteps()
            .get(state.current_tick_idx)
            .ok_or(StepError::EndOfTicks)?;

        debug!("Starting tick {}", timestep.index);

        // Work on a copy so a failed tick leaves no partial mutation behind.
        let mut working = state.state.clone();

        for disruption in state.disruptions.due(timestep.index) {
            disruption
                .apply(&self.network, &mut working)
                .map_err(|source| StepError::Disruption {
                    tick: timestep.index,
                    source,
                })?;
        }

        self.network.step(timestep, &mut state.resolver, &mut working)?;

        state.disruptions.clear_through(timestep.index);
        state.state = working;

        for (recorder, internal_state) in self
            .network
            .recorders()
            .iter()
            .zip(state.recorder_state.iter_mut())
        {
            recorder
                .save(timestep, &self.network, &state.state, internal_state)
                .map_err(|source| StepError::RecorderSave {
                    name: recorder.name().to_string(),
                    source,
                })?;
        }

        // Finally increment the tick index
        state.current_tick_idx += 1;

        Ok(())
    }

    /// Run the model through its whole time domain.
    ///
    /// This method will set up a fresh state, run every tick, and finalise the
    /// recorders.
    pub fn run<R>(&self) -> Result<RunResult, RunError>
    where
        R: FlowResolver,
    {
        let mut state = self.setup::<R>();
        self.run_with_state(&mut state)?;
        self.finalise(state)
    }

    /// Run the model with the provided state.
    pub fn run_with_state<R>(&self, state: &mut ModelState<Box<R>>) -> Result<(), RunError>
    where
        R: FlowResolver,
    {
        loop {
            match self.step(state) {
                Ok(_) => {}
                Err(StepError::EndOfTicks) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Finalise the run, consuming the state and returning the recorders' results.
    pub fn finalise<R>(&self, state: ModelState<Box<R>>) -> Result<RunResult, RunError> {
        let mut results = HashMap::new();

        for (recorder, internal_state) in self
            .network
            .recorders()
            .iter()
            .zip(state.recorder_state.into_iter())
        {
            let result = recorder.finalise(&self.network, internal_state).map_err(|source| {
                RunError::RecorderFinalise {
                    name: recorder.name().to_string(),
                    source,
                }
            })?;

            if let Some(result) = result {
                results.insert(recorder.name().to_string(), result);
            }
        }

        Ok(RunResult { results })
    }
}
