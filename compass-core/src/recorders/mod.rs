mod memory;

pub use memory::{MemoryRecorder, TickSeries};

use crate::agg_funcs::AggFuncError;
use crate::metric::{MetricF64, MetricF64Error};
use crate::network::Network;
use crate::state::NetworkState;
use crate::timestep::{TimeDomain, Timestep};
use float_cmp::{ApproxEq, F64Margin};
use ndarray::Array1;
use std::any::Any;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use thiserror::Error;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RecorderIndex(usize);

impl RecorderIndex {
    pub fn new(idx: usize) -> Self {
        Self(idx)
    }
}

impl Deref for RecorderIndex {
    type Target = usize;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for RecorderIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Meta data common to all recorders.
#[derive(Clone, Debug)]
pub struct RecorderMeta {
    pub name: String,
}

impl RecorderMeta {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Errors returned by recorder saving.
#[derive(Error, Debug)]
pub enum RecorderSaveError {
    #[error("metric error: {0}")]
    MetricF64Error(#[from] MetricF64Error),
}

/// Errors returned by recorder finalisation.
#[derive(Error, Debug)]
pub enum RecorderFinaliseError {
    #[error("aggregation error: {0}")]
    AggFuncError(#[from] AggFuncError),
}

/// Errors returned by recorder aggregation.
#[derive(Error, Debug)]
pub enum RecorderAggregationError {
    #[error("recorder does not support aggregation")]
    RecorderDoesNotSupportAggregation,
    #[error("aggregation error: {0}")]
    AggFuncError(#[from] AggFuncError),
}

pub trait RecorderInternalState: Any {}
impl<T> RecorderInternalState for T where T: Any {}

/// Helper function to downcast to internal recorder state and print a helpful panic
/// message if this fails.
fn downcast_internal_state_mut<T: 'static>(
    internal_state: &mut Option<Box<dyn RecorderInternalState>>,
) -> &mut T {
    match internal_state {
        Some(internal) => match (internal.as_mut() as &mut dyn Any).downcast_mut::<T>() {
            Some(state) => state,
            None => panic!("Internal state did not downcast to the correct type!"),
        },
        None => panic!("No internal state defined when one was expected!"),
    }
}

/// Helper function to downcast to internal recorder state and print a helpful panic
/// message if this fails.
fn downcast_internal_state<T: 'static>(
    internal_state: Option<Box<dyn RecorderInternalState>>,
) -> Box<T> {
    match internal_state {
        Some(internal) => match (internal as Box<dyn Any>).downcast::<T>() {
            Ok(state) => state,
            Err(_) => panic!("Internal state did not downcast to the correct type!"),
        },
        None => panic!("No internal state defined when one was expected!"),
    }
}

/// Result of finalising a recorder.
///
/// This should be used to store any final results of the recorder, e.g. recorded
/// series or aggregated values. The data should be standalone and not require access
/// to the network or other state.
pub trait RecorderFinalResult: Any + Send + Sync {
    /// The result as [`Any`], so callers can downcast to the concrete type.
    fn as_any(&self) -> &dyn Any;

    fn aggregated_value(&self) -> Result<f64, RecorderAggregationError> {
        Err(RecorderAggregationError::RecorderDoesNotSupportAggregation)
    }
}

pub trait Recorder: Send + Sync {
    fn meta(&self) -> &RecorderMeta;
    fn name(&self) -> &str {
        self.meta().name.as_str()
    }

    fn setup(
        &self,
        _domain: &TimeDomain,
        _network: &Network,
    ) -> Option<Box<dyn RecorderInternalState>> {
        None
    }

    fn save(
        &self,
        _timestep: &Timestep,
        _network: &Network,
        _state: &NetworkState,
        _internal_state: &mut Option<Box<dyn RecorderInternalState>>,
    ) -> Result<(), RecorderSaveError> {
        Ok(())
    }

    /// Finalise the recorder, producing its final result if it has one.
    ///
    /// This is called once after all ticks have been processed. The internal state is
    /// consumed by this method.
    fn finalise(
        &self,
        _network: &Network,
        _internal_state: Option<Box<dyn RecorderInternalState>>,
    ) -> Result<Option<Box<dyn RecorderFinalResult>>, RecorderFinaliseError> {
        Ok(None)
    }
}

/// A recorder that panics when a metric diverges from its expected per-tick values.
///
/// Intended for tests.
pub struct AssertionF64Recorder {
    meta: RecorderMeta,
    metric: MetricF64,
    expected_values: Array1<f64>,
    ulps: i64,
    epsilon: f64,
}

impl AssertionF64Recorder {
    pub fn new(
        name: &str,
        metric: MetricF64,
        expected_values: Array1<f64>,
        ulps: Option<i64>,
        epsilon: Option<f64>,
    ) -> Self {
        Self {
            meta: RecorderMeta::new(name),
            metric,
            expected_values,
            ulps: ulps.unwrap_or(5),
            epsilon: epsilon.unwrap_or(1e-6),
        }
    }
}

impl Recorder for AssertionF64Recorder {
    fn meta(&self) -> &RecorderMeta {
        &self.meta
    }

    fn save(
        &self,
        timestep: &Timestep,
        network: &Network,
        state: &NetworkState,
        _internal_state: &mut Option<Box<dyn RecorderInternalState>>,
    ) -> Result<(), RecorderSaveError> {
        let expected_value = match self.expected_values.get(timestep.index) {
            Some(v) => *v,
            None => panic!("Simulation produced results out of range."),
        };

        let actual_value = self.metric.get_value(network, state)?;

        if !actual_value.approx_eq(
            expected_value,
            F64Margin {
                epsilon: self.epsilon,
                ulps: self.ulps,
            },
        ) {
            panic!(
                r#"assertion failed: (actual approx_eq expected)
recorder: `{}`
tick: `{}`
actual: `{:?}`
expected: `{:?}`"#,
                self.meta.name, timestep.index, actual_value, expected_value
            )
        }

        Ok(())
    }
}

/// A recorder that panics when a metric diverges from an expected function of the
/// tick.
///
/// Intended for tests.
pub struct AssertionFnRecorder<F> {
    meta: RecorderMeta,
    metric: MetricF64,
    expected_func: F,
    ulps: i64,
    epsilon: f64,
}

impl<F> AssertionFnRecorder<F>
where
    F: Fn(&Timestep) -> f64,
{
    pub fn new(
        name: &str,
        metric: MetricF64,
        expected_func: F,
        ulps: Option<i64>,
        epsilon: Option<f64>,
    ) -> Self {
        Self {
            meta: RecorderMeta::new(name),
            metric,
            expected_func,
            ulps: ulps.unwrap_or(5),
            epsilon: epsilon.unwrap_or(1e-6),
        }
    }
}

impl<F> Recorder for AssertionFnRecorder<F>
where
    F: Send + Sync + Fn(&Timestep) -> f64,
{
    fn meta(&self) -> &RecorderMeta {
        &self.meta
    }

    fn save(
        &self,
        timestep: &Timestep,
        network: &Network,
        state: &NetworkState,
        _internal_state: &mut Option<Box<dyn RecorderInternalState>>,
    ) -> Result<(), RecorderSaveError> {
        let expected_value = (self.expected_func)(timestep);
        let actual_value = self.metric.get_value(network, state)?;

        if !actual_value.approx_eq(
            expected_value,
            F64Margin {
                epsilon: self.epsilon,
                ulps: self.ulps,
            },
        ) {
            panic!(
                r#"assertion failed: (actual approx_eq expected)
recorder: `{}`
tick: `{}`
actual: `{:?}`
expected: `{:?}`"#,
                self.meta.name, timestep.index, actual_value, expected_value
            )
        }

        Ok(())
    }
}
