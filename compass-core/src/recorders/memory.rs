use crate::agg_funcs::AggFuncF64;
use crate::metric::MetricF64;
use crate::network::Network;
use crate::recorders::{
    downcast_internal_state, downcast_internal_state_mut, Recorder, RecorderAggregationError,
    RecorderFinalResult, RecorderFinaliseError, RecorderInternalState, RecorderMeta,
    RecorderSaveError,
};
use crate::state::NetworkState;
use crate::timestep::{TimeDomain, Timestep};
use ndarray::{Array, Array1};

/// A recorder that saves a metric's value for every tick into memory.
///
/// The series is returned as the recorder's final result, optionally reducible to a
/// scalar with an aggregation function.
pub struct MemoryRecorder {
    meta: RecorderMeta,
    metric: MetricF64,
    aggregation: Option<AggFuncF64>,
}

impl MemoryRecorder {
    pub fn new(name: &str, metric: MetricF64, aggregation: Option<AggFuncF64>) -> Self {
        Self {
            meta: RecorderMeta::new(name),
            metric,
            aggregation,
        }
    }
}

impl Recorder for MemoryRecorder {
    fn meta(&self) -> &RecorderMeta {
        &self.meta
    }

    fn setup(
        &self,
        domain: &TimeDomain,
        _network: &Network,
    ) -> Option<Box<dyn RecorderInternalState>> {
        let array: Array1<f64> = Array::zeros(domain.len());
        Some(Box::new(array))
    }

    fn save(
        &self,
        timestep: &Timestep,
        network: &Network,
        state: &NetworkState,
        internal_state: &mut Option<Box<dyn RecorderInternalState>>,
    ) -> Result<(), RecorderSaveError> {
        let array = downcast_internal_state_mut::<Array1<f64>>(internal_state);

        let value = self.metric.get_value(network, state)?;
        // This panics if out-of-bounds
        array[timestep.index] = value;

        Ok(())
    }

    fn finalise(
        &self,
        _network: &Network,
        internal_state: Option<Box<dyn RecorderInternalState>>,
    ) -> Result<Option<Box<dyn RecorderFinalResult>>, RecorderFinaliseError> {
        let array = downcast_internal_state::<Array1<f64>>(internal_state);

        Ok(Some(Box::new(TickSeries {
            values: *array,
            aggregation: self.aggregation,
        })))
    }
}

/// The per-tick values recorded by a [`MemoryRecorder`].
pub struct TickSeries {
    values: Array1<f64>,
    aggregation: Option<AggFuncF64>,
}

impl TickSeries {
    pub fn values(&self) -> &Array1<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl RecorderFinalResult for TickSeries {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn aggregated_value(&self) -> Result<f64, RecorderAggregationError> {
        let agg = self
            .aggregation
            .ok_or(RecorderAggregationError::RecorderDoesNotSupportAggregation)?;
        Ok(agg.calc_iter_f64(self.values.iter())?)
    }
}
