type TimestepIndex = usize;

/// A single discrete simulation step.
///
/// Time is measured in abstract ticks; any wall-clock pacing between ticks is the
/// driver's concern.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Timestep {
    pub index: TimestepIndex,
}

impl Timestep {
    pub fn new(index: TimestepIndex) -> Self {
        Self { index }
    }

    pub fn is_first(&self) -> bool {
        self.index == 0
    }
}

/// Generates the bounded tick range a model is simulated over.
#[derive(Debug)]
pub struct Timestepper {
    num_ticks: usize,
}

impl Timestepper {
    pub fn new(num_ticks: usize) -> Self {
        Self { num_ticks }
    }

    /// Create a vector of `Timestep`s covering the configured range.
    fn timesteps(&self) -> Vec<Timestep> {
        (0..self.num_ticks).map(Timestep::new).collect()
    }
}

/// The time domain that a model will be simulated over.
#[derive(Debug)]
pub struct TimeDomain {
    timesteps: Vec<Timestep>,
}

impl TimeDomain {
    pub fn timesteps(&self) -> &[Timestep] {
        &self.timesteps
    }

    /// The total number of time-steps in the domain.
    pub fn len(&self) -> usize {
        self.timesteps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timesteps.is_empty()
    }
}

impl From<Timestepper> for TimeDomain {
    fn from(value: Timestepper) -> Self {
        Self {
            timesteps: value.timesteps(),
        }
    }
}
