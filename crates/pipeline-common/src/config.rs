//! Stage configuration.

use crate::PipelineError;

/// Queue capacity of a stage, counting items admitted but not yet executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    Bounded(usize),
    Unbounded,
}

/// What a stage does when a transform returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Fault the stage, cancel the run and surface the error.
    #[default]
    Fatal,
    /// Log the failure, drop the item and keep going.
    SkipItem,
}

/// Execution options for one stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    pub max_parallelism: usize,
    pub capacity: Capacity,
    pub preserve_order: bool,
    pub fault_policy: FaultPolicy,
}

/// Number of processing units, falling back to 1 when it cannot be queried.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for StageConfig {
    /// Single execution, unbounded queue, unordered, fatal on error.
    fn default() -> Self {
        Self {
            max_parallelism: 1,
            capacity: Capacity::Unbounded,
            preserve_order: false,
            fault_policy: FaultPolicy::Fatal,
        }
    }
}

impl StageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    pub fn bounded(mut self, capacity: usize) -> Self {
        self.capacity = Capacity::Bounded(capacity);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.capacity = Capacity::Unbounded;
        self
    }

    pub fn preserve_order(mut self, preserve_order: bool) -> Self {
        self.preserve_order = preserve_order;
        self
    }

    pub fn fault_policy(mut self, fault_policy: FaultPolicy) -> Self {
        self.fault_policy = fault_policy;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_parallelism == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_parallelism must be at least 1".to_string(),
            ));
        }
        if self.capacity == Capacity::Bounded(0) {
            return Err(PipelineError::InvalidConfig(
                "bounded capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
