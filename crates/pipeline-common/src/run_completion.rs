use std::sync::Arc;

use crate::stage::StageHandle;
use crate::{BoxError, PipelineContext, PipelineError};

/// Lifecycle state of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Running,
    /// Drained after its input completed normally.
    Completed,
    /// Drained after the run was cancelled.
    Cancelled,
    /// A transform failed under [`crate::FaultPolicy::Fatal`].
    Faulted,
}

/// Counters and final state of one stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: &'static str,
    pub state: StageState,
    /// Items accepted by `submit`.
    pub admitted: u64,
    /// Executions that returned a result.
    pub processed: u64,
    /// Failed items dropped under [`crate::FaultPolicy::SkipItem`].
    pub skipped: u64,
    /// Items or results discarded on cancellation or downstream rejection.
    pub dropped: u64,
}

/// The error that faulted a stage, shareable between every waiter of the run.
#[derive(Debug, Clone)]
pub struct StageFault {
    pub stage: &'static str,
    pub source: Arc<dyn std::error::Error + Send + Sync>,
}

impl StageFault {
    pub fn new(stage: &'static str, source: impl Into<BoxError>) -> Self {
        Self {
            stage,
            source: Arc::from(source.into()),
        }
    }
}

/// Wait for every stage to drain and resolve the run outcome deterministically.
///
/// Semantics:
/// - Every stage is awaited, even after a fault, so no task outlives the run.
/// - If any stage faulted, return the first fault recorded in `context`.
/// - A stage whose task vanished without a final state counts as a fault.
/// - Cancellation alone is not an error.
pub async fn settle_stages(
    stages: Vec<StageHandle>,
    context: &PipelineContext,
) -> Result<Vec<StageReport>, PipelineError> {
    let mut reports = Vec::with_capacity(stages.len());
    for stage in stages {
        let report = stage.drain().await;
        if report.state == StageState::Faulted && context.first_fault().is_none() {
            context.fault(StageFault::new(
                report.name,
                std::io::Error::other("stage task terminated unexpectedly"),
            ));
        }
        reports.push(report);
    }

    match context.first_fault() {
        Some(fault) => Err(fault.into()),
        None => Ok(reports),
    }
}
