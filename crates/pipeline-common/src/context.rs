//! Pipeline run context
//!
//! This module provides the context shared by every stage of one run: the
//! run name, the cancellation scope and the slot recording the first fault.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::error;

use crate::cancellation::CancellationToken;
use crate::run_completion::StageFault;

/// Shared context for a pipeline run
///
/// Every stage holds an `Arc` to the same context. Cancelling the token stops
/// admission everywhere; the first stage to fault records its error here and
/// cancels the token.
#[derive(Debug)]
pub struct PipelineContext {
    /// Name of the run, used in log output
    pub name: String,
    /// The cancellation token
    pub token: CancellationToken,
    first_fault: Mutex<Option<StageFault>>,
}

impl PipelineContext {
    /// Create a new PipelineContext with the specified token
    pub fn new(token: CancellationToken) -> Self {
        Self {
            name: "DefaultPipeline".to_string(),
            token,
            first_fault: Mutex::new(None),
        }
    }

    pub fn arc_new(token: CancellationToken) -> Arc<Self> {
        Arc::new(Self::new(token))
    }

    pub fn with_name(name: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            name: name.into(),
            ..Self::new(token)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Record a stage fault and cancel the run.
    ///
    /// Only the first fault is kept; later ones are logged and discarded.
    pub fn fault(&self, fault: StageFault) {
        {
            let mut slot = self.first_fault.lock();
            if slot.is_none() {
                error!(pipeline = %self.name, stage = fault.stage, error = %fault.source, "Stage faulted, cancelling pipeline");
                *slot = Some(fault);
            } else {
                error!(pipeline = %self.name, stage = fault.stage, error = %fault.source, "Additional stage fault after cancellation");
            }
        }
        self.token.cancel();
    }

    /// The first fault recorded in this run, if any.
    pub fn first_fault(&self) -> Option<StageFault> {
        self.first_fault.lock().clone()
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}
