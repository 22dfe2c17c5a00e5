//! # Pipeline Common
//!
//! This crate provides the building blocks for staged, concurrent processing
//! pipelines. A pipeline is a small DAG of [`Stage`]s connected by [`Link`]s,
//! sharing a single cancellation scope.
//!
//! ## Features
//!
//! - Generic `Stage<T>` with bounded admission, parallel execution and optional
//!   order preservation
//! - `Link` and `Broadcast` edges with completion propagation
//! - `Pipeline` that drives ingestion from a source stream and settles the run
//! - Common error types and context sharing utilities
//!
//! ## License
//!
//! MIT License
//!
//! ## Authors
//!
//! - hua0512
//!

use std::sync::Arc;

use thiserror::Error;

pub mod broadcast;
pub mod cancellation;
pub mod config;
mod context;
pub mod link;
pub mod pipeline;
pub mod reorder;
mod run_completion;
pub mod stage;
#[cfg(test)]
pub(crate) mod test_utils;

/// Re-export key traits and types
pub use broadcast::Broadcast;
pub use cancellation::CancellationToken;
pub use config::{Capacity, FaultPolicy, StageConfig};
pub use context::PipelineContext;
pub use link::{Link, LinkOptions, Output};
pub use pipeline::{Pipeline, RunReport};
pub use reorder::ReorderBuffer;
pub use run_completion::{StageFault, StageReport, StageState, settle_stages};
pub use stage::{Stage, StageHandle, Target};

/// Boxed error produced by stage transforms.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Reason a stage refused an item.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRejected {
    #[error("stage `{0}` no longer accepts items")]
    Completed(&'static str),

    #[error("stage `{0}` rejected item: pipeline cancelled")]
    Cancelled(&'static str),
}

/// Common error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Rejected(#[from] AdmissionRejected),

    #[error("Invalid stage configuration: {0}")]
    InvalidConfig(String),

    #[error("Stage faulted ({stage}): {source}")]
    StageFaulted {
        stage: &'static str,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
}

impl From<StageFault> for PipelineError {
    fn from(fault: StageFault) -> Self {
        PipelineError::StageFaulted {
            stage: fault.stage,
            source: fault.source,
        }
    }
}
