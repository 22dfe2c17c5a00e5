//! # Pipeline
//!
//! Assembles stages into a DAG sharing one [`PipelineContext`], feeds the
//! head stage from a source stream and settles the run.
//!
//! ## Usage
//!
//! Declare the DAG sinks first: build the terminal stages, then the links and
//! broadcasts pointing at them, then the stages feeding those links. Finally
//! call [`Pipeline::run`] with the head stage and a source stream.
//!

use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::broadcast::Broadcast;
use crate::cancellation::or_cancelled;
use crate::config::StageConfig;
use crate::link::{Link, LinkOptions, Output};
use crate::run_completion::{StageFault, StageReport, settle_stages};
use crate::stage::{Stage, StageHandle, Target};
use crate::{BoxError, PipelineContext, PipelineError};

/// Stage name used when the source stream itself fails.
pub const SOURCE_STAGE: &str = "source";

/// Outcome of a run that did not fault.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Items the head stage admitted from the source.
    pub ingested: u64,
    /// Whether the run's scope was cancelled before every stage drained.
    pub cancelled: bool,
    pub stages: Vec<StageReport>,
}

impl RunReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }
}

/// A DAG of stages sharing one cancellation scope.
pub struct Pipeline {
    context: Arc<PipelineContext>,
    stages: Vec<StageHandle>,
}

impl Pipeline {
    /// Create an empty pipeline with the given context.
    pub fn new(context: Arc<PipelineContext>) -> Self {
        Self {
            context,
            stages: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.context
    }

    /// Spawn a stage that is part of this pipeline's completion.
    pub fn add_stage<I, O, F, Fut, E>(
        &mut self,
        name: &'static str,
        config: StageConfig,
        transform: F,
        output: impl Into<Output<O>>,
    ) -> Result<Arc<Stage<I>>, PipelineError>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let stage = Stage::spawn(
            name,
            config,
            self.context.clone(),
            transform,
            output.into(),
        )?;
        self.stages.push(stage.handle());
        Ok(stage)
    }

    /// Spawn a terminal stage whose results are discarded.
    pub fn add_sink<I, F, Fut, E>(
        &mut self,
        name: &'static str,
        config: StageConfig,
        action: F,
    ) -> Result<Arc<Stage<I>>, PipelineError>
    where
        I: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        self.add_stage(name, config, action, Output::<()>::Discard)
    }

    /// Link to a single downstream stage.
    pub fn link<T>(&self, target: Arc<Stage<T>>, options: LinkOptions) -> Link<T>
    where
        T: Send + 'static,
    {
        Link::new(target, options)
    }

    /// Fan out to `targets`, each behind a lane of `lane_capacity` items.
    pub fn broadcast<T>(
        &self,
        name: &'static str,
        targets: Vec<Arc<dyn Target<T>>>,
        lane_capacity: usize,
        options: LinkOptions,
    ) -> Broadcast<T>
    where
        T: Clone + Send + 'static,
    {
        Broadcast::new(name, self.context.clone(), targets, lane_capacity, options)
    }

    /// Feed `source` into `head`, complete it, and wait for every stage.
    ///
    /// Ingestion stops at the first rejected submit (the run was cancelled or
    /// faulted); the rest of the source is not read. A source error cancels
    /// the run and is reported as a fault of the `source` stage.
    pub async fn run<I, S, E>(self, head: Arc<Stage<I>>, source: S) -> Result<RunReport, PipelineError>
    where
        I: Send + 'static,
        S: Stream<Item = Result<I, E>>,
        E: Into<BoxError>,
    {
        let token = self.context.token.clone();
        let mut source = std::pin::pin!(source);
        let mut ingested: u64 = 0;

        loop {
            let next = match or_cancelled(&token, source.next()).await {
                Some(Some(next)) => next,
                Some(None) => break,
                None => {
                    debug!(pipeline = %self.context.name, "Ingestion cancelled");
                    break;
                }
            };
            match next {
                Ok(item) => match head.submit(item).await {
                    Ok(()) => ingested += 1,
                    Err(rejected) => {
                        info!(pipeline = %self.context.name, ingested, reason = %rejected, "Stopped feeding source");
                        break;
                    }
                },
                Err(e) => {
                    self.context.fault(StageFault::new(SOURCE_STAGE, e));
                    break;
                }
            }
        }
        head.complete();
        debug!(pipeline = %self.context.name, ingested, "Source exhausted");

        let mut report = self.completion().await?;
        report.ingested = ingested;
        Ok(report)
    }

    /// Resolve once every stage has drained.
    ///
    /// Use directly when the caller drives the head stage itself.
    pub async fn completion(self) -> Result<RunReport, PipelineError> {
        let stages = settle_stages(self.stages, &self.context).await?;
        let cancelled = self.context.is_cancelled();
        info!(pipeline = %self.context.name, cancelled, "Pipeline finished");
        Ok(RunReport {
            ingested: 0,
            cancelled,
            stages,
        })
    }
}
