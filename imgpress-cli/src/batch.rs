//! # Batch
//!
//! Wires the compression DAG and runs it over one input directory:
//!
//! ```text
//! source -> compress --broadcast--> save
//!                              \--> prepare -> display (presenter)
//! ```
//!
//! `compress` is the bounded, parallel stage. `display` preserves order so
//! previews are presented in the order `prepare` received them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipeline_common::{
    FaultPolicy, LinkOptions, Output, Pipeline, PipelineContext, RunReport, StageConfig, Target,
};
use tracing::info;

use crate::compressor::Compressor;
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::item::WorkItem;
use crate::preview::Preview;
use crate::presenter::Presenter;
use crate::sink::{DiskSink, NamingMode};
use crate::source::{list_images, read_images};

pub const COMPRESS_STAGE: &str = "compress";
pub const SAVE_STAGE: &str = "save";
pub const PREPARE_STAGE: &str = "prepare";
pub const DISPLAY_STAGE: &str = "display";

/// Resolved settings for one batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input_dir: PathBuf,
    pub input_extensions: Vec<String>,
    pub output_dir: PathBuf,
    pub output_extension: String,
    pub naming: NamingMode,
    pub compressor: Compressor,
    pub max_parallelism: usize,
    pub bounded_capacity: usize,
    pub preserve_order: bool,
    pub skip_failed: bool,
    pub preview: bool,
    pub broadcast_capacity: usize,
}

impl BatchOptions {
    pub fn from_config(input_dir: impl Into<PathBuf>, config: &AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            input_dir: input_dir.into(),
            input_extensions: config.input_extensions.clone(),
            output_dir: config.output_dir.clone(),
            output_extension: config.output_extension.clone(),
            naming: config.naming,
            compressor: config.compressor.build(),
            max_parallelism: config.parallelism(),
            bounded_capacity: config.capacity(),
            preserve_order: config.preserve_order,
            skip_failed: config.skip_failed,
            preview: config.preview,
            broadcast_capacity: config.broadcast_capacity,
        })
    }

    fn compress_config(&self) -> StageConfig {
        StageConfig::new()
            .max_parallelism(self.max_parallelism)
            .bounded(self.bounded_capacity)
            .preserve_order(self.preserve_order)
            .fault_policy(if self.skip_failed {
                FaultPolicy::SkipItem
            } else {
                FaultPolicy::Fatal
            })
    }
}

#[derive(Debug, Clone)]
pub struct BatchSummary {
    /// Images found in the input directory.
    pub discovered: usize,
    pub written: u64,
    /// Items the compressor failed on and that were skipped.
    pub failed: u64,
    pub previews: u64,
    pub output_dir: PathBuf,
    pub report: RunReport,
}

impl BatchSummary {
    pub fn cancelled(&self) -> bool {
        self.report.cancelled
    }
}

/// A batch whose inputs have been listed but not yet read.
pub struct Batch {
    options: BatchOptions,
    inputs: Vec<PathBuf>,
}

impl Batch {
    pub async fn plan(options: BatchOptions) -> Result<Self> {
        if !options.input_dir.is_dir() {
            return Err(AppError::InvalidInput(format!(
                "{} is not a directory",
                options.input_dir.display()
            )));
        }
        let inputs = list_images(&options.input_dir, &options.input_extensions).await?;
        Ok(Self { options, inputs })
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn input_dir(&self) -> &Path {
        &self.options.input_dir
    }

    /// Run the batch under `context`, handing each preview to `on_preview`
    /// on the presenter thread.
    pub async fn run<F>(self, context: Arc<PipelineContext>, on_preview: F) -> Result<BatchSummary>
    where
        F: FnMut(Preview) + Send + 'static,
    {
        let Batch { options, inputs } = self;
        let discovered = inputs.len();

        let sink = Arc::new(
            DiskSink::create(&options.output_dir, &options.output_extension, options.naming)
                .await?,
        );
        let presenter = if options.preview {
            Some(Presenter::spawn(on_preview)?)
        } else {
            None
        };

        let mut pipeline = Pipeline::new(context.clone());

        // Sinks first.
        let save = pipeline.add_sink(
            SAVE_STAGE,
            StageConfig::new()
                .max_parallelism(options.max_parallelism)
                .bounded(options.bounded_capacity),
            move |item: WorkItem| {
                let sink = sink.clone();
                async move { sink.write(&item).await.map(drop) }
            },
        )?;

        let output: Output<WorkItem> = match &presenter {
            Some(presenter) => {
                let handle = presenter.handle();
                let display = pipeline.add_sink(
                    DISPLAY_STAGE,
                    StageConfig::new()
                        .preserve_order(true)
                        .bounded(options.bounded_capacity),
                    move |preview: Preview| {
                        let handle = handle.clone();
                        async move { handle.present(preview).await }
                    },
                )?;
                let to_display = pipeline.link(display, LinkOptions::propagate());
                let prepare = pipeline.add_stage(
                    PREPARE_STAGE,
                    StageConfig::new()
                        .preserve_order(true)
                        .bounded(options.bounded_capacity),
                    |item: WorkItem| async move {
                        Ok::<_, std::convert::Infallible>(Preview::prepare(item))
                    },
                    to_display,
                )?;
                let targets: Vec<Arc<dyn Target<WorkItem>>> =
                    vec![save as Arc<dyn Target<WorkItem>>, prepare];
                pipeline
                    .broadcast(
                        "results",
                        targets,
                        options.broadcast_capacity,
                        LinkOptions::propagate(),
                    )
                    .into()
            }
            None => pipeline.link(save, LinkOptions::propagate()).into(),
        };

        let compressor = Arc::new(options.compressor.clone());
        let token = context.token.clone();
        let head = pipeline.add_stage(
            COMPRESS_STAGE,
            options.compress_config(),
            move |item: WorkItem| {
                let compressor = compressor.clone();
                let token = token.clone();
                async move { compressor.compress(item, &token).await }
            },
            output,
        )?;

        info!(
            input = %options.input_dir.display(),
            output = %options.output_dir.display(),
            images = discovered,
            parallelism = options.max_parallelism,
            capacity = options.bounded_capacity,
            preserve_order = options.preserve_order,
            "Starting batch"
        );
        let result = pipeline.run(head, read_images(inputs)).await;

        let previews = match presenter {
            Some(presenter) => tokio::task::spawn_blocking(move || presenter.shutdown())
                .await
                .map_err(|e| AppError::Presenter(e.to_string()))?,
            None => 0,
        };
        let report = result?;

        let written = report.stage(SAVE_STAGE).map_or(0, |s| s.processed);
        let failed = report.stage(COMPRESS_STAGE).map_or(0, |s| s.skipped);
        info!(
            written,
            failed,
            previews,
            cancelled = report.cancelled,
            "Batch finished"
        );

        Ok(BatchSummary {
            discovered,
            written,
            failed,
            previews,
            output_dir: options.output_dir,
            report,
        })
    }
}
