use std::process;
use std::sync::Arc;

use clap::Parser;
use imgpress::batch::{Batch, BatchOptions};
use imgpress::cli::{Args, Commands, RunArgs};
use imgpress::config::AppConfig;
use imgpress::error::Result;
use imgpress::logging::init_logging;
use imgpress::preview::Preview;
use indicatif::{ProgressBar, ProgressStyle};
use pipeline_common::PipelineContext;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let _log_guard = init_logging(args.verbose, args.quiet, args.log_dir.as_deref())?;
    let mut config = AppConfig::load(args.config.as_deref())?;

    match args.command {
        Commands::Config { show } => {
            if show {
                print!("{}", config.to_toml()?);
            } else if let Some(path) = AppConfig::default_path() {
                println!("{}", path.display());
            }
            Ok(())
        }
        Commands::Run(run_args) => {
            run_args.apply(&mut config);
            compress(run_args, config, args.quiet).await
        }
    }
}

fn progress_bar(len: usize, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(len as u64);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {wide_msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar
}

async fn compress(run_args: RunArgs, config: AppConfig, quiet: bool) -> Result<()> {
    let options = BatchOptions::from_config(&run_args.input, &config)?;
    let batch = Batch::plan(options).await?;
    if batch.is_empty() {
        warn!(input = %batch.input_dir().display(), "No images found");
        return Ok(());
    }

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling batch");
            signal_token.cancel();
        }
    });

    let bar = progress_bar(batch.len(), config.preview && !quiet);
    let on_preview = {
        let bar = bar.clone();
        move |preview: Preview| {
            debug!(
                seq = ?preview.seq,
                name = %preview.name,
                dimensions = ?preview.dimensions,
                compressed_len = preview.compressed_len,
                ratio = preview.ratio(),
                "Preview ready"
            );
            bar.set_message(preview.name);
            bar.inc(1);
        }
    };

    let context = Arc::new(PipelineContext::with_name("imgpress", token));
    let result = batch.run(context, on_preview).await;
    bar.finish_and_clear();
    let summary = result?;

    let status = if summary.cancelled() { "cancelled" } else { "done" };
    println!(
        "{status}: {}/{} images written to {} ({} failed, {} previews)",
        summary.written,
        summary.discovered,
        summary.output_dir.display(),
        summary.failed,
        summary.previews
    );
    Ok(())
}
