use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::error::{AppError, Result};

const LOG_FILE_PREFIX: &str = "imgpress.log";

fn filter(verbose: bool, quiet: bool) -> EnvFilter {
    if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    }
}

/// Install the global subscriber.
///
/// With `log_dir`, logs are also written to a daily rotated file; keep the
/// returned guard alive until exit so buffered lines are flushed.
pub fn init_logging(verbose: bool, quiet: bool, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let registry = tracing_subscriber::registry()
        .with(filter(verbose, quiet))
        .with(fmt::layer().with_target(false).with_level(verbose));

    let init_error = |e: tracing_subscriber::util::TryInitError| {
        AppError::InvalidConfig(format!("failed to install log subscriber: {e}"))
    };

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .map_err(init_error)?;
            Ok(Some(guard))
        }
        None => {
            registry.try_init().map_err(init_error)?;
            Ok(None)
        }
    }
}
