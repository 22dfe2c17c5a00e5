//! Library target for the `imgpress` package.
//!
//! The primary deliverable is the `imgpress` binary (`src/main.rs`). The
//! modules are exposed so the batch can be driven from integration tests or
//! embedded with a custom preview callback.

pub mod batch;
pub mod cli;
pub mod compressor;
pub mod config;
pub mod error;
pub mod item;
pub mod logging;
pub mod presenter;
pub mod preview;
pub mod sink;
pub mod source;

pub use batch::{Batch, BatchOptions, BatchSummary};
pub use compressor::{Compressor, CompressorKind};
pub use config::AppConfig;
pub use error::{AppError, Result};
pub use item::WorkItem;
pub use preview::Preview;
pub use sink::NamingMode;
