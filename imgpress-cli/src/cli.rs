use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::compressor::CompressorKind;
use crate::config::AppConfig;
use crate::sink::NamingMode;

#[derive(Parser, Debug)]
#[command(
    name = "imgpress",
    about = "Batch JPEG compressor driving external encoders",
    version
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (default: <config_dir>/imgpress/config.toml)
    #[arg(short, long, global = true, env = "IMGPRESS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Compress every image in a directory
    Run(RunArgs),

    /// Inspect the effective configuration
    Config {
        /// Print the configuration as TOML
        #[arg(long)]
        show: bool,
    },
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Directory containing the images to compress
    #[arg(short, long, value_name = "DIR")]
    pub input: PathBuf,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Encoder preset
    #[arg(long, value_enum)]
    pub compressor: Option<CompressorKind>,

    /// Encoder executable, if not on PATH
    #[arg(long, value_name = "PATH", env = "IMGPRESS_COMPRESSOR")]
    pub executable: Option<PathBuf>,

    /// Quality for lossy presets (0-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub quality: Option<u8>,

    /// Use the preset's lossless mode
    #[arg(long)]
    pub lossless: bool,

    /// Concurrent compressions
    #[arg(short = 'j', long)]
    pub parallelism: Option<usize>,

    /// Images waiting for a compression slot
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Emit results in input order
    #[arg(long)]
    pub preserve_order: bool,

    /// Skip images the encoder fails on instead of aborting
    #[arg(long)]
    pub skip_failed: bool,

    /// Do not present previews
    #[arg(long)]
    pub no_preview: bool,

    /// How output files are numbered
    #[arg(long, value_enum)]
    pub naming: Option<NamingMode>,
}

impl RunArgs {
    /// Flags set on the command line win over file values.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(kind) = self.compressor {
            config.compressor.kind = kind;
        }
        if let Some(executable) = &self.executable {
            config.compressor.executable = Some(executable.clone());
        }
        if let Some(quality) = self.quality {
            config.compressor.quality = quality;
        }
        if self.lossless {
            config.compressor.lossless = true;
        }
        if let Some(parallelism) = self.parallelism {
            config.max_parallelism = Some(parallelism);
        }
        if let Some(capacity) = self.capacity {
            config.bounded_capacity = Some(capacity);
        }
        if self.preserve_order {
            config.preserve_order = true;
        }
        if self.skip_failed {
            config.skip_failed = true;
        }
        if self.no_preview {
            config.preview = false;
        }
        if let Some(naming) = self.naming {
            config.naming = naming;
        }
    }
}
