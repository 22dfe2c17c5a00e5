use std::path::{Path, PathBuf};

use pipeline_common::config::available_parallelism;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compressor::{Compressor, CompressorKind};
use crate::error::{AppError, Result};
use crate::sink::NamingMode;

const CONFIG_FILE: &str = "config.toml";
const APP_DIR: &str = "imgpress";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    pub kind: CompressorKind,
    /// Encoder executable; the preset's program name on `PATH` when unset.
    pub executable: Option<PathBuf>,
    /// 0-100, used by lossy presets.
    pub quality: u8,
    pub lossless: bool,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            kind: CompressorKind::default(),
            executable: None,
            quality: 75,
            lossless: false,
        }
    }
}

impl CompressorConfig {
    pub fn build(&self) -> Compressor {
        Compressor::new(self.kind, self.executable.clone(), self.quality, self.lossless)
    }
}

/// Application configuration, loaded from TOML and overridden by flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub input_extensions: Vec<String>,
    pub output_dir: PathBuf,
    pub output_extension: String,
    pub naming: NamingMode,
    pub compressor: CompressorConfig,
    /// Concurrent compressions; available parallelism when unset.
    pub max_parallelism: Option<usize>,
    /// Items waiting for a compression slot; parallelism + 1 when unset.
    pub bounded_capacity: Option<usize>,
    pub preserve_order: bool,
    pub skip_failed: bool,
    pub preview: bool,
    pub broadcast_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_extensions: vec!["jpg".to_string(), "jpeg".to_string()],
            output_dir: PathBuf::from("Optimized_Images"),
            output_extension: "jpg".to_string(),
            naming: NamingMode::default(),
            compressor: CompressorConfig::default(),
            max_parallelism: None,
            bounded_capacity: None,
            preserve_order: false,
            skip_failed: false,
            preview: true,
            broadcast_capacity: 4,
        }
    }
}

impl AppConfig {
    /// Default location: `<config_dir>/imgpress/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`, or from the default location if it exists.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => {
                    debug!("No configuration file, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|e| {
            AppError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn parallelism(&self) -> usize {
        self.max_parallelism.unwrap_or_else(available_parallelism)
    }

    pub fn capacity(&self) -> usize {
        self.bounded_capacity
            .unwrap_or_else(|| self.parallelism() + 1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.compressor.quality > 100 {
            return Err(AppError::InvalidConfig(format!(
                "quality must be between 0 and 100, got {}",
                self.compressor.quality
            )));
        }
        if self.max_parallelism == Some(0) {
            return Err(AppError::InvalidConfig("max_parallelism must be at least 1".into()));
        }
        if self.bounded_capacity == Some(0) {
            return Err(AppError::InvalidConfig("bounded_capacity must be at least 1".into()));
        }
        if self.broadcast_capacity == 0 {
            return Err(AppError::InvalidConfig("broadcast_capacity must be at least 1".into()));
        }
        if self.input_extensions.is_empty() {
            return Err(AppError::InvalidConfig("input_extensions must not be empty".into()));
        }
        if self.output_extension.is_empty() {
            return Err(AppError::InvalidConfig("output_extension must not be empty".into()));
        }
        Ok(())
    }
}
