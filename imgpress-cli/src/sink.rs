//! Writes compressed images into the output directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::item::WorkItem;

/// How output files are numbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NamingMode {
    /// In the order results reach the sink.
    #[default]
    Arrival,
    /// By ingestion sequence, stable across runs.
    Ingestion,
}

/// Names every result `{n}.{ext}` with `n` starting at 1.
#[derive(Debug)]
pub struct DiskSink {
    dir: PathBuf,
    extension: String,
    naming: NamingMode,
    counter: AtomicU64,
}

impl DiskSink {
    /// Create the output directory if needed.
    pub async fn create(
        dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        naming: NamingMode,
    ) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            extension: extension.into(),
            naming,
            counter: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_for(&self, item: &WorkItem) -> u64 {
        match (self.naming, item.seq) {
            (NamingMode::Ingestion, Some(seq)) => seq + 1,
            _ => self.counter.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    pub fn path_for(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{index}.{}", self.extension))
    }

    /// Write `item` under its final name.
    ///
    /// Data goes to a `.part` file first and is renamed once complete, so the
    /// final name never refers to a truncated image.
    pub async fn write(&self, item: &WorkItem) -> io::Result<PathBuf> {
        let path = self.path_for(self.index_for(item));
        let mut partial = path.clone().into_os_string();
        partial.push(".part");

        tokio::fs::write(&partial, &item.data).await?;
        tokio::fs::rename(&partial, &path).await?;
        debug!(seq = ?item.seq, name = %item.name, path = %path.display(), bytes = item.data.len(), "Saved");
        Ok(path)
    }
}
