//! Input enumeration.

use std::io;
use std::path::{Path, PathBuf};

use futures::{Stream, StreamExt, stream};
use tracing::debug;

use crate::item::WorkItem;

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

/// Files directly inside `dir` whose extension matches, sorted by file name.
pub async fn list_images(dir: &Path, extensions: &[String]) -> io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        if has_extension(&path, extensions) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!(dir = %dir.display(), count = paths.len(), "Listed input images");
    Ok(paths)
}

/// Read `paths` lazily, one file per poll, tagging each with its position.
pub fn read_images(paths: Vec<PathBuf>) -> impl Stream<Item = io::Result<WorkItem>> {
    stream::iter(paths.into_iter().enumerate()).then(|(seq, path)| async move {
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| io::Error::new(e.kind(), format!("{}: {e}", path.display())))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(WorkItem::new(name, data).with_seq(seq as u64))
    })
}
