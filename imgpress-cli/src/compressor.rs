//! Encoder presets and the compression transform.

use std::path::PathBuf;

use process_utils::{PriorityHint, ProcessInvocation, TransducerError, transduce};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::item::WorkItem;

/// Supported external encoders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CompressorKind {
    /// jpegoptim; lossy with `-m{quality}`, lossless otherwise.
    #[default]
    Jpegoptim,
    /// MozJPEG `cjpeg`, lossy.
    Cjpeg,
    /// MozJPEG `jpegtran`, lossless.
    Jpegtran,
}

impl CompressorKind {
    pub fn program(self) -> &'static str {
        match self {
            CompressorKind::Jpegoptim => "jpegoptim",
            CompressorKind::Cjpeg => "cjpeg",
            CompressorKind::Jpegtran => "jpegtran",
        }
    }

    /// Argument list for `quality`. Presets without a lossy mode ignore it.
    pub fn args(self, quality: u8, lossless: bool) -> Vec<String> {
        match self {
            CompressorKind::Jpegoptim => {
                let mut args = Vec::with_capacity(5);
                if !lossless {
                    args.push(format!("-m{quality}"));
                }
                args.extend(
                    ["--strip-all", "--all-progressive", "--stdin", "--stdout"]
                        .map(String::from),
                );
                args
            }
            CompressorKind::Cjpeg => vec!["-quality".to_string(), quality.to_string()],
            CompressorKind::Jpegtran => ["-copy", "none", "-optimize", "-progressive"]
                .map(String::from)
                .to_vec(),
        }
    }

    pub fn priority(self) -> PriorityHint {
        match self {
            CompressorKind::Jpegoptim => PriorityHint::BelowNormal,
            CompressorKind::Cjpeg | CompressorKind::Jpegtran => PriorityHint::AboveNormal,
        }
    }
}

/// Runs one external encoder over work items.
#[derive(Debug, Clone)]
pub struct Compressor {
    invocation: ProcessInvocation,
}

impl Compressor {
    /// Build a preset invocation. `executable` overrides the program looked
    /// up through `PATH`.
    pub fn new(kind: CompressorKind, executable: Option<PathBuf>, quality: u8, lossless: bool) -> Self {
        let program = executable.unwrap_or_else(|| PathBuf::from(kind.program()));
        Self {
            invocation: ProcessInvocation::new(program)
                .args(kind.args(quality, lossless))
                .priority(kind.priority()),
        }
    }

    /// Use an arbitrary filter program.
    pub fn from_invocation(invocation: ProcessInvocation) -> Self {
        Self { invocation }
    }

    pub fn invocation(&self) -> &ProcessInvocation {
        &self.invocation
    }

    pub async fn compress(
        &self,
        item: WorkItem,
        token: &CancellationToken,
    ) -> Result<WorkItem, TransducerError> {
        let output = transduce(&self.invocation, &item.data, token).await?;
        debug!(
            seq = ?item.seq,
            name = %item.name,
            source_len = item.source_len,
            output_len = output.len(),
            "Compressed"
        );
        Ok(item.with_data(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(CompressorKind::Jpegoptim, 75, false, &["-m75", "--strip-all", "--all-progressive", "--stdin", "--stdout"])]
    #[case(CompressorKind::Jpegoptim, 75, true, &["--strip-all", "--all-progressive", "--stdin", "--stdout"])]
    #[case(CompressorKind::Cjpeg, 60, false, &["-quality", "60"])]
    #[case(CompressorKind::Jpegtran, 60, false, &["-copy", "none", "-optimize", "-progressive"])]
    fn preset_arguments(
        #[case] kind: CompressorKind,
        #[case] quality: u8,
        #[case] lossless: bool,
        #[case] expected: &[&str],
    ) {
        assert_eq!(kind.args(quality, lossless), expected);
    }

    #[test]
    fn executable_override_keeps_preset_arguments() {
        let compressor = Compressor::new(
            CompressorKind::Cjpeg,
            Some(PathBuf::from("/opt/mozjpeg/bin/cjpeg")),
            80,
            false,
        );
        let invocation = compressor.invocation();
        assert_eq!(invocation.program, PathBuf::from("/opt/mozjpeg/bin/cjpeg"));
        assert_eq!(invocation.args, vec!["-quality", "80"]);
        assert_eq!(invocation.priority, PriorityHint::AboveNormal);
    }

    #[test]
    fn default_program_is_resolved_through_path() {
        let compressor = Compressor::new(CompressorKind::Jpegoptim, None, 75, false);
        assert_eq!(compressor.invocation().program, PathBuf::from("jpegoptim"));
        assert_eq!(compressor.invocation().priority, PriorityHint::BelowNormal);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn compress_replaces_payload() {
        let compressor = Compressor::from_invocation(
            ProcessInvocation::new("sh").args(["-c", "head -c 3"]),
        );
        let item = WorkItem::new("a.jpg", b"abcdef".to_vec()).with_seq(0);
        let out = compressor
            .compress(item, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(&out.data[..], b"abc");
        assert_eq!(out.source_len, 6);
        assert_eq!(out.seq, Some(0));
    }
}
