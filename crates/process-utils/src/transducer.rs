//! Drive an external filter program as a `bytes -> bytes` function.
//!
//! The program is launched with all three standard streams piped and no
//! shell. Standard output and standard error are drained by their own tasks
//! before any input is written, so a program that starts producing output
//! before it has consumed its input can never deadlock the writer.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::filter_command;

/// Errors produced while running a filter program.
#[derive(Error, Debug)]
pub enum TransducerError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program exited with a nonzero code. `message` is its trimmed
    /// standard error, or `exit code N` when it wrote nothing there.
    #[error("{message}")]
    SubprocessFailure { exit_code: i32, message: String },

    /// The program's output ended before it consumed its input or reported
    /// success, e.g. it crashed or was killed.
    #[error("{program} terminated prematurely: {detail}")]
    PrematureTermination { program: String, detail: String },

    #[error("operation was cancelled")]
    Cancelled,
}

/// Scheduling hint for the child process.
///
/// Carried with the invocation and logged; the process priority itself is
/// left to the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriorityHint {
    BelowNormal,
    #[default]
    Normal,
    AboveNormal,
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub priority: PriorityHint,
}

impl ProcessInvocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            priority: PriorityHint::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn priority(mut self, priority: PriorityHint) -> Self {
        self.priority = priority;
        self
    }

    fn display_name(&self) -> String {
        self.program.display().to_string()
    }
}

/// Exit code and diagnostics of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Standard error, trimmed.
    pub stderr: String,
}

impl ProcessResult {
    pub fn new(exit_code: Option<i32>, stderr: &[u8]) -> Self {
        Self {
            exit_code,
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
    }

    fn from_status(status: ExitStatus, stderr: &[u8]) -> Self {
        Self::new(status.code(), stderr)
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Map the exit code to the transducer's error taxonomy.
    pub fn check(&self, program: &str) -> Result<(), TransducerError> {
        match self.exit_code {
            Some(0) => Ok(()),
            Some(code) => Err(TransducerError::SubprocessFailure {
                exit_code: code,
                message: if self.stderr.is_empty() {
                    format!("exit code {code}")
                } else {
                    self.stderr.clone()
                },
            }),
            None => Err(TransducerError::PrematureTermination {
                program: program.to_string(),
                detail: if self.stderr.is_empty() {
                    "terminated without an exit code".to_string()
                } else {
                    format!("terminated without an exit code: {}", self.stderr)
                },
            }),
        }
    }
}

type Drain = JoinHandle<std::io::Result<Vec<u8>>>;

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

/// Write as much of `input` as the program accepts, returning the byte count
/// alongside the first error.
async fn write_input<W: AsyncWrite + Unpin>(stdin: &mut W, input: &[u8]) -> (usize, std::io::Result<()>) {
    let mut written = 0;
    while written < input.len() {
        match stdin.write(&input[written..]).await {
            Ok(0) => {
                return (
                    written,
                    Err(std::io::Error::from(std::io::ErrorKind::WriteZero)),
                );
            }
            Ok(n) => written += n,
            Err(e) => return (written, Err(e)),
        }
    }
    (written, stdin.flush().await)
}

async fn join_drain(program: &str, drain: &mut Drain) -> Result<Vec<u8>, TransducerError> {
    let io_error = |source| TransducerError::Io {
        program: program.to_string(),
        source,
    };
    match drain.await {
        Ok(Ok(buf)) => Ok(buf),
        Ok(Err(e)) => Err(io_error(e)),
        Err(join_error) => Err(io_error(std::io::Error::other(format!(
            "stream drain failed: {join_error}"
        )))),
    }
}

/// A write error means the program stopped reading when the pipe broke or
/// when both output streams had already closed. Anything else is an I/O fault.
fn stopped_reading(kind: std::io::ErrorKind, drains_finished: bool) -> bool {
    drains_finished || kind == std::io::ErrorKind::BrokenPipe
}

async fn exchange<W: AsyncWrite + Unpin>(
    program: &str,
    child: &mut Child,
    mut stdin: W,
    input: &[u8],
    stdout_drain: &mut Drain,
    stderr_drain: &mut Drain,
) -> Result<Vec<u8>, TransducerError> {
    let (written, write_result) = write_input(&mut stdin, input).await;
    // Closing stdin signals end of input.
    drop(stdin);

    let mut unread = None;
    if let Err(e) = write_result {
        let drains_finished = stdout_drain.is_finished() && stderr_drain.is_finished();
        if stopped_reading(e.kind(), drains_finished) {
            // Not an I/O fault; a clean exit is still premature below.
            debug!(program, written, total = input.len(), error = %e, "Program stopped reading input");
            unread = Some(e);
        } else {
            // Let the output drain settle before reporting.
            let _ = (&mut *stdout_drain).await;
            return Err(TransducerError::Io {
                program: program.to_string(),
                source: e,
            });
        }
    }

    let output = join_drain(program, stdout_drain).await?;
    let stderr = join_drain(program, stderr_drain).await?;
    let status = child.wait().await.map_err(|source| TransducerError::Io {
        program: program.to_string(),
        source,
    })?;

    let result = ProcessResult::from_status(status, &stderr);
    debug!(
        program,
        exit_code = ?result.exit_code,
        input_len = input.len(),
        written,
        output_len = output.len(),
        "Filter exited"
    );
    result.check(program)?;

    if let Some(e) = unread {
        return Err(TransducerError::PrematureTermination {
            program: program.to_string(),
            detail: format!(
                "stopped reading after {written} of {} input bytes ({e})",
                input.len()
            ),
        });
    }
    if !input.is_empty() && output.is_empty() {
        return Err(TransducerError::PrematureTermination {
            program: program.to_string(),
            detail: format!("no output for {} input bytes", input.len()),
        });
    }
    if !result.stderr.is_empty() {
        debug!(program, stderr = %result.stderr, "Filter diagnostics");
    }
    Ok(output)
}

/// Run `invocation` over `input` and return what it wrote to standard output.
///
/// Exit code 0 is success. Cancelling `token` aborts the stream copies and
/// kills the program; a cancelled run never returns partial output.
pub async fn transduce(
    invocation: &ProcessInvocation,
    input: &[u8],
    token: &CancellationToken,
) -> Result<Vec<u8>, TransducerError> {
    if token.is_cancelled() {
        return Err(TransducerError::Cancelled);
    }

    let program = invocation.display_name();
    debug!(
        program = %program,
        args = ?invocation.args,
        priority = ?invocation.priority,
        input_len = input.len(),
        "Launching filter"
    );

    let mut child = filter_command(invocation).spawn().map_err(|source| TransducerError::Spawn {
        program: program.clone(),
        source,
    })?;

    let (Some(stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        let _ = child.start_kill();
        return Err(TransducerError::Io {
            program,
            source: std::io::Error::other("standard streams were not captured"),
        });
    };

    // Drains start before the first byte of input is written.
    let mut stderr_drain: Drain = tokio::spawn(read_all(stderr));
    let mut stdout_drain: Drain = tokio::spawn(read_all(stdout));

    let outcome = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        result = exchange(
            &program,
            &mut child,
            stdin,
            input,
            &mut stdout_drain,
            &mut stderr_drain,
        ) => Some(result),
    };

    match outcome {
        Some(result) => result,
        None => {
            debug!(program = %program, "Filter cancelled, killing process");
            stdout_drain.abort();
            stderr_drain.abort();
            let _ = child.kill().await;
            Err(TransducerError::Cancelled)
        }
    }
}
