//! Process helpers for driving external filter programs.
//!
//! With the `tokio` feature this crate provides the [`transducer`] module,
//! which runs a program over a byte buffer through its standard streams.
//! Child processes never open a console window on Windows.

#[cfg(feature = "tokio")]
pub mod transducer;

#[cfg(feature = "tokio")]
pub use transducer::{PriorityHint, ProcessInvocation, ProcessResult, TransducerError, transduce};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self) -> &mut Self;
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) -> &mut Self {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
        self
    }
}

/// Command for `invocation` with all three standard streams piped.
///
/// The child is killed if the returned handle is dropped before it exits.
#[cfg(feature = "tokio")]
pub fn filter_command(invocation: &ProcessInvocation) -> tokio::process::Command {
    use std::process::Stdio;

    let mut cmd = tokio::process::Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .no_window();
    cmd
}
