/*
    MIT License

    Copyright (c) 2020 Philipp Schuster

    Permission is hereby granted, free of charge, to any person obtaining a copy
    of this software and associated documentation files (the "Software"), to deal
    in the Software without restriction, including without limitation the rights
    to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
    copies of the Software, and to permit persons to whom the Software is
    furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in all
    copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
    OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
    SOFTWARE.
*/

//! Error taxonomy. Errors are grouped the way they reach the caller, not the
//! way they're produced internally: initialization errors, stream errors,
//! signal-delivery errors, and cancellation.

use std::fmt;

/// The opcode a child writes to the sync pipe when it fails before `execve`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChildOpcode {
    Dup2,
    PipeCloexec,
    Exec,
}

impl fmt::Display for ChildOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildOpcode::Dup2 => write!(f, "dup2"),
            ChildOpcode::PipeCloexec => write!(f, "fcntl(FD_CLOEXEC) on sync pipe"),
            ChildOpcode::Exec => write!(f, "execve"),
        }
    }
}

/// Errors from the fork/exec engine (spec.md §4.2). Carried up through
/// [`InitError::Fork`] / [`InitError::Exec`].
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("fork() failed: {0}")]
    ForkFailed(errno::Errno),

    #[error("failed to open the fork/exec sync pipe: {0}")]
    PipeOpenFailed(errno::Errno),

    #[error("reading the fork/exec sync pipe failed: {0}")]
    PipeReadFailed(errno::Errno),

    #[error("child reported failure at {opcode}: {errno}")]
    ChildFailed {
        opcode: ChildOpcode,
        errno: errno::Errno,
    },
}

impl ExecError {
    /// The errno the exec-stage classification in spec.md §6 needs, if any.
    pub fn errno(&self) -> Option<errno::Errno> {
        match self {
            ExecError::ForkFailed(e) => Some(*e),
            ExecError::PipeOpenFailed(e) => Some(*e),
            ExecError::PipeReadFailed(e) => Some(*e),
            ExecError::ChildFailed { errno, .. } => Some(*errno),
        }
    }
}

/// Errors while provisioning a single stdio stream during initialization
/// (spec.md §4.8 step 2).
#[derive(Debug, thiserror::Error)]
pub enum StdioError {
    #[error("pipe() failed: {0}")]
    PipeCreationFailed(errno::Errno),

    #[error("opening /dev/null failed: {0}")]
    DevNullFailed(errno::Errno),

    #[error("fcntl() failed while configuring the pipe: {0}")]
    ConfigurationFailed(errno::Errno),
}

/// Classified initialization error surfaced to the caller (spec.md §6).
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("stdin setup failed: {0}")]
    Stdin(#[source] StdioError),

    #[error("stdout setup failed: {0}")]
    Stdout(#[source] StdioError),

    #[error("stderr setup failed: {0}")]
    Stderr(#[source] StdioError),

    #[error("fork failed: {message} (errno {errno})")]
    Fork {
        message: String,
        errno: errno::Errno,
    },

    #[error("exec failed: {0}")]
    Exec(errno::Errno),
}

impl InitError {
    pub(crate) fn from_exec_error(e: ExecError) -> Self {
        match e {
            ExecError::ForkFailed(errno) => InitError::Fork {
                message: "fork() returned -1".to_string(),
                errno,
            },
            ExecError::PipeOpenFailed(errno) | ExecError::PipeReadFailed(errno) => {
                InitError::Fork {
                    message: "sync pipe handling failed".to_string(),
                    errno,
                }
            }
            ExecError::ChildFailed { opcode, errno } => match opcode {
                ChildOpcode::Exec => InitError::Exec(errno),
                ChildOpcode::Dup2 | ChildOpcode::PipeCloexec => InitError::Fork {
                    message: format!("child failed at {opcode}"),
                    errno,
                },
            },
        }
    }
}

/// Errors surfaced from [`crate::subprocess::Subprocess::send_signal`] and friends
/// (spec.md §4.7, §7(b)). `ESRCH` never reaches this type — it's swallowed and
/// reported as `Ok(false)` at the call site, per spec.
#[derive(Debug, thiserror::Error)]
#[error("signal delivery failed: {0}")]
pub struct SignalError(#[from] pub(crate) errno::Errno);

/// Errors from [`crate::stream::Input`] / [`crate::stream::Output`] (spec.md §4.4,
/// §4.5, §7(c)). `EAGAIN`/`EWOULDBLOCK` never surface as this type — they're
/// folded into the `Option`-returning poll idiom.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("the stream's file descriptor was already closed")]
    BadFileDescriptor,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(errno::Errno),
}

/// Cancellation is a distinct error kind (spec.md §7(d)): it deliberately does
/// not implement `From`/`Into` against [`StreamError`] or [`SignalError`], so a
/// cancelled operation can never be silently reinterpreted as an I/O failure.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("operation was cancelled")]
pub struct CancellationError;

/// Outcome of a single stream operation (`read`/`write`, spec.md §4.4, §4.5),
/// which checks cancellation before the closed flag. `Cancelled` and
/// [`StreamError`] stay distinct variants here rather than one converting
/// into the other (spec.md §7(d)).
#[derive(Debug, thiserror::Error)]
pub enum StreamOpError {
    #[error(transparent)]
    Cancelled(#[from] CancellationError),
    #[error(transparent)]
    Io(#[from] StreamError),
}

/// Outcome of a bulk stream drain (`read_all`/`discard_all`, spec.md §4.5):
/// same shape as [`StreamOpError`], named separately since the two operate at
/// different granularities and spec.md §7 never asks them to be convertible.
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error(transparent)]
    Cancelled(#[from] CancellationError),
    #[error(transparent)]
    Io(#[from] StreamError),
}
