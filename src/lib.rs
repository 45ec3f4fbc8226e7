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

//! An async POSIX child-process runtime built on `tokio`: spawn an
//! executable with non-blocking stdio pipes, await its termination from any
//! number of tasks, and cooperatively cancel those waits.
//!
//! The pieces, leaf to root:
//! [`fd::FdHandle`] owns one descriptor; [`exec`] runs the signal-safe
//! fork/exec sequence; [`pipe`] configures a pipe's non-blocking flag and
//! buffer size; [`stream::Input`]/[`stream::Output`] wrap the parent-visible
//! ends; [`watcher`] runs one `waitpid` thread per child; [`subprocess::Subprocess`]
//! is the coordinator these all report into; [`init`] wires all of it
//! together behind [`spawn`].

mod command;
mod error;
mod exec;
mod fd;
mod init;
mod libc_util;
mod pipe;
mod signal;
mod stream;
mod subprocess;
mod watcher;

pub use command::{Arg, Builder, Command, CommandBuilder, Environment};
pub use error::{
    CancellationError, ChildOpcode, DrainError, ExecError, InitError, SignalError, StdioError,
    StreamError, StreamOpError,
};
pub use fd::{AccessError, FdHandle};
pub use init::{StdinConfig, StdoutConfig};
pub use signal::Signal;
pub use stream::{Input, Output};
pub use subprocess::{CapturedOutput, ScopedOutcome, SendSignalError, Subprocess};

/// Spawns `command`, returning the live [`Subprocess`] or a classified
/// [`InitError`] (spec.md §4.8). `runtime` is the `tokio` runtime the
/// termination watcher hands its result back into — usually
/// `tokio::runtime::Handle::current()`.
pub async fn spawn(
    command: Command,
    runtime: tokio::runtime::Handle,
) -> Result<std::sync::Arc<Subprocess>, InitError> {
    init::spawn(command, runtime).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn spawn_true_reaches_running_facade() {
        let command = CommandBuilder::new().executable_path("/bin/true").build();
        let subprocess = spawn(command, tokio::runtime::Handle::current())
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        assert_eq!(subprocess.wait_for_termination(&cancel).await, Ok(0));
    }
}
