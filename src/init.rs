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

//! Initialization Pipeline (spec.md §4.8): wires the stdio configuration,
//! the fork/exec engine, and the termination watcher together into one
//! `spawn`. This is the orchestration the teacher's `execute_piped_cmd_chain`
//! did for a whole shell pipeline at once; here it spawns exactly one
//! subprocess (spec.md §1 scopes the pipeline-chaining case to the caller,
//! see spec.md §8 scenario 9).

use crate::command::Command;
use crate::error::{InitError, StdioError};
use crate::exec::ChildStdio;
use crate::stream::{Input, Output};
use crate::subprocess::Subprocess;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// How the child's stdin is provisioned (spec.md §6).
#[derive(Debug, Clone)]
pub enum StdinConfig {
    /// Redirect from `/dev/null`.
    None,
    /// Non-blocking write end exposed to the parent as [`Input`]; `Some(n)`
    /// requests a pipe buffer size hint.
    PipeFromParent(Option<usize>),
    /// A caller-owned descriptor becomes the child's stdin directly; `bool`
    /// requests it be closed on the parent side once the child has it.
    ReadFromFile(RawFd, bool),
}

/// How the child's stdout/stderr is provisioned (spec.md §6). Shared between
/// both streams since their configuration shapes are identical.
#[derive(Debug, Clone)]
pub enum StdoutConfig {
    /// Redirect to `/dev/null`.
    Discard,
    /// Non-blocking read end exposed to the parent as [`Output`].
    PipeToParent(Option<usize>),
    /// A caller-owned descriptor becomes the child's stream directly.
    WriteToFile(RawFd, bool),
}

fn close_all(fds: &[RawFd]) {
    for &fd in fds {
        unsafe {
            libc::close(fd);
        }
    }
}

/// Opens `/dev/null` read-write with close-on-exec the first time it's
/// needed, then hands back the same fd for every subsequent discard stream
/// (spec.md §4.8 step 2).
fn ensure_devnull(
    devnull: &mut Option<RawFd>,
    close_after_spawn: &mut Vec<RawFd>,
) -> Result<RawFd, StdioError> {
    if let Some(fd) = *devnull {
        return Ok(fd);
    }
    let fd = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
    if fd == -1 {
        return Err(StdioError::DevNullFailed(errno::errno()));
    }
    *devnull = Some(fd);
    close_after_spawn.push(fd);
    Ok(fd)
}

fn provision_stdin(
    config: &StdinConfig,
    devnull: &mut Option<RawFd>,
    close_after_spawn: &mut Vec<RawFd>,
) -> Result<(RawFd, Option<Input>), StdioError> {
    match config {
        StdinConfig::None => Ok((ensure_devnull(devnull, close_after_spawn)?, None)),
        StdinConfig::PipeFromParent(size) => {
            let (child_read, parent_write) =
                crate::pipe::create_pipe().map_err(StdioError::PipeCreationFailed)?;
            crate::pipe::set_nonblocking(parent_write).map_err(StdioError::ConfigurationFailed)?;
            if let Some(bytes) = size {
                crate::pipe::set_pipe_buffer_size(parent_write, *bytes)
                    .map_err(StdioError::ConfigurationFailed)?;
            }
            close_after_spawn.push(child_read);
            Ok((child_read, Some(Input::new(parent_write))))
        }
        StdinConfig::ReadFromFile(fd, close) => {
            if *close {
                close_after_spawn.push(*fd);
            }
            Ok((*fd, None))
        }
    }
}

fn provision_output(
    config: &StdoutConfig,
    devnull: &mut Option<RawFd>,
    close_after_spawn: &mut Vec<RawFd>,
) -> Result<(RawFd, Option<Output>), StdioError> {
    match config {
        StdoutConfig::Discard => Ok((ensure_devnull(devnull, close_after_spawn)?, None)),
        StdoutConfig::PipeToParent(size) => {
            let (parent_read, child_write) =
                crate::pipe::create_pipe().map_err(StdioError::PipeCreationFailed)?;
            crate::pipe::set_nonblocking(parent_read).map_err(StdioError::ConfigurationFailed)?;
            if let Some(bytes) = size {
                crate::pipe::set_pipe_buffer_size(child_write, *bytes)
                    .map_err(StdioError::ConfigurationFailed)?;
            }
            close_after_spawn.push(child_write);
            Ok((child_write, Some(Output::new(parent_read))))
        }
        StdoutConfig::WriteToFile(fd, close) => {
            if *close {
                close_after_spawn.push(*fd);
            }
            Ok((*fd, None))
        }
    }
}

/// Runs the full initialization pipeline (spec.md §4.8): provisions the
/// three stdio streams, starts the watcher paused, forks/execs, then either
/// unwinds everything and reports a classified [`InitError`], or resumes the
/// watcher and hands back the live [`Subprocess`].
pub async fn spawn(
    command: Command,
    runtime: tokio::runtime::Handle,
) -> Result<Arc<Subprocess>, InitError> {
    let mut close_after_spawn: Vec<RawFd> = Vec::new();
    let mut devnull: Option<RawFd> = None;

    let (stdin_fd, input) =
        match provision_stdin(&command.stdin, &mut devnull, &mut close_after_spawn) {
            Ok(v) => v,
            Err(e) => {
                close_all(&close_after_spawn);
                return Err(InitError::Stdin(e));
            }
        };
    let (stdout_fd, output) =
        match provision_output(&command.stdout, &mut devnull, &mut close_after_spawn) {
            Ok(v) => v,
            Err(e) => {
                close_all(&close_after_spawn);
                return Err(InitError::Stdout(e));
            }
        };
    let (stderr_fd, err_output) =
        match provision_output(&command.stderr, &mut devnull, &mut close_after_spawn) {
            Ok(v) => v,
            Err(e) => {
                close_all(&close_after_spawn);
                return Err(InitError::Stderr(e));
            }
        };

    let watcher_handle = crate::watcher::spawn_paused(runtime);

    let executable =
        match crate::libc_util::cstring_from_os_str(command.executable_path.as_os_str()) {
            Ok(c) => c,
            Err(_) => {
                close_all(&close_after_spawn);
                watcher_handle.cancel();
                return Err(InitError::Fork {
                    message: "executable path contains an embedded NUL byte".to_string(),
                    errno: errno::Errno(libc::EINVAL),
                });
            }
        };
    let executable_path_lossy = command.executable_path.to_string_lossy();
    let argv_owned = match crate::command::marshal_argv(
        &executable_path_lossy,
        &command.args,
        command.argv0_override.as_ref(),
    ) {
        Ok(v) => v,
        Err(_) => {
            close_all(&close_after_spawn);
            watcher_handle.cancel();
            return Err(InitError::Fork {
                message: "an argument contains an embedded NUL byte".to_string(),
                errno: errno::Errno(libc::EINVAL),
            });
        }
    };
    let envp_owned = match crate::command::marshal_envp(&command.environment) {
        Ok(v) => v,
        Err(_) => {
            close_all(&close_after_spawn);
            watcher_handle.cancel();
            return Err(InitError::Fork {
                message: "an environment entry contains an embedded NUL byte".to_string(),
                errno: errno::Errno(libc::EINVAL),
            });
        }
    };

    let argv_ptrs = crate::libc_util::null_terminated_pointers(&argv_owned);
    let envp_ptrs = crate::libc_util::null_terminated_pointers(&envp_owned);
    let stdio = ChildStdio {
        stdin: stdin_fd,
        stdout: stdout_fd,
        stderr: stderr_fd,
    };

    let fork_result = crate::exec::fork_exec(&executable, &argv_ptrs, &envp_ptrs, stdio);
    close_all(&close_after_spawn);

    match fork_result {
        Err(e) => {
            watcher_handle.cancel();
            Err(InitError::from_exec_error(e))
        }
        Ok(pid) => {
            let subprocess = Subprocess::new(pid, input, output, err_output);
            watcher_handle.resume(pid, Arc::clone(&subprocess));
            tracing::debug!(pid, "subprocess spawned");
            Ok(subprocess)
        }
    }
}
