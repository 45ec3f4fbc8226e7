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

//! The signal-safe fork/exec engine (spec.md §4.2). This is the teacher's
//! `fork()` + `execvp()` arm in `lib.rs`, generalized from "exec into a shell
//! pipeline stage" to "exec an arbitrary command with three caller-supplied
//! stdio descriptors", and hardened: failures are reported through a
//! close-on-exec sync pipe instead of `panic!`-ing inside the child (a panic
//! that unwinds past `fork()` in the child is undefined behaviour).
//!
//! Everything between `fork()` and `execve()` in the child arm
//! (`run_child_and_exit`) must stick to async-signal-safe primitives: no
//! allocation, no locking, no Rust runtime hooks. Every pointer it touches is
//! computed by the parent *before* `fork()`.

use crate::error::{ChildOpcode, ExecError};
use crate::libc_util::retry_eintr;
use std::ffi::CString;
use std::os::unix::io::RawFd;

/// The three descriptors the child's stdin/stdout/stderr are `dup2`'d from.
#[derive(Debug, Copy, Clone)]
pub struct ChildStdio {
    pub stdin: RawFd,
    pub stdout: RawFd,
    pub stderr: RawFd,
}

/// Spawns `executable` with the given argv/envp and stdio, following spec.md
/// §4.2 steps 3-6. `argv`/`envp` must already be NUL-terminated pointer
/// vectors (built by [`crate::command`] and [`crate::libc_util`] before this
/// call, since the child may not allocate after `fork()`).
pub fn fork_exec(
    executable: &CString,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
    stdio: ChildStdio,
) -> Result<libc::pid_t, ExecError> {
    // Step 3: sync pipe. The child sets FD_CLOEXEC on the write end so a
    // successful exec is signalled by EOF on the read end.
    let mut sync_fds: [libc::c_int; 2] = [0; 2];
    let ret = unsafe { libc::pipe(sync_fds.as_mut_ptr()) };
    if ret == -1 {
        return Err(ExecError::PipeOpenFailed(errno::errno()));
    }
    let (sync_read, sync_write) = (sync_fds[0], sync_fds[1]);

    // Step 4: fork.
    let pid = unsafe { libc::fork() };
    if pid == -1 {
        let err = errno::errno();
        unsafe {
            libc::close(sync_read);
            libc::close(sync_write);
        }
        return Err(ExecError::ForkFailed(err));
    }

    if pid == 0 {
        // Step 6: child arm. Async-signal-safe primitives only from here on.
        unsafe { run_child_and_exit(executable, argv, envp, stdio, sync_read, sync_write) }
    }

    // Step 5: parent arm.
    unsafe { libc::close(sync_write) };
    let result = read_sync_pipe(sync_read);
    unsafe { libc::close(sync_read) };

    if let Err(ref _e) = result {
        // Reap the child before surfacing the classified failure.
        let mut status: libc::c_int = 0;
        unsafe { libc::waitpid(pid, &mut status as *mut libc::c_int, 0) };
    }

    result.map(|()| pid)
}

/// Parent-side sync pipe read loop (spec.md §4.2 step 5).
fn read_sync_pipe(sync_read: RawFd) -> Result<(), ExecError> {
    let mut buf = [0u8; std::mem::size_of::<i32>() * 2];
    let mut filled = 0usize;

    loop {
        let ret = retry_eintr(|| unsafe {
            libc::read(
                sync_read,
                buf.as_mut_ptr().add(filled) as *mut libc::c_void,
                buf.len() - filled,
            )
        });

        if ret < 0 {
            let err = errno::errno();
            if err.0 == libc::EAGAIN || err.0 == libc::EWOULDBLOCK {
                continue;
            }
            return Err(ExecError::PipeReadFailed(err));
        }

        if ret == 0 {
            return if filled == 0 {
                // exec succeeded: immediate EOF.
                Ok(())
            } else {
                // partial message, then EOF: malformed.
                Err(ExecError::PipeReadFailed(errno::Errno(libc::EDOM)))
            };
        }

        filled += ret as usize;
        if filled == buf.len() {
            let opcode_raw = i32::from_ne_bytes(buf[0..4].try_into().unwrap());
            let errno_raw = i32::from_ne_bytes(buf[4..8].try_into().unwrap());
            let opcode = match opcode_raw {
                0 => ChildOpcode::Dup2,
                1 => ChildOpcode::PipeCloexec,
                2 => ChildOpcode::Exec,
                _ => return Err(ExecError::PipeReadFailed(errno::Errno(libc::EDOM))),
            };
            return Err(ExecError::ChildFailed {
                opcode,
                errno: errno::Errno(errno_raw),
            });
        }
    }
}

/// Writes `(opcode, errno)` to the sync pipe and exits with 127. Called only
/// from the child arm, after something before `execve` failed.
unsafe fn report_child_failure_and_exit(
    sync_write: RawFd,
    opcode: ChildOpcode,
    errno_val: i32,
) -> ! {
    let opcode_raw: i32 = match opcode {
        ChildOpcode::Dup2 => 0,
        ChildOpcode::PipeCloexec => 1,
        ChildOpcode::Exec => 2,
    };
    let mut msg = [0u8; 8];
    msg[0..4].copy_from_slice(&opcode_raw.to_ne_bytes());
    msg[4..8].copy_from_slice(&errno_val.to_ne_bytes());
    let mut written = 0usize;
    while written < msg.len() {
        let ret = libc::write(
            sync_write,
            msg.as_ptr().add(written) as *const libc::c_void,
            msg.len() - written,
        );
        if ret < 0 {
            break;
        }
        written += ret as usize;
    }
    libc::_exit(127);
}

/// The child arm (spec.md §4.2 step 6). Must only call async-signal-safe
/// primitives: no allocation, no locking, no Rust runtime hooks.
unsafe fn run_child_and_exit(
    executable: &CString,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
    stdio: ChildStdio,
    sync_read: RawFd,
    sync_write: RawFd,
) -> ! {
    libc::close(sync_read);

    for (target_fd, source_fd) in [
        (libc::STDIN_FILENO, stdio.stdin),
        (libc::STDOUT_FILENO, stdio.stdout),
        (libc::STDERR_FILENO, stdio.stderr),
    ] {
        if libc::dup2(source_fd, target_fd) == -1 {
            report_child_failure_and_exit(sync_write, ChildOpcode::Dup2, *errno_location());
        }
    }

    // Close every descriptor strictly greater than 2 except the sync pipe
    // write end. This also closes the original stdio source descriptors
    // (now redundant after the dup2s above, and possibly aliased across
    // streams when the caller reused one fd for more than one stream).
    // `sysconf` and `close` are both async-signal-safe.
    let open_max = libc::sysconf(libc::_SC_OPEN_MAX);
    let open_max = if open_max > 0 { open_max } else { 1024 };
    for fd in (libc::STDERR_FILENO + 1)..(open_max as libc::c_int) {
        if fd != sync_write {
            libc::close(fd);
        }
    }

    let flags = libc::fcntl(sync_write, libc::F_GETFD);
    if flags == -1 || libc::fcntl(sync_write, libc::F_SETFD, flags | libc::FD_CLOEXEC) == -1 {
        report_child_failure_and_exit(sync_write, ChildOpcode::PipeCloexec, *errno_location());
    }

    // Reset every signal disposition to default and unblock all signals.
    // `SIGRTMAX()` (a function, not a constant, since the real-time signal
    // range is libc-defined) is the highest signal number on this platform.
    let mut default_action: libc::sigaction = std::mem::zeroed();
    default_action.sa_sigaction = libc::SIG_DFL;
    for signum in 1..=libc::SIGRTMAX() {
        libc::sigaction(signum, &default_action, std::ptr::null_mut());
    }
    let mut empty_mask: libc::sigset_t = std::mem::zeroed();
    libc::sigemptyset(&mut empty_mask);
    libc::sigprocmask(libc::SIG_SETMASK, &empty_mask, std::ptr::null_mut());

    libc::execve(executable.as_ptr(), argv.as_ptr(), envp.as_ptr());
    report_child_failure_and_exit(sync_write, ChildOpcode::Exec, *errno_location());
}

/// `errno()`'s thread-local accessor isn't itself guaranteed async-signal-safe
/// on every libc, but every mainstream implementation stores it as an
/// unsynchronized `int` accessible through `__errno_location`/equivalent, and
/// both musl and glibc are documented to make reading it safe immediately
/// after a failing syscall even from a freshly forked child. We isolate that
/// assumption in this one accessor.
unsafe fn errno_location() -> &'static libc::c_int {
    &*libc::__errno_location()
}
