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

//! The termination watcher (spec.md §4.6): one dedicated OS thread per
//! child, blocked on `waitpid`, bridging its result back into tokio. This has
//! no precedent in the teacher's synchronous `update_process_states` — it's
//! the part of the system spec.md §1 calls "the hard engineering": the
//! thread starts *before* `fork()` and parks on a lock until the parent tells
//! it which pid to wait for, so it can never race the fork or observe an
//! unknown pid.
//!
//! Ownership is structured to avoid a coordinator/watcher reference cycle
//! (spec.md §9): the watcher thread owns a strong handle to the
//! [`crate::subprocess::Subprocess`] from [`WatcherHandle::resume`] onwards,
//! and the coordinator keeps nothing pointing back at the watcher. The
//! thread detaches itself; no `join` is ever required.

use crate::subprocess::Subprocess;
use std::sync::{Arc, Condvar, Mutex};

/// Sentinel exit status for a child the watcher lost track of (spec.md §4.6,
/// §6): only reachable if `waitpid` reports `ECHILD` before classification.
pub const UNKNOWN_EXIT_STATUS: i32 = 255;

enum Instruction {
    Waiting,
    Resume {
        pid: libc::pid_t,
        subprocess: Arc<Subprocess>,
    },
    Cancelled,
}

/// Links one watcher thread to the child it will wait for. Exactly one of
/// [`resume`](WatcherHandle::resume) / [`cancel`](WatcherHandle::cancel) must
/// be called.
pub struct WatcherHandle {
    sync: Arc<(Mutex<Instruction>, Condvar)>,
}

impl WatcherHandle {
    /// The fork succeeded: tell the watcher which pid to `waitpid` on and
    /// which [`Subprocess`] to notify.
    pub fn resume(self, pid: libc::pid_t, subprocess: Arc<Subprocess>) {
        let (lock, cvar) = &*self.sync;
        let mut guard = lock.lock().unwrap();
        *guard = Instruction::Resume { pid, subprocess };
        cvar.notify_one();
    }

    /// The fork failed: the watcher thread exits without ever calling
    /// `waitpid`.
    pub fn cancel(self) {
        let (lock, cvar) = &*self.sync;
        let mut guard = lock.lock().unwrap();
        *guard = Instruction::Cancelled;
        cvar.notify_one();
    }
}

/// Starts the watcher thread in its paused state and returns the handle used
/// to resume or cancel it (spec.md §4.8 step 3: "Start the termination
/// watcher in its paused state", *before* the fork/exec engine runs).
pub fn spawn_paused(runtime: tokio::runtime::Handle) -> WatcherHandle {
    let sync = Arc::new((Mutex::new(Instruction::Waiting), Condvar::new()));
    let thread_sync = Arc::clone(&sync);

    std::thread::spawn(move || {
        let (lock, cvar) = &*thread_sync;
        let mut guard = lock.lock().unwrap();
        while matches!(*guard, Instruction::Waiting) {
            guard = cvar.wait(guard).unwrap();
        }

        let instruction = std::mem::replace(&mut *guard, Instruction::Cancelled);
        drop(guard);

        match instruction {
            Instruction::Resume { pid, subprocess } => run_waitpid_loop(pid, subprocess, runtime),
            Instruction::Cancelled | Instruction::Waiting => {}
        }
    });

    WatcherHandle { sync }
}

enum Classification {
    Terminated(i32),
    TryAgain,
    NoChildProcess,
}

/// Maps a `waitpid` result per the table in spec.md §4.6.
fn classify(wait_result: libc::pid_t, status: libc::c_int) -> Classification {
    if wait_result == 0 {
        return Classification::TryAgain;
    }
    if wait_result == -1 {
        let err = errno::errno();
        return match err.0 {
            libc::EINTR | libc::EAGAIN => Classification::TryAgain,
            libc::ECHILD => Classification::NoChildProcess,
            libc::EINVAL | libc::ESRCH => {
                panic!("waitpid returned a programmer error: {err}")
            }
            _ => Classification::TryAgain,
        };
    }

    if libc::WIFEXITED(status) {
        let code = libc::WEXITSTATUS(status);
        debug_assert!(code >= 0);
        Classification::Terminated(code)
    } else if libc::WIFSIGNALED(status) {
        let sig = libc::WTERMSIG(status);
        debug_assert!(sig > 0);
        Classification::Terminated(-sig)
    } else {
        Classification::TryAgain
    }
}

fn run_waitpid_loop(
    pid: libc::pid_t,
    subprocess: Arc<Subprocess>,
    runtime: tokio::runtime::Handle,
) {
    tracing::debug!(pid, "termination watcher started");
    let exit_status = loop {
        let mut status: libc::c_int = 0;
        let ret = unsafe { libc::waitpid(pid, &mut status as *mut libc::c_int, 0) };
        match classify(ret, status) {
            Classification::Terminated(exit_status) => break exit_status,
            Classification::TryAgain => continue,
            Classification::NoChildProcess => {
                tracing::warn!(pid, "waitpid lost the child before observing termination");
                break UNKNOWN_EXIT_STATUS;
            }
        }
    };

    tracing::debug!(pid, exit_status, "child terminated");
    runtime.spawn(async move {
        subprocess.on_watcher_termination(exit_status).await;
    });
}
