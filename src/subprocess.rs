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

//! The Subprocess Coordinator (spec.md §4.7): the public object returned by
//! spawning. It owns the pid, the three optional streams, and the waiter
//! list, and serialises every state transition behind one lock — the
//! teacher's `ProcessState`/`update_process_states` collapsed into a single
//! object instead of a global table keyed by pid (spec.md §9 removes that
//! global map entirely).

use crate::error::{CancellationError, SignalError};
use crate::signal::Signal;
use crate::stream::{Input, Output};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Sentinel carried by the waiter list; see [`Subprocess::on_wait`].
enum SuspensionState {
    Pending,
    Suspended(oneshot::Sender<Result<i32, CancellationError>>),
    Cancelled,
    /// Not one of spec.md §3's three named states: marks a suspension the
    /// termination callback already resumed, so a cancellation handler that
    /// loses the race to the coordinator lock can tell "already cancelled"
    /// (fatal double-cancel) apart from "already resumed by termination"
    /// (benign, no-op) — spec.md's own wording ("never transitions out of
    /// Suspended... except by being resumed") implies this state must exist,
    /// it just isn't named.
    Resumed,
}

struct Suspension {
    state: Mutex<SuspensionState>,
}

enum State {
    Running,
    Terminated(i32),
}

struct Inner {
    state: State,
    waiters: Vec<Arc<Suspension>>,
}

/// One spawned child (spec.md §3 "Subprocess record"). `pid` is stable and
/// immutable; `stdin`/`stdout`/`stderr` are present iff the corresponding
/// configuration chose a parent-visible pipe (spec.md §6).
pub struct Subprocess {
    pid: libc::pid_t,
    pub stdin: Option<Input>,
    pub stdout: Option<Output>,
    pub stderr: Option<Output>,
    inner: Mutex<Inner>,
}

/// Outcome of [`Subprocess::send_signal`] and its aliases.
#[derive(Debug, thiserror::Error)]
pub enum SendSignalError {
    #[error("operation was cancelled")]
    Cancelled,
    #[error(transparent)]
    Signal(#[from] SignalError),
}

/// `exitStatus`, `stdout`, `stderr` from [`Subprocess::read_output_and_wait`].
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub exit_status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// The outcome [`Subprocess::terminate_after`] captures for its scoped body.
#[derive(Debug)]
pub enum ScopedOutcome<R, E> {
    Ok(R),
    Cancelled,
    Err(E),
}

impl Subprocess {
    pub(crate) fn new(
        pid: libc::pid_t,
        stdin: Option<Input>,
        stdout: Option<Output>,
        stderr: Option<Output>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pid,
            stdin,
            stdout,
            stderr,
            inner: Mutex::new(Inner {
                state: State::Running,
                waiters: Vec::new(),
            }),
        })
    }

    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    fn cached_exit_status(&self) -> Option<i32> {
        match self.inner.lock().unwrap().state {
            State::Running => None,
            State::Terminated(e) => Some(e),
        }
    }

    /// `kill(pid, sig)`, fails fast if already terminated. `ESRCH` (a race
    /// with the watcher) is reported as `Ok(false)`, never as an error
    /// (spec.md §4.7, §7(b)).
    pub async fn send_signal(
        &self,
        sig: Signal,
        cancel: &CancellationToken,
    ) -> Result<bool, SendSignalError> {
        if cancel.is_cancelled() {
            return Err(SendSignalError::Cancelled);
        }
        if self.cached_exit_status().is_some() {
            return Ok(false);
        }

        let ret = unsafe { libc::kill(self.pid, sig.as_raw()) };

        if cancel.is_cancelled() {
            return Err(SendSignalError::Cancelled);
        }

        if ret == 0 {
            Ok(true)
        } else {
            let err = errno::errno();
            if err.0 == libc::ESRCH {
                Ok(false)
            } else {
                Err(SignalError::from(err).into())
            }
        }
    }

    pub async fn terminate(&self, cancel: &CancellationToken) -> Result<bool, SendSignalError> {
        self.send_signal(Signal::Term, cancel).await
    }

    pub async fn kill(&self, cancel: &CancellationToken) -> Result<bool, SendSignalError> {
        self.send_signal(Signal::Kill, cancel).await
    }

    /// Fast path returns the cached exit status; otherwise registers a
    /// suspension and yields until resumed by termination or cancellation
    /// (spec.md §4.7's waiter registration protocol).
    pub async fn wait_for_termination(
        &self,
        cancel: &CancellationToken,
    ) -> Result<i32, CancellationError> {
        if let Some(exit_status) = self.cached_exit_status() {
            return Ok(exit_status);
        }

        let suspension = Arc::new(Suspension {
            state: Mutex::new(SuspensionState::Pending),
        });
        let (tx, mut rx) = oneshot::channel();
        self.on_wait(&suspension, tx);

        tokio::select! {
            biased;
            res = &mut rx => res.unwrap_or(Err(CancellationError)),
            _ = cancel.cancelled() => {
                self.on_cancel(&suspension);
                rx.await.unwrap_or(Err(CancellationError))
            }
        }
    }

    fn on_wait(
        &self,
        suspension: &Arc<Suspension>,
        tx: oneshot::Sender<Result<i32, CancellationError>>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let mut state = suspension.state.lock().unwrap();
        match &*state {
            SuspensionState::Pending => {
                *state = SuspensionState::Suspended(tx);
                drop(state);
                inner.waiters.push(Arc::clone(suspension));
            }
            SuspensionState::Cancelled => {
                drop(state);
                let _ = tx.send(Err(CancellationError));
            }
            SuspensionState::Suspended(_) | SuspensionState::Resumed => {
                unreachable!("on_wait called more than once for the same suspension")
            }
        }
    }

    fn on_cancel(&self, suspension: &Arc<Suspension>) {
        let mut inner = self.inner.lock().unwrap();
        inner.waiters.retain(|w| !Arc::ptr_eq(w, suspension));
        drop(inner);

        let mut state = suspension.state.lock().unwrap();
        match std::mem::replace(&mut *state, SuspensionState::Cancelled) {
            SuspensionState::Pending => {}
            SuspensionState::Suspended(tx) => {
                let _ = tx.send(Err(CancellationError));
            }
            SuspensionState::Resumed => {
                // Lost the race with termination; the waiter was already
                // resumed with an exit status. Restore the terminal marker
                // and do nothing else.
                *state = SuspensionState::Resumed;
            }
            SuspensionState::Cancelled => panic!("double cancellation of a suspension"),
        }
    }

    /// Starts two concurrent drainers on stdout/stderr, then waits for
    /// termination — scheduling the drainers first is mandatory to avoid a
    /// pipe-buffer deadlock (spec.md §4.7). A `BadFileDescriptor` surfaced
    /// by a drainer is flattened to an empty byte vector.
    pub async fn read_output_and_wait(
        &self,
        collect_stdout: bool,
        collect_stderr: bool,
        cancel: &CancellationToken,
    ) -> Result<CapturedOutput, CancellationError> {
        let drain_stdout = Self::drain_one(self.stdout.as_ref(), collect_stdout, cancel);
        let drain_stderr = Self::drain_one(self.stderr.as_ref(), collect_stderr, cancel);
        let wait = self.wait_for_termination(cancel);

        let (stdout, stderr, exit_status) = tokio::join!(drain_stdout, drain_stderr, wait);
        Ok(CapturedOutput {
            exit_status: exit_status?,
            stdout,
            stderr,
        })
    }

    async fn drain_one(
        output: Option<&Output>,
        collect: bool,
        cancel: &CancellationToken,
    ) -> Vec<u8> {
        let Some(output) = output else {
            return Vec::new();
        };
        let result = if collect {
            output.read_all(cancel).await
        } else {
            output.discard_all(cancel).await.map(|_| Vec::new())
        };
        result.unwrap_or_default()
    }

    /// Runs `body`, capturing its outcome; regardless of that outcome, sends
    /// `signal` and waits for termination, then checks cancellation once
    /// more before producing the captured outcome (spec.md §4.7). Semantics:
    /// "the process will be gone by the time this returns."
    pub async fn terminate_after<R, E>(
        &self,
        signal: Signal,
        body: impl std::future::Future<Output = Result<R, E>>,
        cancel: &CancellationToken,
    ) -> ScopedOutcome<R, E> {
        let body_outcome = tokio::select! {
            r = body => match r {
                Ok(v) => ScopedOutcome::Ok(v),
                Err(e) => ScopedOutcome::Err(e),
            },
            _ = cancel.cancelled() => ScopedOutcome::Cancelled,
        };

        let cleanup_cancel = CancellationToken::new();
        let _ = self.send_signal(signal, &cleanup_cancel).await;
        let _ = self.wait_for_termination(&cleanup_cancel).await;

        if cancel.is_cancelled() {
            ScopedOutcome::Cancelled
        } else {
            body_outcome
        }
    }

    /// Termination callback (spec.md §4.7), invoked exactly once by the
    /// watcher thread's spawned task. Every waiter's state transition happens
    /// while `inner` is still locked, in the same critical section as taking
    /// the waiter list — this is what keeps a concurrent [`Subprocess::on_cancel`]
    /// mutually exclusive with termination instead of racing it across an
    /// `.await` point (spec.md §4.7: both must run under the coordinator lock).
    pub(crate) async fn on_watcher_termination(self: Arc<Self>, exit_status: i32) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.state = State::Terminated(exit_status);
            let waiters = std::mem::take(&mut inner.waiters);

            for suspension in waiters {
                let mut state = suspension.state.lock().unwrap();
                match std::mem::replace(&mut *state, SuspensionState::Resumed) {
                    SuspensionState::Suspended(tx) => {
                        let _ = tx.send(Ok(exit_status));
                    }
                    other @ (SuspensionState::Pending | SuspensionState::Cancelled) => {
                        *state = other;
                        panic!("suspension left in the waiter list without being Suspended");
                    }
                    SuspensionState::Resumed => panic!("suspension resumed twice by termination"),
                }
            }
        }

        if let Some(stdin) = &self.stdin {
            let _ = stdin.close();
        }
        if let Some(stdout) = &self.stdout {
            stdout.close_after_pending_reads().await;
        }
        if let Some(stderr) = &self.stderr {
            stderr.close_after_pending_reads().await;
        }

        tracing::debug!(
            pid = self.pid,
            exit_status,
            "subprocess coordinator observed termination"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_termination_fast_path_after_resume() {
        let subprocess = Subprocess::new(1, None, None, None);
        subprocess.clone().on_watcher_termination(0).await;
        let cancel = CancellationToken::new();
        assert_eq!(subprocess.wait_for_termination(&cancel).await, Ok(0));
    }

    #[tokio::test]
    async fn wait_for_termination_resumes_on_termination() {
        let subprocess = Subprocess::new(1, None, None, None);
        let cancel = CancellationToken::new();
        let waiting = subprocess.clone();
        let handle = tokio::spawn(async move {
            waiting
                .wait_for_termination(&CancellationToken::new())
                .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        subprocess.clone().on_watcher_termination(-9).await;
        assert_eq!(handle.await.unwrap(), Ok(-9));
        assert_eq!(subprocess.wait_for_termination(&cancel).await, Ok(-9));
    }

    #[tokio::test]
    async fn wait_for_termination_observes_cancellation() {
        let subprocess = Subprocess::new(1, None, None, None);
        let cancel = CancellationToken::new();
        let child_cancel = cancel.clone();
        let waiting = subprocess.clone();
        let handle = tokio::spawn(async move { waiting.wait_for_termination(&child_cancel).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), Err(CancellationError));
    }

    #[tokio::test]
    async fn send_signal_fails_fast_once_terminated() {
        let subprocess = Subprocess::new(1, None, None, None);
        subprocess.clone().on_watcher_termination(0).await;
        let cancel = CancellationToken::new();
        assert!(!subprocess.send_signal(Signal::Term, &cancel).await.unwrap());
    }

    /// Regression test: a waiter's cancellation and the watcher's termination
    /// callback used to race across an `.await` point in
    /// `on_watcher_termination`, which could drive an already-cancelled
    /// suspension into the "fatal programmer error" panic instead of
    /// resolving to either an exit status or `CancellationError`. Run with a
    /// real multi-threaded runtime and no sleeps so the two code paths race
    /// on actual OS threads; many iterations to hit the narrow window.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn cancel_and_termination_race_never_panics() {
        for _ in 0..500 {
            let subprocess = Subprocess::new(1, None, None, None);
            let cancel = CancellationToken::new();

            let waiting = subprocess.clone();
            let child_cancel = cancel.clone();
            let handle =
                tokio::spawn(async move { waiting.wait_for_termination(&child_cancel).await });

            let terminator = subprocess.clone();
            let term_handle =
                tokio::spawn(async move { terminator.on_watcher_termination(0).await });

            cancel.cancel();

            term_handle.await.unwrap();
            let result = handle.await.unwrap();
            assert!(matches!(result, Ok(0) | Err(CancellationError)));
        }
    }
}
