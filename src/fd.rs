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

//! Owning wrapper over a raw file descriptor (spec.md §4.1). Generalizes the
//! teacher's `Pipe` close bookkeeping (`pipe.rs`'s `read_closed`/`write_closed`
//! flags) into a single-descriptor handle shared by every component that owns
//! one end of a pipe or an adopted fd.

use crate::error::StreamError;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

/// Owns at most one OS file descriptor. Double-close is silently absorbed;
/// once closed, any further access fails with [`StreamError::BadFileDescriptor`].
#[derive(Debug)]
pub struct FdHandle {
    fd: RawFd,
    closed: AtomicBool,
}

impl FdHandle {
    /// Adopts a caller- or pipe-owned descriptor.
    pub fn new(fd: RawFd) -> Self {
        Self {
            fd,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the underlying descriptor, provided the enclosing task has not
    /// been cancelled and the handle has not been closed. `cancelled` is
    /// evaluated first, matching spec.md §4.1's ordering.
    pub fn access_if_not_cancelled(&self, cancelled: bool) -> Result<RawFd, AccessError> {
        if cancelled {
            return Err(AccessError::Cancelled);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(AccessError::BadFileDescriptor);
        }
        Ok(self.fd)
    }

    /// Returns the descriptor without a cancellation check, for internal
    /// callers (the watcher, the fork/exec engine) that have no task to
    /// cancel.
    pub fn raw(&self) -> Result<RawFd, StreamError> {
        if self.closed.load(Ordering::Acquire) {
            Err(StreamError::BadFileDescriptor)
        } else {
            Ok(self.fd)
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent close: the first call marks the handle closed *before*
    /// invoking the OS close, so a throwing close still prevents further use
    /// (spec.md §4.1).
    pub fn close(&self) -> Result<(), errno::Errno> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let ret = unsafe { libc::close(self.fd) };
        if ret == -1 {
            Err(errno::errno())
        } else {
            Ok(())
        }
    }
}

impl Drop for FdHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Outcome of [`FdHandle::access_if_not_cancelled`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessError {
    Cancelled,
    BadFileDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_pipe() -> (RawFd, RawFd) {
        let mut fds = [0; 2];
        let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn close_is_idempotent() {
        let (r, w) = open_pipe();
        unsafe { libc::close(w) };
        let handle = FdHandle::new(r);
        assert!(handle.close().is_ok());
        // second close must not touch the OS (fd already reused otherwise)
        assert!(handle.close().is_ok());
    }

    #[test]
    fn access_after_close_is_bad_fd() {
        let (r, w) = open_pipe();
        unsafe { libc::close(w) };
        let handle = FdHandle::new(r);
        handle.close().unwrap();
        assert_eq!(
            handle.access_if_not_cancelled(false),
            Err(AccessError::BadFileDescriptor)
        );
    }

    #[test]
    fn access_while_cancelled_takes_priority() {
        let (r, w) = open_pipe();
        unsafe { libc::close(w) };
        let handle = FdHandle::new(r);
        assert_eq!(
            handle.access_if_not_cancelled(true),
            Err(AccessError::Cancelled)
        );
        handle.close().unwrap();
    }
}
