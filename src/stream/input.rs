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

//! Input stream (spec.md §4.4): an actor-like writer around a non-blocking
//! pipe write-end. The PIPE_BUF chunking TODO noted in spec.md §9 is kept
//! verbatim: one `write()` syscall per call, partial writes surface as a
//! short count.

use crate::error::{CancellationError, StreamError, StreamOpError};
use crate::fd::{AccessError, FdHandle};
use std::os::unix::io::RawFd;
use tokio_util::sync::CancellationToken;

/// A non-blocking pipe write-end exposed to the caller (spec.md §6:
/// `PipeFromParent`). Operations are serialised by construction: `&self`
/// methods require the caller to funnel all writes through one logical task
/// (spec.md §9, "single-writer streams").
pub struct Input {
    fd: FdHandle,
}

impl Input {
    pub(crate) fn new(fd: RawFd) -> Self {
        Self {
            fd: FdHandle::new(fd),
        }
    }

    /// Writes as many bytes of `buffer` as the pipe will currently accept.
    /// `Ok(None)` means the write would block (`EAGAIN`/`EWOULDBLOCK`).
    /// Checks cancellation before the closed flag, per spec.md §4.4.
    pub fn write(
        &self,
        buffer: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Option<usize>, StreamOpError> {
        let fd = match self.fd.access_if_not_cancelled(cancel.is_cancelled()) {
            Ok(fd) => fd,
            Err(AccessError::Cancelled) => return Err(CancellationError.into()),
            Err(AccessError::BadFileDescriptor) => {
                return Err(StreamError::BadFileDescriptor.into())
            }
        };

        let ret = unsafe { libc::write(fd, buffer.as_ptr() as *const libc::c_void, buffer.len()) };
        if ret >= 0 {
            Ok(Some(ret as usize))
        } else {
            let err = errno::errno();
            if err.0 == libc::EAGAIN || err.0 == libc::EWOULDBLOCK {
                Ok(None)
            } else {
                Err(StreamError::Io(err).into())
            }
        }
    }

    /// Same semantics as [`Input::write`] (spec.md §4.4): this is not a
    /// "loop until fully sent" helper — the open PIPE_BUF question in
    /// spec.md §9 is preserved, so a short write here is visible to the
    /// caller exactly as from `write`.
    pub fn write_all(
        &self,
        buffer: &[u8],
        cancel: &CancellationToken,
    ) -> Result<Option<usize>, StreamOpError> {
        self.write(buffer, cancel)
    }

    /// Drains an async byte source into memory, then calls the synchronous
    /// [`Input::write_all`] (spec.md §4.4).
    pub async fn write_all_from_async_reader<R>(
        &self,
        mut reader: R,
        cancel: &CancellationToken,
    ) -> Result<Option<usize>, StreamOpError>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        use tokio::io::AsyncReadExt;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .await
            .map_err(|e| StreamError::Io(errno::Errno(e.raw_os_error().unwrap_or(0))))?;
        self.write_all(&buf, cancel)
    }

    /// Encodes `text` as NUL-terminated UTF-8 bytes and writes it (spec.md
    /// §4.4). `&str` is always valid UTF-8 in Rust, so the `InvalidArgument`
    /// path spec.md describes for encoding failure is unreachable here; it
    /// stays part of [`StreamError`] for a future non-UTF-8 encoding.
    pub fn write_all_text(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<usize>, StreamOpError> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.write_all(&bytes, cancel)
    }

    /// Idempotent close (spec.md §4.4).
    pub fn close(&self) -> Result<(), errno::Errno> {
        self.fd.close()
    }

    pub fn is_closed(&self) -> bool {
        self.fd.is_closed()
    }
}
