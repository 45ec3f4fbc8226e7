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

//! Pipe creation and non-blocking/buffer-size configuration (spec.md §4.3).
//! The teacher's `Pipe` type modelled a pipe connecting two *sibling child*
//! processes in a shell pipeline; here a pipe only ever connects the parent
//! to one of its own children, so the type shrinks to a pair of raw
//! descriptors plus the two free functions spec.md §4.3 calls for.

use std::os::unix::io::RawFd;

/// Creates an anonymous pipe, returning `(read_end, write_end)`.
pub fn create_pipe() -> Result<(RawFd, RawFd), errno::Errno> {
    let mut fds: [libc::c_int; 2] = [0; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret == -1 {
        Err(errno::errno())
    } else {
        Ok((fds[0], fds[1]))
    }
}

/// Reads the current status flags, ORs in `O_NONBLOCK`, and writes them back
/// only if they changed (spec.md §4.3).
pub fn set_nonblocking(fd: RawFd) -> Result<(), errno::Errno> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(errno::errno());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret == -1 {
        Err(errno::errno())
    } else {
        Ok(())
    }
}

/// Applies a pipe buffer size hint. On Linux this issues `F_SETPIPE_SZ`; on
/// other systems it is a documented no-op (spec.md §4.3, Non-goals §1).
/// `EBUSY` is swallowed: the kernel already provides at least the requested
/// size, so the hint failing to grow it further isn't an error a caller
/// needs to see.
pub fn set_pipe_buffer_size(write_end: RawFd, bytes: usize) -> Result<(), errno::Errno> {
    #[cfg(target_os = "linux")]
    {
        let ret = unsafe { libc::fcntl(write_end, libc::F_SETPIPE_SZ, bytes as libc::c_int) };
        if ret == -1 {
            let err = errno::errno();
            if err.0 == libc::EBUSY {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (write_end, bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_pipe_returns_distinct_ends() {
        let (r, w) = create_pipe().unwrap();
        assert_ne!(r, w);
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn set_nonblocking_is_idempotent() {
        let (r, w) = create_pipe().unwrap();
        set_nonblocking(w).unwrap();
        set_nonblocking(w).unwrap();
        let flags = unsafe { libc::fcntl(w, libc::F_GETFL) };
        assert_ne!(flags & libc::O_NONBLOCK, 0);
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }

    #[test]
    fn set_pipe_buffer_size_hint_does_not_error() {
        let (r, w) = create_pipe().unwrap();
        assert!(set_pipe_buffer_size(w, 1 << 20).is_ok());
        unsafe {
            libc::close(r);
            libc::close(w);
        }
    }
}
