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

//! Small helpers on top of libc shared by the fork/exec engine and the pipe
//! configuration code. The teacher's original helpers here built argv arrays
//! by hand with `malloc`/`calloc` (see history); that path truncated any
//! non-ASCII `char` to a single byte, which is wrong for the byte-string
//! arguments spec.md §4.2 requires. We keep the "heap-allocate, then hand
//! raw pointers to libc" shape but build it on `CString`/`Vec` so ownership is
//! tracked by the type system instead of manual free calls.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;

/// Builds a NUL-terminated `CString` from an arbitrary byte slice (which may
/// be a raw environment/argument value, not necessarily valid UTF-8).
/// Embedded NUL bytes are rejected by `CString::new`.
pub fn cstring_from_bytes(bytes: &[u8]) -> Result<CString, std::ffi::NulError> {
    CString::new(bytes.to_vec())
}

pub fn cstring_from_os_str(s: &std::ffi::OsStr) -> Result<CString, std::ffi::NulError> {
    cstring_from_bytes(s.as_bytes())
}

/// Builds the NUL-terminated `argv`/`envp`-shaped pointer vector libc expects:
/// one pointer per entry, followed by a null pointer. The returned vector
/// must outlive any syscall using it; it borrows from `owned`.
pub fn null_terminated_pointers(owned: &[CString]) -> Vec<*const libc::c_char> {
    let mut ptrs: Vec<*const libc::c_char> = owned.iter().map(|c| c.as_ptr()).collect();
    ptrs.push(std::ptr::null());
    ptrs
}

/// Retries a libc call across `EINTR`, the idiom the fork/exec engine's
/// parent-side sync pipe read loop needs (spec.md §4.2 step 5).
pub fn retry_eintr<F: FnMut() -> libc::ssize_t>(mut f: F) -> libc::ssize_t {
    loop {
        let ret = f();
        if ret == -1 && errno::errno().0 == libc::EINTR {
            continue;
        }
        return ret;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cstring_from_bytes_roundtrip() {
        let input = "Hello World!".as_bytes();
        let c_string = cstring_from_bytes(input).unwrap();
        assert_eq!(c_string.as_bytes(), input);
    }

    #[test]
    fn cstring_from_bytes_rejects_interior_nul() {
        assert!(cstring_from_bytes(b"a\0b").is_err());
    }

    #[test]
    fn null_terminated_pointers_ends_in_null() {
        let owned = vec![
            CString::new("first").unwrap(),
            CString::new("second").unwrap(),
        ];
        let ptrs = null_terminated_pointers(&owned);
        assert_eq!(ptrs.len(), 3);
        assert!(ptrs[2].is_null());
    }
}
