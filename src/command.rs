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

//! Command description and argv/environment marshalling (spec.md §4.2 steps
//! 1-2). Generalizes the teacher's `BasicCmd`/`BasicCmdBuilder` (`data.rs`)
//! from "one stage of a shell pipeline" to "one subprocess to spawn", and
//! keeps the same `Builder` trait / consuming-builder style.

use crate::init::{StdinConfig, StdoutConfig};
use crate::libc_util::cstring_from_bytes;
use std::ffi::CString;
use std::path::PathBuf;

/// Common trait for the crate's builders, kept from the teacher's `data.rs`.
pub trait Builder<To> {
    fn build(self) -> To;
}

/// An argument or environment value: either text or an arbitrary byte string.
/// Value types are otherwise out of scope (spec.md §1); this sum is the
/// minimum needed to express spec.md §4.2's byte-string arguments in Rust.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Arg {
    Str(String),
    Bytes(Vec<u8>),
}

impl Arg {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Arg::Str(s) => s.as_bytes(),
            Arg::Bytes(b) => b,
        }
    }

    /// `Some` iff this value has a valid UTF-8 form. Used by the environment
    /// merge (spec.md §9 open question #2): only string-valued override keys
    /// shadow an inherited key of the same name.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) => Some(s),
            Arg::Bytes(b) => std::str::from_utf8(b).ok(),
        }
    }

    fn to_cstring(&self) -> Result<CString, std::ffi::NulError> {
        cstring_from_bytes(self.as_bytes())
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Str(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Str(s)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(b: Vec<u8>) -> Self {
        Arg::Bytes(b)
    }
}

/// How the child's environment is constructed (spec.md §4.2 step 2, §6).
#[derive(Debug, Clone)]
pub enum Environment {
    /// Start from the parent's environment, remove any key present in
    /// `overrides`, then append `overrides` followed by the remaining
    /// inherited pairs.
    Inherit(Vec<(Arg, Arg)>),
    /// Emit only the given entries.
    Custom(Vec<(Arg, Arg)>),
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Inherit(Vec::new())
    }
}

/// Marshals the argv vector (spec.md §4.2 step 1): `argv[0]` is the override
/// if present, otherwise the executable path; each argument becomes a
/// NUL-terminated byte string.
pub(crate) fn marshal_argv(
    executable_path: &str,
    args: &[Arg],
    argv0_override: Option<&Arg>,
) -> Result<Vec<CString>, std::ffi::NulError> {
    let argv0 = match argv0_override {
        Some(over) => over.to_cstring()?,
        None => cstring_from_bytes(executable_path.as_bytes())?,
    };
    let mut out = Vec::with_capacity(args.len() + 1);
    out.push(argv0);
    for arg in args {
        out.push(arg.to_cstring()?);
    }
    Ok(out)
}

/// Marshals the envp vector (spec.md §4.2 step 2), preserving the source's
/// verbatim behaviour on the open question about raw-bytes override keys
/// (spec.md §9): removal of a same-named inherited key only happens for
/// overrides whose key has a valid UTF-8 form.
pub(crate) fn marshal_envp(env: &Environment) -> Result<Vec<CString>, std::ffi::NulError> {
    let pairs: Vec<(Arg, Arg)> = match env {
        Environment::Custom(entries) => entries.clone(),
        Environment::Inherit(overrides) => {
            let override_str_keys: std::collections::HashSet<String> = overrides
                .iter()
                .filter_map(|(k, _)| k.as_str().map(|s| s.to_string()))
                .collect();

            let mut merged: Vec<(Arg, Arg)> = overrides.clone();
            for (key, value) in std::env::vars_os() {
                let key_str = key.to_string_lossy().into_owned();
                if override_str_keys.contains(&key_str) {
                    continue;
                }
                merged.push((
                    Arg::Bytes(key.into_vec_lossy()),
                    Arg::Bytes(value.into_vec_lossy()),
                ));
            }
            merged
        }
    };

    pairs
        .into_iter()
        .map(|(k, v)| {
            let mut entry = k.as_bytes().to_vec();
            entry.push(b'=');
            entry.extend_from_slice(v.as_bytes());
            cstring_from_bytes(&entry)
        })
        .collect()
}

/// Thin OS-string-to-bytes helper; `OsString` has no public owned-bytes
/// conversion in std on all platforms, but on unix it's always valid bytes.
trait IntoVecLossy {
    fn into_vec_lossy(self) -> Vec<u8>;
}

impl IntoVecLossy for std::ffi::OsString {
    fn into_vec_lossy(self) -> Vec<u8> {
        use std::os::unix::ffi::OsStringExt;
        self.into_vec()
    }
}

/// A subprocess to spawn: executable path (no PATH search, spec.md §6),
/// arguments, environment, and the three stdio configuration descriptors.
#[derive(Debug, Clone)]
pub struct Command {
    pub(crate) executable_path: PathBuf,
    pub(crate) args: Vec<Arg>,
    pub(crate) argv0_override: Option<Arg>,
    pub(crate) environment: Environment,
    pub(crate) stdin: StdinConfig,
    pub(crate) stdout: StdoutConfig,
    pub(crate) stderr: StdoutConfig,
}

/// Builder for [`Command`], in the teacher's consuming-builder style.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    executable_path: Option<PathBuf>,
    args: Vec<Arg>,
    argv0_override: Option<Arg>,
    environment: Environment,
    stdin: StdinConfig,
    stdout: StdoutConfig,
    stderr: StdoutConfig,
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self {
            executable_path: None,
            args: Vec::new(),
            argv0_override: None,
            environment: Environment::default(),
            stdin: StdinConfig::None,
            stdout: StdoutConfig::Discard,
            stderr: StdoutConfig::Discard,
        }
    }

    pub fn executable_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_path = Some(path.into());
        self
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn argv0(mut self, argv0: impl Into<Arg>) -> Self {
        self.argv0_override = Some(argv0.into());
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn stdin(mut self, stdin: StdinConfig) -> Self {
        self.stdin = stdin;
        self
    }

    pub fn stdout(mut self, stdout: StdoutConfig) -> Self {
        self.stdout = stdout;
        self
    }

    pub fn stderr(mut self, stderr: StdoutConfig) -> Self {
        self.stderr = stderr;
        self
    }
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder<Command> for CommandBuilder {
    fn build(self) -> Command {
        Command {
            executable_path: self.executable_path.expect("executable_path must be set"),
            args: self.args,
            argv0_override: self.argv0_override,
            environment: self.environment,
            stdin: self.stdin,
            stdout: self.stdout,
            stderr: self.stderr,
        }
    }
}
