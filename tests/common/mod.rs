//! Shared test fixtures: resolves real system binaries via `PATH` so the
//! integration suite never depends on the library's own PATH-less `execve`
//! to find them.

use std::path::PathBuf;

pub fn resolve(name: &str) -> PathBuf {
    let path = std::env::var_os("PATH").expect("PATH must be set to run these tests");
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return candidate;
        }
    }
    panic!("could not resolve `{name}` via PATH");
}
