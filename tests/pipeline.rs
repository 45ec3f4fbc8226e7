//! Pipeline scenario (spec.md §8 scenario 9): `cat file | grep -o NEEDLE |
//! wc -l`, assembled from three `spawn` calls chained through file-backed
//! pipe descriptors rather than a single shell pipeline, since chaining
//! several processes is left to the caller (spec.md §1).

mod common;

use std::ffi::CString;
use std::io::Write;
use std::os::unix::io::RawFd;
use subprocess_rt::{spawn, Builder, CommandBuilder, StdinConfig, StdoutConfig};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

fn open_read(path: &std::path::Path) -> RawFd {
    let c_path = CString::new(path.to_str().unwrap()).unwrap();
    let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY) };
    assert!(fd >= 0, "failed to open {path:?} for reading");
    fd
}

fn open_write(path: &std::path::Path) -> RawFd {
    let c_path = CString::new(path.to_str().unwrap()).unwrap();
    let fd = unsafe {
        libc::open(
            c_path.as_ptr(),
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            0o600,
        )
    };
    assert!(fd >= 0, "failed to open {path:?} for writing");
    fd
}

#[tokio::test]
async fn cat_grep_wc_pipeline_via_file_backed_descriptors() {
    let needle = "Elizabeth";
    let occurrences = 7;

    let mut input_file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..100 {
        if i % (100 / occurrences) == 0 && i / (100 / occurrences) < occurrences {
            writeln!(input_file, "a line mentioning {needle} by name").unwrap();
        } else {
            writeln!(input_file, "an unrelated line {i}").unwrap();
        }
    }
    input_file.flush().unwrap();

    let stage1_out = tempfile::NamedTempFile::new().unwrap();
    let stage2_out = tempfile::NamedTempFile::new().unwrap();

    let cat = common::resolve("cat");
    let grep = common::resolve("grep");
    let wc = common::resolve("wc");
    let cancel = CancellationToken::new();

    let cat_command = CommandBuilder::new()
        .executable_path(cat)
        .arg(input_file.path().to_str().unwrap())
        .stdout(StdoutConfig::WriteToFile(
            open_write(stage1_out.path()),
            true,
        ))
        .build();
    let cat_proc = spawn(cat_command, Handle::current()).await.unwrap();
    assert_eq!(cat_proc.wait_for_termination(&cancel).await.unwrap(), 0);

    let grep_command = CommandBuilder::new()
        .executable_path(grep)
        .arg("-o")
        .arg(needle)
        .stdin(StdinConfig::ReadFromFile(
            open_read(stage1_out.path()),
            true,
        ))
        .stdout(StdoutConfig::WriteToFile(
            open_write(stage2_out.path()),
            true,
        ))
        .build();
    let grep_proc = spawn(grep_command, Handle::current()).await.unwrap();
    assert_eq!(grep_proc.wait_for_termination(&cancel).await.unwrap(), 0);

    let wc_command = CommandBuilder::new()
        .executable_path(wc)
        .arg("-l")
        .stdin(StdinConfig::ReadFromFile(
            open_read(stage2_out.path()),
            true,
        ))
        .stdout(StdoutConfig::PipeToParent(None))
        .build();
    let wc_proc = spawn(wc_command, Handle::current()).await.unwrap();
    let captured = wc_proc
        .read_output_and_wait(true, false, &cancel)
        .await
        .unwrap();

    assert_eq!(captured.exit_status, 0);
    assert_eq!(
        std::str::from_utf8(&captured.stdout).unwrap().trim(),
        occurrences.to_string()
    );
}
