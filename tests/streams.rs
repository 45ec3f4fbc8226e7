//! Stdio stream scenarios and round-trip laws (spec.md §8 scenarios 5, 8;
//! round-trip laws).

mod common;

use std::io::Write;
use subprocess_rt::{spawn, Builder, CommandBuilder, StdinConfig, StdoutConfig};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn stdin_piped_through_wc_l() {
    let wc = common::resolve("wc");
    let command = CommandBuilder::new()
        .executable_path(wc)
        .arg("-l")
        .stdin(StdinConfig::PipeFromParent(None))
        .stdout(StdoutConfig::PipeToParent(None))
        .build();
    let subprocess = spawn(command, Handle::current()).await.unwrap();

    let cancel = CancellationToken::new();
    subprocess
        .stdin
        .as_ref()
        .unwrap()
        .write_all(b"1\n2\n3", &cancel)
        .unwrap();
    subprocess.stdin.as_ref().unwrap().close().unwrap();

    let captured = subprocess
        .read_output_and_wait(true, false, &cancel)
        .await
        .unwrap();
    assert_eq!(captured.exit_status, 0);
    assert_eq!(std::str::from_utf8(&captured.stdout).unwrap().trim(), "2");
}

#[tokio::test]
async fn write_all_text_then_read_all_round_trips_through_cat() {
    let cat = common::resolve("cat");
    let command = CommandBuilder::new()
        .executable_path(cat)
        .stdin(StdinConfig::PipeFromParent(None))
        .stdout(StdoutConfig::PipeToParent(None))
        .build();
    let subprocess = spawn(command, Handle::current()).await.unwrap();

    let cancel = CancellationToken::new();
    let text = "hello, round trip\n";
    subprocess
        .stdin
        .as_ref()
        .unwrap()
        .write_all_text(text, &cancel)
        .unwrap();
    subprocess.stdin.as_ref().unwrap().close().unwrap();

    let output = subprocess
        .stdout
        .as_ref()
        .unwrap()
        .read_all_text(&cancel)
        .await
        .unwrap();
    assert_eq!(output.as_deref(), Some(text));

    let exit_status = subprocess.wait_for_termination(&cancel).await.unwrap();
    assert_eq!(exit_status, 0);
}

#[tokio::test]
async fn large_output_is_fully_captured_or_discarded() {
    let mut big_file = tempfile::NamedTempFile::new().unwrap();
    let line = b"the quick brown fox jumps over the lazy dog\n";
    for _ in 0..20_000 {
        big_file.write_all(line).unwrap();
    }
    big_file.flush().unwrap();
    let expected_len = line.len() * 20_000;

    let cat = common::resolve("cat");
    let command = CommandBuilder::new()
        .executable_path(&cat)
        .arg(big_file.path().to_str().unwrap())
        .stdout(StdoutConfig::PipeToParent(None))
        .build();
    let subprocess = spawn(command, Handle::current()).await.unwrap();
    let cancel = CancellationToken::new();
    let captured = subprocess
        .read_output_and_wait(true, false, &cancel)
        .await
        .unwrap();
    assert_eq!(captured.exit_status, 0);
    assert_eq!(captured.stdout.len(), expected_len);

    let command = CommandBuilder::new()
        .executable_path(&cat)
        .arg(big_file.path().to_str().unwrap())
        .stdout(StdoutConfig::PipeToParent(None))
        .build();
    let subprocess = spawn(command, Handle::current()).await.unwrap();
    let discarded = subprocess
        .read_output_and_wait(false, false, &cancel)
        .await
        .unwrap();
    assert_eq!(discarded.exit_status, 0);
    assert_eq!(discarded.stdout.len(), 0);
}

#[tokio::test]
async fn write_within_pipe_buffer_returns_full_count() {
    let cat = common::resolve("cat");
    let command = CommandBuilder::new()
        .executable_path(cat)
        .stdin(StdinConfig::PipeFromParent(None))
        .stdout(StdoutConfig::PipeToParent(None))
        .build();
    let subprocess = spawn(command, Handle::current()).await.unwrap();

    let cancel = CancellationToken::new();
    let payload = vec![b'x'; 4096];
    let written = subprocess
        .stdin
        .as_ref()
        .unwrap()
        .write(&payload, &cancel)
        .unwrap();
    assert_eq!(written, Some(payload.len()));
    subprocess.stdin.as_ref().unwrap().close().unwrap();

    // Read concurrently with the termination wait (spec.md §4.7): the
    // process exits as soon as its stdin is closed, so a read issued only
    // after waiting would race the watcher's deferred close of stdout.
    let captured = subprocess
        .read_output_and_wait(true, false, &cancel)
        .await
        .unwrap();
    assert_eq!(captured.exit_status, 0);
    assert_eq!(captured.stdout, payload.as_slice());
}
