//! Process lifecycle and cancellation scenarios (spec.md §8 scenarios 1-4,
//! 6, 7).

mod common;

use std::time::Duration;
use subprocess_rt::{spawn, Builder, CancellationError, CommandBuilder, InitError, Signal};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn signal_kill_race() {
    let sleep = common::resolve("sleep");
    let command = CommandBuilder::new()
        .executable_path(sleep)
        .arg("86400")
        .build();
    let subprocess = spawn(command, Handle::current()).await.unwrap();

    let killer = subprocess.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        killer.kill(&CancellationToken::new()).await.unwrap();
    });

    let exit_status = subprocess
        .wait_for_termination(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(exit_status, -libc::SIGKILL);
}

#[tokio::test]
async fn normal_exit() {
    let sleep = common::resolve("sleep");
    let command = CommandBuilder::new()
        .executable_path(sleep)
        .arg("1")
        .build();
    let subprocess = spawn(command, Handle::current()).await.unwrap();
    let exit_status = subprocess
        .wait_for_termination(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(exit_status, 0);
}

#[tokio::test]
async fn late_cancel_of_wait_does_not_disturb_other_waiters() {
    let sleep = common::resolve("sleep");
    let command = CommandBuilder::new()
        .executable_path(sleep)
        .arg("2")
        .build();
    let subprocess = spawn(command, Handle::current()).await.unwrap();

    let detached_cancel = CancellationToken::new();
    let detached_subprocess = subprocess.clone();
    let detached_cancel_clone = detached_cancel.clone();
    let detached = tokio::spawn(async move {
        detached_subprocess
            .wait_for_termination(&detached_cancel_clone)
            .await
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    detached_cancel.cancel();
    assert_eq!(detached.await.unwrap(), Err(CancellationError));

    let exit_status = subprocess
        .wait_for_termination(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(exit_status, 0);
}

#[tokio::test]
async fn multiple_waiters_all_observe_termination() {
    let sleep = common::resolve("sleep");
    let command = CommandBuilder::new()
        .executable_path(sleep)
        .arg("2")
        .build();
    let subprocess = spawn(command, Handle::current()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..3 {
        let subprocess = subprocess.clone();
        handles.push(tokio::spawn(async move {
            subprocess
                .wait_for_termination(&CancellationToken::new())
                .await
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), Ok(0));
    }
}

#[tokio::test]
async fn scoped_terminate_kills_body_process_on_return() {
    let sleep = common::resolve("sleep");
    let command = CommandBuilder::new()
        .executable_path(sleep)
        .arg("86400")
        .build();
    let subprocess = spawn(command, Handle::current()).await.unwrap();

    let cancel = CancellationToken::new();
    let outcome = subprocess
        .terminate_after(
            Signal::Term,
            async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Ok::<(), CancellationError>(())
            },
            &cancel,
        )
        .await;
    assert!(matches!(outcome, subprocess_rt::ScopedOutcome::Ok(())));

    let exit_status = subprocess
        .wait_for_termination(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(exit_status, -libc::SIGTERM);
}

#[tokio::test]
async fn executable_not_found_surfaces_exec_error() {
    let command = CommandBuilder::new()
        .executable_path("/usr/bin/404_not_found")
        .build();
    let result = spawn(command, Handle::current()).await;
    match result {
        Err(InitError::Exec(errno)) => assert_eq!(errno.0, libc::ENOENT),
        Err(other) => panic!("expected InitError::Exec(ENOENT), got {other:?}"),
        Ok(_) => panic!("expected InitError::Exec(ENOENT), got Ok"),
    }
}
