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

//! Spawns a long-running child, waits for it in the background while the
//! main task keeps going, then terminates it early via `terminate_after`.

use subprocess_rt::{spawn, Builder, CommandBuilder, ScopedOutcome, Signal};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let command = CommandBuilder::new()
        .executable_path("/bin/sleep")
        .arg("86400")
        .build();
    let subprocess = spawn(command, tokio::runtime::Handle::current())
        .await
        .unwrap();
    println!("spawned pid {}", subprocess.pid());

    let cancel = CancellationToken::new();
    let outcome = subprocess
        .terminate_after(
            Signal::Term,
            async {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                Ok::<(), std::convert::Infallible>(())
            },
            &cancel,
        )
        .await;

    match outcome {
        ScopedOutcome::Ok(()) => println!("body finished, child was terminated"),
        ScopedOutcome::Cancelled => println!("cancelled"),
        ScopedOutcome::Err(e) => println!("body failed: {e:?}"),
    }

    let exit_status = subprocess.wait_for_termination(&cancel).await.unwrap();
    println!("exit status: {exit_status}");
}
