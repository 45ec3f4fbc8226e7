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

//! 'cat <file | cat | wc -l', assembled from three `spawn` calls chained
//! through file-backed pipe descriptors.

use subprocess_rt::{spawn, Builder, CommandBuilder, StdinConfig, StdoutConfig};
use tokio_util::sync::CancellationToken;

fn open_read(path: &str) -> std::os::unix::io::RawFd {
    let c_path = std::ffi::CString::new(path).unwrap();
    unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY) }
}

fn open_write(path: &str) -> std::os::unix::io::RawFd {
    let c_path = std::ffi::CString::new(path).unwrap();
    unsafe {
        libc::open(
            c_path.as_ptr(),
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            0o600,
        )
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cancel = CancellationToken::new();

    let stage1_out = "/tmp/subprocess_rt_demo_stage1.txt";

    let cat1 = CommandBuilder::new()
        .executable_path("/bin/cat")
        .arg("Cargo.toml")
        .stdout(StdoutConfig::WriteToFile(open_write(stage1_out), true))
        .build();
    let cat1 = spawn(cat1, tokio::runtime::Handle::current())
        .await
        .unwrap();
    let exit_status = cat1.wait_for_termination(&cancel).await.unwrap();
    println!("first `cat` exited with {exit_status}");

    let wc = CommandBuilder::new()
        .executable_path("/usr/bin/wc")
        .arg("-l")
        .stdin(StdinConfig::ReadFromFile(open_read(stage1_out), true))
        .stdout(StdoutConfig::PipeToParent(None))
        .build();
    let wc = spawn(wc, tokio::runtime::Handle::current()).await.unwrap();
    let captured = wc.read_output_and_wait(true, false, &cancel).await.unwrap();
    println!(
        "line count: {}",
        std::str::from_utf8(&captured.stdout).unwrap().trim()
    );

    let _ = std::fs::remove_file(stage1_out);
}
