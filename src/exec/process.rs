// src/exec/process.rs

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

/// Everything a finished one-shot subprocess produced.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// stdout and stderr merged in arrival order.
    pub combined: String,
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Spawn `cmd` with piped stdio and wait for it to close, collecting stdout,
/// stderr, and their interleaving.
///
/// Both pipes are drained concurrently so neither can fill and stall the
/// child; chunks are merged over a channel, which preserves arrival order in
/// `combined`.
pub async fn run_captured(mut cmd: Command) -> Result<CapturedOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("spawning captured subprocess")?;

    let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<(Stream, String)>();

    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, Stream::Stdout, chunk_tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, Stream::Stderr, chunk_tx.clone());
    }
    drop(chunk_tx);

    let mut out = String::new();
    let mut err = String::new();
    let mut combined = String::new();
    while let Some((stream, chunk)) = chunk_rx.recv().await {
        combined.push_str(&chunk);
        match stream {
            Stream::Stdout => out.push_str(&chunk),
            Stream::Stderr => err.push_str(&chunk),
        }
    }

    let status = child
        .wait()
        .await
        .context("waiting for captured subprocess")?;
    let exit_code = status.code().unwrap_or(-1);
    debug!(exit_code, "captured subprocess closed");

    Ok(CapturedOutput {
        exit_code,
        stdout: out,
        stderr: err,
        combined,
    })
}

fn spawn_reader<R>(mut reader: R, stream: Stream, tx: mpsc::UnboundedSender<(Stream, String)>)
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if tx.send((stream, chunk)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}
