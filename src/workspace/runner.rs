// src/workspace/runner.rs

//! Child process execution for one dispatched task.
//!
//! The runner spawns the configuration script in its own process group,
//! forwards stdout/stderr line-wise to the workspace loop, watches the
//! dispatch's cancel token, and reports completion.
//!
//! A stdout line equal to the readiness sentinel completes the run while the
//! process keeps going; the eventual exit is then only logged. A cancelled
//! run kills the whole process tree and reports nothing; the graph has
//! already discarded the execution.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exec::{KillSignal, kill_process_tree};
use crate::graph::CompletionTicket;
use crate::ipc;
use crate::workspace::{OutputSource, ScriptOptions, WsMsg};

/// Everything a runner needs, captured at dispatch time.
pub(crate) struct RunSpec {
    pub project: PathBuf,
    pub config_dir: PathBuf,
    pub epoch: u64,
    pub watch_mode: bool,
    pub script_options: ScriptOptions,
    pub cancel: CancellationToken,
    pub ticket: CompletionTicket,
    pub msg_tx: mpsc::UnboundedSender<WsMsg>,
}

/// Fire-and-forget: spawns the child and the pipe pumps on the runtime.
pub(crate) fn spawn_project_runner(spec: RunSpec) {
    tokio::spawn(run_project(spec));
}

async fn run_project(spec: RunSpec) {
    let RunSpec {
        project,
        config_dir,
        epoch,
        watch_mode,
        script_options,
        cancel,
        ticket,
        msg_tx,
    } = spec;

    let mut cmd = Command::new(&project);
    cmd.current_dir(&config_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env(ipc::RUNNER_ENV, "1")
        .kill_on_drop(true);
    if watch_mode {
        cmd.env(ipc::WATCH_ENV, "1");
    }
    if let Some(env_file) = &script_options.env_file {
        cmd.env(ipc::ENV_FILE_ENV, env_file);
    }
    if script_options.force_colors {
        cmd.env(ipc::FORCE_COLOR_ENV, "1");
    }
    // Own process group so the whole subtree can be killed at once.
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(project = %project.display(), error = %err, "failed to spawn task process");
            let _ = msg_tx.send(WsMsg::ChildOutput {
                project: project.clone(),
                epoch,
                source: OutputSource::Stderr,
                chunk: format!("failed to spawn {}: {err}\n", project.display()),
            });
            let _ = msg_tx.send(WsMsg::RunFinished {
                ticket,
                success: false,
            });
            return;
        }
    };

    let pid = child.id().unwrap_or_default();
    info!(project = %project.display(), pid, "task process started");
    let _ = msg_tx.send(WsMsg::ChildStarted {
        project: project.clone(),
        epoch,
        pid,
    });

    let sentinel_seen = Arc::new(AtomicBool::new(false));
    let stdout_pump = child
        .stdout
        .take()
        .map(|stdout| {
            pump_stdout(
                stdout,
                project.clone(),
                epoch,
                ticket.clone(),
                msg_tx.clone(),
                Arc::clone(&sentinel_seen),
            )
        });
    let stderr_pump = child
        .stderr
        .take()
        .map(|stderr| pump_stderr(stderr, project.clone(), epoch, msg_tx.clone()));

    tokio::select! {
        status = child.wait() => {
            // Drain the pipes before reporting, so every chunk lands in the
            // output buffer ahead of the exit record.
            if let Some(pump) = stdout_pump {
                let _ = pump.await;
            }
            if let Some(pump) = stderr_pump {
                let _ = pump.await;
            }

            let code = match status {
                Ok(status) => status.code().unwrap_or(-1),
                Err(err) => {
                    warn!(project = %project.display(), error = %err, "waiting for task process failed");
                    -1
                }
            };
            let after_sentinel = sentinel_seen.load(Ordering::SeqCst);
            info!(
                project = %project.display(),
                exit_code = code,
                after_sentinel,
                "task process exited"
            );

            let _ = msg_tx.send(WsMsg::ChildExited {
                project: project.clone(),
                epoch,
                code: Some(code),
                log_exit: after_sentinel,
            });
            if !after_sentinel {
                let _ = msg_tx.send(WsMsg::RunFinished {
                    ticket,
                    success: code == 0,
                });
            }
        }

        _ = cancel.cancelled() => {
            debug!(project = %project.display(), pid, "run cancelled; killing process tree");
            let _ = msg_tx.send(WsMsg::ChildOutput {
                project: project.clone(),
                epoch,
                source: OutputSource::Stderr,
                chunk: "terminated\n".to_string(),
            });
            kill_process_tree(pid, KillSignal::Kill).await;
            let _ = child.wait().await;
            let _ = msg_tx.send(WsMsg::ChildExited {
                project: project.clone(),
                epoch,
                code: None,
                log_exit: false,
            });
            // No completion: the execution this run belonged to is gone.
        }
    }
}

/// Forward stdout lines, watching for the readiness sentinel. The sentinel
/// line itself is protocol, not output, and is not forwarded.
fn pump_stdout(
    stdout: ChildStdout,
    project: PathBuf,
    epoch: u64,
    ticket: CompletionTicket,
    msg_tx: mpsc::UnboundedSender<WsMsg>,
    sentinel_seen: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim() == ipc::READY_SENTINEL {
                if !sentinel_seen.swap(true, Ordering::SeqCst) {
                    debug!(project = %project.display(), "readiness sentinel received");
                    let _ = msg_tx.send(WsMsg::RunFinished {
                        ticket: ticket.clone(),
                        success: true,
                    });
                }
                continue;
            }
            let sent = msg_tx.send(WsMsg::ChildOutput {
                project: project.clone(),
                epoch,
                source: OutputSource::Stdout,
                chunk: format!("{line}\n"),
            });
            if sent.is_err() {
                break;
            }
        }
    })
}

fn pump_stderr(
    stderr: ChildStderr,
    project: PathBuf,
    epoch: u64,
    msg_tx: mpsc::UnboundedSender<WsMsg>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let reader = BufReader::new(stderr);
        let mut lines = reader.lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let sent = msg_tx.send(WsMsg::ChildOutput {
                project: project.clone(),
                epoch,
                source: OutputSource::Stderr,
                chunk: format!("{line}\n"),
            });
            if sent.is_err() {
                break;
            }
        }
    })
}
