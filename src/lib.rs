// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod ipc;
pub mod logging;
pub mod util;
pub mod watch;
pub mod workspace;

use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::errors::Result;
use crate::workspace::{Workspace, WorkspaceEvent, WorkspaceStatus};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - the workspace (graph + projects + config loader + watchers)
/// - a plain event printer forwarding child output to our own stdio
/// - Ctrl-C handling in watch mode
///
/// Returns the process exit code: non-zero when the workspace settles in
/// `fail` or `error`.
pub async fn run(args: CliArgs) -> Result<i32> {
    let options = args.workspace_options();
    let watch_mode = options.watch_mode;

    let (mut workspace, mut events) = Workspace::new(options);

    if watch_mode {
        // Ctrl-C -> graceful stop.
        let controller = workspace.controller();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            controller.stop();
        });
    }

    // Plain front end: forward child output, log the rest.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                WorkspaceEvent::BuildStdout { chunk, .. } => print!("{chunk}"),
                WorkspaceEvent::BuildStderr { chunk, .. } => eprint!("{chunk}"),
                WorkspaceEvent::ProjectAdded(path) => {
                    debug!(project = %path.display(), "project added");
                }
                WorkspaceEvent::ProjectRemoved(path) => {
                    debug!(project = %path.display(), "project removed");
                }
                WorkspaceEvent::BuildStatusChanged { project, status } => {
                    info!(project = %project.display(), status = %status, "task status");
                }
                WorkspaceEvent::WorkspaceStatusChanged(status) => {
                    info!(status = %status, "workspace status");
                }
                WorkspaceEvent::ProjectsChanged | WorkspaceEvent::PidChanged { .. } => {}
            }
        }
    });

    workspace.run().await?;

    if let Some(error) = workspace.workspace_error() {
        eprintln!("{error}");
    }

    let code = match workspace.workspace_status() {
        WorkspaceStatus::Fail | WorkspaceStatus::Error => 1,
        _ => 0,
    };
    Ok(code)
}
