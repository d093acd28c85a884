// src/workspace/mod.rs

//! Top-level orchestration.
//!
//! The [`Workspace`](core::Workspace) owns a [`TaskGraph`](crate::graph::TaskGraph)
//! and one [`Project`](project::Project) per configuration. It drives
//! coalesced configuration (re)loads, filesystem watching, and child-process
//! execution, and translates graph lifecycle events into workspace events.
//!
//! All state lives on the workspace loop; child processes, watchers and the
//! debounce timer run outside and report back over the message channel.

use std::fmt;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::warn;

use crate::graph::{CompletionTicket, Jobs, TaskStatus, TreeStatus};

pub mod core;
pub mod project;
pub mod runner;

pub use self::core::Workspace;
pub use self::project::Project;

/// Options for launching child task scripts.
#[derive(Debug, Clone, Default)]
pub struct ScriptOptions {
    /// Path passed to children via the env-file marker.
    pub env_file: Option<PathBuf>,
    /// Ask children to emit colors even though their stdio is piped.
    pub force_colors: bool,
}

/// Everything the workspace needs to run.
#[derive(Debug, Clone)]
pub struct WorkspaceOptions {
    /// Root configuration files; dependencies are discovered from these.
    pub roots: Vec<PathBuf>,
    pub jobs: Jobs,
    /// Keep watching inputs and re-running stale tasks after the first pass.
    pub watch_mode: bool,
    pub script_options: ScriptOptions,
}

/// Aggregate workspace status: the graph's tree status, or `Error` while the
/// last configuration read produced an invalid graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceStatus {
    Pending,
    Running,
    Ok,
    Fail,
    Error,
}

impl WorkspaceStatus {
    pub fn from_tree(status: TreeStatus) -> Self {
        match status {
            TreeStatus::Pending => WorkspaceStatus::Pending,
            TreeStatus::Running => WorkspaceStatus::Running,
            TreeStatus::Ok => WorkspaceStatus::Ok,
            TreeStatus::Fail => WorkspaceStatus::Fail,
        }
    }
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkspaceStatus::Pending => "pending",
            WorkspaceStatus::Running => "running",
            WorkspaceStatus::Ok => "ok",
            WorkspaceStatus::Fail => "fail",
            WorkspaceStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Which child stream a chunk of output arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    Stdout,
    Stderr,
}

/// Events the workspace reports to its embedder (CLI, UI).
///
/// Project-scoped variants carry the project's configuration path.
#[derive(Debug, Clone)]
pub enum WorkspaceEvent {
    ProjectAdded(PathBuf),
    ProjectRemoved(PathBuf),
    ProjectsChanged,
    WorkspaceStatusChanged(WorkspaceStatus),
    BuildStatusChanged {
        project: PathBuf,
        status: TaskStatus,
    },
    BuildStdout {
        project: PathBuf,
        chunk: String,
    },
    BuildStderr {
        project: PathBuf,
        chunk: String,
    },
    PidChanged {
        project: PathBuf,
        pid: Option<u32>,
    },
}

/// Messages feeding the workspace loop from runners, watchers, timers, and
/// external controllers.
#[derive(Debug)]
pub(crate) enum WsMsg {
    /// Merge a change notification into the pending coalesced update.
    ScheduleUpdate {
        project: Option<PathBuf>,
        reread_configs: bool,
    },
    /// The debounce timer elapsed. Stale sequence numbers are ignored.
    UpdateDue { seq: u64 },
    /// A runner finished (or declared readiness via the sentinel).
    RunFinished {
        ticket: CompletionTicket,
        success: bool,
    },
    ChildStarted {
        project: PathBuf,
        epoch: u64,
        pid: u32,
    },
    ChildOutput {
        project: PathBuf,
        epoch: u64,
        source: OutputSource,
        chunk: String,
    },
    /// The child process is gone. `code` is `None` for a cancelled run;
    /// `log_exit` asks for a `process exited with code=N` line in the
    /// output (the run already completed via the readiness sentinel).
    ChildExited {
        project: PathBuf,
        epoch: u64,
        code: Option<i32>,
        log_exit: bool,
    },
    FileChanged {
        project: PathBuf,
        path: PathBuf,
    },
    Stop,
}

/// Cloneable handle for poking the workspace loop from outside.
#[derive(Debug, Clone)]
pub struct WorkspaceController {
    pub(crate) tx: mpsc::UnboundedSender<WsMsg>,
}

impl WorkspaceController {
    /// Force an update pass that marks this project's task as changed.
    pub fn schedule_update(&self, project: PathBuf) {
        self.send(WsMsg::ScheduleUpdate {
            project: Some(project),
            reread_configs: false,
        });
    }

    /// Request a full configuration re-read.
    pub fn reread_configs(&self) {
        self.send(WsMsg::ScheduleUpdate {
            project: None,
            reread_configs: true,
        });
    }

    /// Stop the workspace: cancel pending updates, reset all tasks, dispose
    /// all projects, and let the loop exit.
    pub fn stop(&self) {
        self.send(WsMsg::Stop);
    }

    fn send(&self, msg: WsMsg) {
        if self.tx.send(msg).is_err() {
            warn!("workspace loop is gone; control message dropped");
        }
    }
}
