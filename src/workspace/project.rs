// src/workspace/project.rs

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::config::TaskConfig;
use crate::graph::TaskStatus;
use crate::watch::ProjectWatcher;

/// Workspace-side wrapper over one configuration: owns the task's child
/// process handle, output buffer, and filesystem watcher.
#[derive(Debug)]
pub struct Project {
    config_path: PathBuf,
    name: Option<String>,
    config_error: Option<String>,
    watch: Vec<PathBuf>,
    ignore: Vec<PathBuf>,
    deps: Vec<PathBuf>,
    /// Merged stdout + stderr in arrival order; reset at the start of each
    /// run, not on status changes.
    output: String,
    started_at_ms: Option<u64>,
    stopped_at_ms: Option<u64>,
    pid: Option<u32>,
    exit_code: Option<i32>,
    /// Cancel token of the most recent dispatch; fired when a newer run or
    /// disposal needs the previous child gone.
    pub(crate) run_cancel: Option<CancellationToken>,
    /// Bumped on every `begin_run`; runner messages from older epochs are
    /// dropped so a lingering child cannot pollute a newer run.
    pub(crate) run_epoch: u64,
    pub(crate) watcher: Option<ProjectWatcher>,
    /// Last status reported via `build_status_changed`, to emit transitions
    /// only.
    pub(crate) last_status: TaskStatus,
}

impl Project {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_path,
            name: None,
            config_error: None,
            watch: Vec::new(),
            ignore: Vec::new(),
            deps: Vec::new(),
            output: String::new(),
            started_at_ms: None,
            stopped_at_ms: None,
            pid: None,
            exit_code: None,
            run_cancel: None,
            run_epoch: 0,
            watcher: None,
            last_status: TaskStatus::Pending,
        }
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Human-readable name: the declared one, falling back to the config
    /// file's name.
    pub fn name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.config_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config_path.to_string_lossy().into_owned())
    }

    pub fn config_error(&self) -> Option<&str> {
        self.config_error.as_deref()
    }

    pub fn watch_paths(&self) -> &[PathBuf] {
        &self.watch
    }

    pub fn ignore_paths(&self) -> &[PathBuf] {
        &self.ignore
    }

    pub fn deps(&self) -> &[PathBuf] {
        &self.deps
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn started_at_ms(&self) -> Option<u64> {
        self.started_at_ms
    }

    pub fn stopped_at_ms(&self) -> Option<u64> {
        self.stopped_at_ms
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Apply a (re)loaded configuration.
    pub(crate) fn apply_config(&mut self, error: Option<String>, config: Option<&TaskConfig>) {
        self.config_error = error;
        match config {
            Some(config) => {
                self.name = config.name.clone();
                self.watch = config.watch.clone();
                self.ignore = config.ignore.clone();
                self.deps = config.deps.clone();
            }
            None => {
                self.watch.clear();
                self.ignore.clear();
                self.deps.clear();
            }
        }
    }

    /// Reset run-scoped state at the start of a new run. Returns the new
    /// run epoch.
    pub(crate) fn begin_run(&mut self, cancel: CancellationToken) -> u64 {
        self.output.clear();
        self.started_at_ms = Some(now_ms());
        self.stopped_at_ms = None;
        self.pid = None;
        self.exit_code = None;
        self.run_cancel = Some(cancel);
        self.run_epoch += 1;
        self.run_epoch
    }

    pub(crate) fn append_output(&mut self, chunk: &str) {
        self.output.push_str(chunk);
    }

    pub(crate) fn set_pid(&mut self, pid: Option<u32>) {
        self.pid = pid;
    }

    pub(crate) fn record_exit(&mut self, code: i32) {
        self.exit_code = Some(code);
        self.stopped_at_ms = Some(now_ms());
    }

    pub(crate) fn record_stop_time(&mut self) {
        if self.stopped_at_ms.is_none() {
            self.stopped_at_ms = Some(now_ms());
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
