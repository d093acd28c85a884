// src/workspace/core.rs

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::loader::canonical_config_path;
use crate::config::{ConfigLoader, Declaration};
use crate::errors::Result;
use crate::exec::{KillSignal, kill_process_tree};
use crate::graph::{CycleError, GraphEvent, RunRequest, TaskGraph, TaskId, TreeStatus};
use crate::util::Multimap;
use crate::watch::{IgnoreSet, spawn_project_watcher};
use crate::workspace::project::Project;
use crate::workspace::runner::{RunSpec, spawn_project_runner};
use crate::workspace::{
    OutputSource, WorkspaceController, WorkspaceEvent, WorkspaceOptions, WorkspaceStatus, WsMsg,
};

/// How long change notifications are coalesced before an update pass runs.
const UPDATE_COALESCE_DELAY: Duration = Duration::from_millis(150);

/// Manifest files next to a configuration that are watched alongside it.
const MANIFEST_SIBLINGS: &[&str] = &["tsconfig.json", "package.json", "package-lock.json"];

/// Top-level orchestrator.
///
/// Owns the task graph and one [`Project`] per configuration, and drives
/// everything from a single event loop: coalesced configuration updates,
/// dispatch requests coming out of the graph, runner and watcher
/// notifications, and graph lifecycle events. All mutation happens on this
/// loop; the only concurrency is child processes, watchers, and the
/// debounce timer reporting back over channels.
#[derive(Debug)]
pub struct Workspace {
    options: WorkspaceOptions,
    graph: TaskGraph,
    loader: ConfigLoader,
    projects: BTreeMap<PathBuf, Project>,

    msg_tx: mpsc::UnboundedSender<WsMsg>,
    msg_rx: mpsc::UnboundedReceiver<WsMsg>,
    run_rx: mpsc::UnboundedReceiver<RunRequest>,
    graph_rx: mpsc::UnboundedReceiver<GraphEvent>,
    event_tx: mpsc::UnboundedSender<WorkspaceEvent>,

    pending_changed: BTreeSet<PathBuf>,
    pending_reread: bool,
    timer_armed: bool,
    timer_seq: u64,

    workspace_error: Option<String>,
    /// Last status reported via `workspace_status_changed`.
    reported_status: WorkspaceStatus,
    stopped: bool,
}

impl Workspace {
    /// Create a workspace and the receiver for its outbound events.
    ///
    /// The initial configuration read is already scheduled; call
    /// [`run`](Self::run) to start processing.
    pub fn new(options: WorkspaceOptions) -> (Self, mpsc::UnboundedReceiver<WorkspaceEvent>) {
        let (run_tx, run_rx) = mpsc::unbounded_channel();
        let (graph_tx, graph_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let graph = TaskGraph::new(options.jobs, run_tx, graph_tx);

        let workspace = Self {
            options,
            graph,
            loader: ConfigLoader::new(),
            projects: BTreeMap::new(),
            msg_tx,
            msg_rx,
            run_rx,
            graph_rx,
            event_tx,
            pending_changed: BTreeSet::new(),
            pending_reread: true,
            timer_armed: false,
            timer_seq: 0,
            workspace_error: None,
            reported_status: WorkspaceStatus::Pending,
            stopped: false,
        };
        (workspace, event_rx)
    }

    /// Handle for poking the loop from outside (UI, signal handlers).
    pub fn controller(&self) -> WorkspaceController {
        WorkspaceController {
            tx: self.msg_tx.clone(),
        }
    }

    /// Drive the workspace.
    ///
    /// In watch mode this runs until [`WorkspaceController::stop`] is
    /// called; otherwise it returns once the workspace settles (ok, fail,
    /// or configuration error), disposing all projects on the way out.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            roots = self.options.roots.len(),
            watch = self.options.watch_mode,
            "workspace started"
        );

        if self.pending_reread || !self.pending_changed.is_empty() {
            self.arm_timer();
        }

        loop {
            tokio::select! {
                Some(msg) = self.msg_rx.recv() => self.handle_msg(msg).await,
                Some(request) = self.run_rx.recv() => self.handle_run_request(request).await,
                Some(event) = self.graph_rx.recv() => self.handle_graph_event(event),
            }

            if self.stopped {
                break;
            }
            if !self.options.watch_mode && self.is_settled() {
                debug!(status = %self.workspace_status(), "workspace settled");
                // Long-running sentinel children would outlive us otherwise.
                self.terminate_children().await;
                break;
            }
        }

        info!(status = %self.workspace_status(), "workspace stopped");
        Ok(())
    }

    /// `error` while the last configuration read produced a cycle, else the
    /// graph's tree status.
    pub fn workspace_status(&self) -> WorkspaceStatus {
        if self.workspace_error.is_some() {
            WorkspaceStatus::Error
        } else {
            WorkspaceStatus::from_tree(self.graph.tree_status())
        }
    }

    /// Human-readable description of the configuration error, if any.
    pub fn workspace_error(&self) -> Option<&str> {
        self.workspace_error.as_deref()
    }

    pub fn project(&self, config_path: &Path) -> Option<&Project> {
        self.projects.get(config_path)
    }

    /// Current projects in breadth-first graph order (dependants before
    /// their dependencies). In the error state the graph is empty and
    /// projects come back in path order.
    pub fn bfs_projects(&self) -> Vec<&Project> {
        if self.workspace_error.is_some() {
            return self.projects.values().collect();
        }
        self.graph
            .bfs_order()
            .iter()
            .filter_map(|id| self.projects.get(Path::new(id)))
            .collect()
    }

    /// Projects this project's task depends on directly.
    pub fn direct_dependencies(&self, config_path: &Path) -> Vec<&Project> {
        self.graph
            .direct_children(&task_id_of(config_path))
            .iter()
            .filter_map(|id| self.projects.get(Path::new(id)))
            .collect()
    }

    /// Projects whose tasks depend on this project directly.
    pub fn direct_dependants(&self, config_path: &Path) -> Vec<&Project> {
        self.graph
            .direct_parents(&task_id_of(config_path))
            .iter()
            .filter_map(|id| self.projects.get(Path::new(id)))
            .collect()
    }

    /// Merge "this project's inputs changed" into the pending update.
    pub fn schedule_update(&mut self, config_path: PathBuf) {
        self.pending_changed.insert(config_path);
        self.arm_timer();
    }

    async fn handle_msg(&mut self, msg: WsMsg) {
        match msg {
            WsMsg::ScheduleUpdate {
                project,
                reread_configs,
            } => {
                if let Some(path) = project {
                    self.pending_changed.insert(path);
                }
                if reread_configs {
                    self.pending_reread = true;
                }
                self.arm_timer();
            }

            WsMsg::UpdateDue { seq } => {
                if seq != self.timer_seq {
                    return;
                }
                self.timer_armed = false;
                self.run_update().await;
            }

            WsMsg::RunFinished { ticket, success } => {
                let effective = self.graph.resolve(&ticket, success);
                if effective {
                    if let Some(project) = self.projects.get_mut(Path::new(ticket.task_id())) {
                        project.record_stop_time();
                    }
                }
                // Follow-up scheduling happens here, on the loop, never from
                // inside the dispatch path.
                self.graph.run();
            }

            WsMsg::ChildStarted {
                project,
                epoch,
                pid,
            } => {
                let current = match self.project_at_epoch(&project, epoch) {
                    Some(p) => {
                        p.set_pid(Some(pid));
                        true
                    }
                    None => false,
                };
                if current {
                    self.emit(WorkspaceEvent::PidChanged {
                        project,
                        pid: Some(pid),
                    });
                }
            }

            WsMsg::ChildOutput {
                project,
                epoch,
                source,
                chunk,
            } => {
                let current = match self.project_at_epoch(&project, epoch) {
                    Some(p) => {
                        p.append_output(&chunk);
                        true
                    }
                    None => false,
                };
                if current {
                    self.emit(match source {
                        OutputSource::Stdout => WorkspaceEvent::BuildStdout { project, chunk },
                        OutputSource::Stderr => WorkspaceEvent::BuildStderr { project, chunk },
                    });
                }
            }

            WsMsg::ChildExited {
                project,
                epoch,
                code,
                log_exit,
            } => {
                let exit_line = match self.project_at_epoch(&project, epoch) {
                    Some(p) => {
                        p.set_pid(None);
                        match code {
                            Some(code) => p.record_exit(code),
                            None => p.record_stop_time(),
                        }
                        if log_exit {
                            let line =
                                format!("process exited with code={}\n", code.unwrap_or(-1));
                            p.append_output(&line);
                            Some(line)
                        } else {
                            None
                        }
                    }
                    None => return,
                };
                self.emit(WorkspaceEvent::PidChanged {
                    project: project.clone(),
                    pid: None,
                });
                if let Some(line) = exit_line {
                    self.emit(WorkspaceEvent::BuildStdout {
                        project,
                        chunk: line,
                    });
                }
            }

            WsMsg::FileChanged { project, path } => {
                debug!(project = %project.display(), path = %path.display(), "input changed");
                if path == project {
                    self.pending_reread = true;
                }
                self.pending_changed.insert(project);
                self.arm_timer();
            }

            WsMsg::Stop => {
                self.stop_internal().await;
            }
        }
    }

    /// The dispatch callback: run one task as a child process.
    async fn handle_run_request(&mut self, request: RunRequest) {
        let path = PathBuf::from(&request.task_id);
        let Some(project) = self.projects.get_mut(&path) else {
            warn!(task = %request.task_id, "dispatch for unknown project; failing");
            let _ = self.msg_tx.send(WsMsg::RunFinished {
                ticket: request.completion,
                success: false,
            });
            return;
        };

        // A broken configuration fails immediately, with the load error as
        // the run's entire output.
        if let Some(error) = project.config_error() {
            let error = format!("{error}\n");
            project.begin_run(request.cancel);
            project.append_output(&error);
            self.emit(WorkspaceEvent::BuildStderr {
                project: path,
                chunk: error,
            });
            let _ = self.msg_tx.send(WsMsg::RunFinished {
                ticket: request.completion,
                success: false,
            });
            return;
        }

        // At most one child per project: take the previous run down first.
        let prior_pid = project.pid();
        if let Some(prior) = project.run_cancel.take() {
            prior.cancel();
        }
        if let Some(pid) = prior_pid {
            kill_process_tree(pid, KillSignal::Kill).await;
        }

        let epoch = project.begin_run(request.cancel.clone());
        let config_dir = parent_dir(&path);
        spawn_project_runner(RunSpec {
            project: path,
            config_dir,
            epoch,
            watch_mode: self.options.watch_mode,
            script_options: self.options.script_options.clone(),
            cancel: request.cancel,
            ticket: request.completion,
            msg_tx: self.msg_tx.clone(),
        });
    }

    fn handle_graph_event(&mut self, event: GraphEvent) {
        match event {
            GraphEvent::TaskStarted(id)
            | GraphEvent::TaskFinished(id)
            | GraphEvent::TaskReset(id) => {
                self.sync_project_status(Path::new(&id));
            }
            GraphEvent::TreeStatusChanged(status) => {
                self.report_workspace_status();
                // Settling flips idle projects between pending and n/a.
                let paths: Vec<PathBuf> = self.projects.keys().cloned().collect();
                for path in paths {
                    self.sync_project_status(&path);
                }
                if matches!(status, TreeStatus::Ok | TreeStatus::Fail) {
                    debug!(status = %status, "task tree settled");
                }
            }
        }
    }

    /// Run the coalesced update: mark changed tasks, optionally re-read the
    /// configuration closure and reconcile projects, then schedule the
    /// graph.
    async fn run_update(&mut self) {
        let changed = std::mem::take(&mut self.pending_changed);
        let reread = std::mem::replace(&mut self.pending_reread, false);
        debug!(changed = changed.len(), reread, "update pass");

        for path in &changed {
            let id = task_id_of(path);
            if self.graph.contains(&id) {
                self.graph.mark_changed(&id);
            }
        }

        if reread {
            let declarations = self.loader.load_all(&self.options.roots).await;

            let mut adjacency: Multimap<TaskId, TaskId> = Multimap::new();
            for (path, declaration) in &declarations {
                let deps: Vec<TaskId> = declaration
                    .config
                    .iter()
                    .flat_map(|config| config.deps.iter())
                    .map(|dep| task_id_of(&canonical_config_path(dep)))
                    .collect();
                adjacency.insert_all(task_id_of(path), deps);
            }

            match self.graph.set_tasks(&adjacency) {
                Ok(()) => {
                    self.workspace_error = None;
                }
                Err(cycle) => {
                    warn!(error = %cycle, "configuration graph is invalid");
                    self.graph.clear();
                    self.workspace_error = Some(render_cycle(&cycle));
                }
            }

            self.reconcile_projects(&declarations).await;
            self.report_workspace_status();
        }

        // Notifications that raced in while the loader ran are queued behind
        // this pass; they will arm a fresh timer rather than run now.
        if self.pending_reread || !self.pending_changed.is_empty() {
            self.arm_timer();
        } else {
            self.graph.run();
        }
    }

    /// Bring the project set in line with the loaded declarations.
    async fn reconcile_projects(&mut self, declarations: &BTreeMap<PathBuf, Declaration>) {
        let removed: Vec<PathBuf> = self
            .projects
            .keys()
            .filter(|path| !declarations.contains_key(*path))
            .cloned()
            .collect();
        for path in removed {
            if let Some(project) = self.projects.remove(&path) {
                info!(project = %path.display(), "project removed");
                dispose_project(project).await;
                self.emit(WorkspaceEvent::ProjectRemoved(path));
            }
        }

        for (path, declaration) in declarations {
            if !self.projects.contains_key(path) {
                info!(project = %path.display(), "project added");
                self.projects.insert(path.clone(), Project::new(path.clone()));
                self.emit(WorkspaceEvent::ProjectAdded(path.clone()));
            }
            if let Some(project) = self.projects.get_mut(path) {
                project.apply_config(declaration.error.clone(), declaration.config.as_ref());
            }
            if self.options.watch_mode {
                self.arm_watcher(path);
            }
        }

        self.emit(WorkspaceEvent::ProjectsChanged);
    }

    /// (Re)start the filesystem watcher for one project: declared watch
    /// paths, the configuration file itself, and the manifest siblings next
    /// to it.
    fn arm_watcher(&mut self, config_path: &Path) {
        let Some(project) = self.projects.get_mut(config_path) else {
            return;
        };

        let mut paths: Vec<PathBuf> = project.watch_paths().to_vec();
        paths.push(config_path.to_path_buf());
        let dir = parent_dir(config_path);
        for sibling in MANIFEST_SIBLINGS {
            paths.push(dir.join(sibling));
        }
        paths.sort();
        paths.dedup();

        let ignore = IgnoreSet::compile(project.ignore_paths());

        // Drop any previous watcher before re-arming.
        project.watcher = None;
        match spawn_project_watcher(
            config_path.to_path_buf(),
            paths,
            ignore,
            self.msg_tx.clone(),
        ) {
            Ok(watcher) => project.watcher = Some(watcher),
            Err(err) => {
                warn!(project = %config_path.display(), error = %err, "could not start watcher");
            }
        }
    }

    fn sync_project_status(&mut self, config_path: &Path) {
        let id = task_id_of(config_path);
        let status = self.graph.task_status(&id);
        let Some(project) = self.projects.get_mut(config_path) else {
            return;
        };
        if project.last_status != status {
            project.last_status = status;
            self.emit(WorkspaceEvent::BuildStatusChanged {
                project: config_path.to_path_buf(),
                status,
            });
        }
    }

    fn report_workspace_status(&mut self) {
        let status = self.workspace_status();
        if status != self.reported_status {
            self.reported_status = status;
            info!(status = %status, "workspace status changed");
            self.emit(WorkspaceEvent::WorkspaceStatusChanged(status));
        }
    }

    /// At-most-one pending debounce timer; merging notifications while one
    /// is armed does not re-arm it.
    fn arm_timer(&mut self) {
        if self.timer_armed || self.stopped {
            return;
        }
        self.timer_armed = true;
        self.timer_seq += 1;
        let seq = self.timer_seq;
        let tx = self.msg_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(UPDATE_COALESCE_DELAY).await;
            let _ = tx.send(WsMsg::UpdateDue { seq });
        });
    }

    fn is_settled(&self) -> bool {
        !self.timer_armed
            && !self.pending_reread
            && self.pending_changed.is_empty()
            && matches!(
                self.workspace_status(),
                WorkspaceStatus::Ok | WorkspaceStatus::Fail | WorkspaceStatus::Error
            )
    }

    async fn stop_internal(&mut self) {
        info!("workspace stopping");
        // Invalidate any pending debounce timer.
        self.timer_seq += 1;
        self.timer_armed = false;
        self.pending_changed.clear();
        self.pending_reread = false;

        self.graph.reset_all_tasks();
        let paths: Vec<PathBuf> = self.projects.keys().cloned().collect();
        for path in paths {
            if let Some(project) = self.projects.remove(&path) {
                dispose_project(project).await;
                self.emit(WorkspaceEvent::ProjectRemoved(path));
            }
        }
        self.stopped = true;
    }

    /// Kill any children still alive without touching graph state or the
    /// project records; used when a non-watch run settles.
    async fn terminate_children(&mut self) {
        for project in self.projects.values_mut() {
            if let Some(cancel) = project.run_cancel.take() {
                cancel.cancel();
            }
            if let Some(pid) = project.pid() {
                kill_process_tree(pid, KillSignal::Kill).await;
            }
        }
    }

    /// The project, but only when the message's run epoch is current.
    fn project_at_epoch(&mut self, config_path: &Path, epoch: u64) -> Option<&mut Project> {
        self.projects
            .get_mut(config_path)
            .filter(|project| project.run_epoch == epoch)
    }

    fn emit(&self, event: WorkspaceEvent) {
        // The embedder may have dropped its receiver; that's fine.
        let _ = self.event_tx.send(event);
    }
}

/// Kill the project's child tree and drop its watcher.
async fn dispose_project(mut project: Project) {
    if let Some(cancel) = project.run_cancel.take() {
        cancel.cancel();
    }
    if let Some(pid) = project.pid() {
        kill_process_tree(pid, KillSignal::Kill).await;
    }
    project.watcher = None;
}

fn task_id_of(path: &Path) -> TaskId {
    path.to_string_lossy().into_owned()
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Multi-line diagram of a dependency cycle for `workspace_error`.
fn render_cycle(error: &CycleError) -> String {
    let mut out = String::from("dependency cycle detected:\n");
    for (i, id) in error.cycle.iter().enumerate() {
        if i == 0 {
            out.push_str(&format!("    {id}\n"));
        } else {
            out.push_str(&format!(" -> {id}\n"));
        }
    }
    if let Some(first) = error.cycle.first() {
        out.push_str(&format!(" -> {first}\n"));
    }
    out
}
