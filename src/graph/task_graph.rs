// src/graph/task_graph.rs

//! The scheduling kernel.
//!
//! `TaskGraph` owns every task record and decides what runs when. It never
//! runs anything itself: `run()` assigns executions and pushes
//! [`RunRequest`]s onto the run channel, and the owner reports outcomes back
//! via [`TaskGraph::resolve`] before calling `run()` again. Because
//! completions always travel through the owner's loop, a `run()` pass can
//! never re-enter itself through its own callback, and a synchronous
//! completer still observes `task_started` before `task_finished`.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::DfsPostOrder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::graph::cycle::find_cycle;
use crate::graph::task::{Execution, Task};
use crate::graph::{
    CompletionTicket, CycleError, GraphEvent, Jobs, RunRequest, TaskId, TaskStatus, TreeStatus,
};
use crate::util::{Digest, Multimap, subtree_digest};

#[derive(Debug)]
pub struct TaskGraph {
    jobs: Jobs,
    tasks: BTreeMap<TaskId, Task>,
    tree_status: TreeStatus,
    run_tx: mpsc::UnboundedSender<RunRequest>,
    event_tx: mpsc::UnboundedSender<GraphEvent>,
}

impl TaskGraph {
    /// Create a graph that requests runs on `run_tx` and reports lifecycle
    /// events on `event_tx`.
    pub fn new(
        jobs: Jobs,
        run_tx: mpsc::UnboundedSender<RunRequest>,
        event_tx: mpsc::UnboundedSender<GraphEvent>,
    ) -> Self {
        Self {
            jobs,
            tasks: BTreeMap::new(),
            tree_status: TreeStatus::Pending,
            run_tx,
            event_tx,
        }
    }

    /// Replace the task set and edge set with `adjacency` (task -> direct
    /// dependencies).
    ///
    /// Rejects cyclic input without touching any state. Otherwise: missing
    /// tasks are created, absent tasks are removed (their executions
    /// discarded), edges are rebuilt, and subtree digests are recomputed in
    /// post-order. Any task whose subtree digest changed has its execution
    /// discarded. Does not start runs; call [`run`](Self::run) for that.
    pub fn set_tasks(&mut self, adjacency: &Multimap<TaskId, TaskId>) -> Result<(), CycleError> {
        let mut children_map: BTreeMap<TaskId, BTreeSet<TaskId>> = BTreeMap::new();
        for (task, deps) in adjacency.iter() {
            let entry = children_map.entry(task.clone()).or_default();
            entry.extend(deps.iter().cloned());
            for dep in deps {
                children_map.entry(dep.clone()).or_default();
            }
        }

        if let Some(cycle) = find_cycle(&children_map) {
            return Err(CycleError { cycle });
        }

        // Removals first, so their reset events precede any digest resets.
        let absent: Vec<TaskId> = self
            .tasks
            .keys()
            .filter(|id| !children_map.contains_key(*id))
            .cloned()
            .collect();
        for id in absent {
            self.discard_execution(&id);
            self.tasks.remove(&id);
            debug!(task = %id, "task removed from graph");
        }

        // Additions and edge rebuild.
        for (id, children) in &children_map {
            let task = self
                .tasks
                .entry(id.clone())
                .or_insert_with(|| Task::new(id.clone()));
            task.children = children.clone();
            task.parents.clear();
        }
        let edges: Vec<(TaskId, TaskId)> = children_map
            .iter()
            .flat_map(|(id, children)| children.iter().map(|c| (id.clone(), c.clone())))
            .collect();
        for (parent, child) in edges {
            if let Some(task) = self.tasks.get_mut(&child) {
                task.parents.insert(parent);
            }
        }

        // Recompute subtree digests bottom-up; post-order guarantees every
        // child digest is final before its parents hash it.
        let mut changed: Vec<TaskId> = Vec::new();
        for id in self.post_order() {
            let child_digests: Vec<Digest> = self.tasks[&id]
                .children
                .iter()
                .map(|c| self.tasks[c].subtree_sha)
                .collect();
            let sha = subtree_digest(&id, child_digests.iter());
            if let Some(task) = self.tasks.get_mut(&id) {
                if task.subtree_sha != sha {
                    task.subtree_sha = sha;
                    changed.push(id);
                }
            }
        }
        for id in changed {
            debug!(task = %id, "subtree digest changed");
            self.discard_execution(&id);
        }

        Ok(())
    }

    /// Declare `task_id`'s own inputs dirty: bump its generation and the
    /// generation of every ancestor, discarding their executions.
    /// Descendants are untouched.
    pub fn mark_changed(&mut self, task_id: &TaskId) {
        if !self.tasks.contains_key(task_id) {
            warn!(task = %task_id, "mark_changed for unknown task; ignoring");
            return;
        }

        for id in self.with_ancestors(task_id) {
            if let Some(task) = self.tasks.get_mut(&id) {
                task.generation += 1;
                trace!(task = %id, generation = task.generation, "generation bumped");
            }
            self.discard_execution(&id);
        }
    }

    /// Schedule as many executions as capacity allows.
    ///
    /// Emits `task_started` for each dispatched task *before* pushing its
    /// run request, recomputes the tree status, and returns. Completions
    /// must come back through [`resolve`](Self::resolve) from the owner's
    /// loop; this method is never called from inside a run callback.
    pub fn run(&mut self) {
        let in_flight = self
            .tasks
            .values()
            .filter(|t| t.execution.as_ref().is_some_and(Execution::is_in_flight))
            .count();
        let capacity = self.jobs.capacity(in_flight);
        let runnable = self.runnable_tasks();

        if capacity == 0 || runnable.is_empty() {
            let status = self.derive_tree_status(in_flight > 0, !runnable.is_empty());
            self.set_tree_status(status);
            return;
        }

        // Work is about to be in flight; report it before dispatching so
        // listeners see the transition ahead of any task event.
        self.set_tree_status(TreeStatus::Running);

        for id in runnable.into_iter().take(capacity) {
            let cancel = CancellationToken::new();
            let version = match self.tasks.get_mut(&id) {
                Some(task) => {
                    let version = task.version();
                    task.execution = Some(Execution {
                        cancel: cancel.clone(),
                        version_at_dispatch: version,
                        outcome: None,
                    });
                    version
                }
                None => continue,
            };

            debug!(task = %id, "dispatching task");
            self.emit(GraphEvent::TaskStarted(id.clone()));
            let request = RunRequest {
                task_id: id.clone(),
                cancel,
                completion: CompletionTicket {
                    task_id: id,
                    version,
                },
            };
            if self.run_tx.send(request).is_err() {
                warn!("run request channel closed; dropping dispatch");
            }
        }
    }

    /// Record the outcome of a dispatched execution.
    ///
    /// Ignored (returning `false`) when the execution is gone, the ticket is
    /// stale (the task's version moved on since dispatch), or an outcome was
    /// already recorded; completions are effective at most once. The owner
    /// should follow an effective resolve with a fresh [`run`](Self::run)
    /// pass on the next turn of its loop.
    pub fn resolve(&mut self, ticket: &CompletionTicket, success: bool) -> bool {
        let Some(task) = self.tasks.get_mut(&ticket.task_id) else {
            debug!(task = %ticket.task_id, "completion for unknown task; ignoring");
            return false;
        };
        let current_version = task.version();
        let Some(exec) = task.execution.as_mut() else {
            debug!(task = %ticket.task_id, "completion without execution; ignoring");
            return false;
        };
        if exec.version_at_dispatch != ticket.version || ticket.version != current_version {
            debug!(task = %ticket.task_id, "stale completion; ignoring");
            return false;
        }
        if exec.outcome.is_some() {
            debug!(task = %ticket.task_id, "duplicate completion; ignoring");
            return false;
        }

        exec.outcome = Some(success);
        debug!(task = %ticket.task_id, success, "task finished");
        self.emit(GraphEvent::TaskFinished(ticket.task_id.clone()));
        true
    }

    /// Discard every execution, firing cancel tokens. Idempotent.
    pub fn reset_all_tasks(&mut self) {
        let ids: Vec<TaskId> = self.tasks.keys().cloned().collect();
        for id in ids {
            self.discard_execution(&id);
        }
    }

    /// Equivalent to `set_tasks` with an empty adjacency.
    pub fn clear(&mut self) {
        let empty = Multimap::new();
        // An empty adjacency cannot contain a cycle.
        let _ = self.set_tasks(&empty);
    }

    pub fn task_status(&self, task_id: &TaskId) -> TaskStatus {
        let Some(task) = self.tasks.get(task_id) else {
            return TaskStatus::NotApplicable;
        };
        match &task.execution {
            Some(exec) => match exec.outcome {
                None => TaskStatus::Running,
                Some(true) => TaskStatus::Ok,
                Some(false) => TaskStatus::Fail,
            },
            None => match self.tree_status {
                TreeStatus::Ok | TreeStatus::Fail => TaskStatus::NotApplicable,
                TreeStatus::Pending | TreeStatus::Running => TaskStatus::Pending,
            },
        }
    }

    pub fn tree_status(&self) -> TreeStatus {
        self.tree_status
    }

    /// Current version digest for a task, if it exists.
    pub fn task_version(&self, task_id: &TaskId) -> Option<Digest> {
        self.tasks.get(task_id).map(Task::version)
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn task_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks.keys()
    }

    pub fn direct_children(&self, task_id: &TaskId) -> Vec<TaskId> {
        self.tasks
            .get(task_id)
            .map(|t| t.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn direct_parents(&self, task_id: &TaskId) -> Vec<TaskId> {
        self.tasks
            .get(task_id)
            .map(|t| t.parents.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// DFS post-order over roots sorted by id: for every edge
    /// parent -> child, the child precedes the parent.
    pub fn topological_order(&self) -> Vec<TaskId> {
        self.post_order()
    }

    /// Breadth-first order from the roots (dependants before their
    /// dependencies), layers visited in sorted order.
    pub fn bfs_order(&self) -> Vec<TaskId> {
        let mut order = Vec::with_capacity(self.tasks.len());
        let mut visited: HashSet<&TaskId> = HashSet::new();
        let mut queue: VecDeque<&TaskId> = VecDeque::new();

        for (id, task) in &self.tasks {
            if task.parents.is_empty() {
                visited.insert(id);
                queue.push_back(id);
            }
        }
        while let Some(id) = queue.pop_front() {
            order.push(id.clone());
            for child in &self.tasks[id].children {
                if visited.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        order
    }

    fn emit(&self, event: GraphEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("graph event channel closed");
        }
    }

    /// Drop a task's execution record, firing its cancel token and emitting
    /// `task_reset`. No-op when there is nothing to discard.
    fn discard_execution(&mut self, task_id: &TaskId) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        if let Some(exec) = task.execution.take() {
            exec.cancel.cancel();
            debug!(task = %task_id, "execution discarded");
            self.emit(GraphEvent::TaskReset(task_id.clone()));
        }
    }

    /// `task_id` followed by its transitive parents in breadth-first order.
    fn with_ancestors(&self, task_id: &TaskId) -> Vec<TaskId> {
        let mut order = Vec::new();
        let mut visited: HashSet<&TaskId> = HashSet::new();
        let mut queue: VecDeque<&TaskId> = VecDeque::new();

        visited.insert(task_id);
        queue.push_back(task_id);
        while let Some(id) = queue.pop_front() {
            order.push(id.clone());
            if let Some(task) = self.tasks.get(id) {
                for parent in &task.parents {
                    if visited.insert(parent) {
                        queue.push_back(parent);
                    }
                }
            }
        }
        order
    }

    /// A task is runnable when it has no execution and every child holds a
    /// current successful one.
    fn runnable_tasks(&self) -> Vec<TaskId> {
        self.tasks
            .values()
            .filter(|task| {
                task.execution.is_none()
                    && task
                        .children
                        .iter()
                        .all(|c| self.tasks.get(c).is_some_and(Task::has_current_success))
            })
            .map(|task| task.id.clone())
            .collect()
    }

    fn derive_tree_status(&self, any_in_flight: bool, any_runnable: bool) -> TreeStatus {
        if any_in_flight {
            return TreeStatus::Running;
        }
        if any_runnable {
            return TreeStatus::Pending;
        }
        let any_failed = self
            .tasks
            .values()
            .any(|t| t.execution.as_ref().is_some_and(|e| e.outcome == Some(false)));
        if any_failed { TreeStatus::Fail } else { TreeStatus::Ok }
    }

    fn set_tree_status(&mut self, status: TreeStatus) {
        if self.tree_status != status {
            self.tree_status = status;
            debug!(status = %status, "tree status changed");
            self.emit(GraphEvent::TreeStatusChanged(status));
        }
    }

    /// DFS post-order over the arena: roots sorted by id, children visited
    /// in sorted order.
    fn post_order(&self) -> Vec<TaskId> {
        let mut g: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in self.tasks.keys() {
            g.add_node(id.as_str());
        }
        for (id, task) in &self.tasks {
            for child in &task.children {
                g.add_edge(id.as_str(), child.as_str(), ());
            }
        }

        let mut order = Vec::with_capacity(self.tasks.len());
        let mut dfs = DfsPostOrder::empty(&g);
        for (id, task) in &self.tasks {
            if task.parents.is_empty() {
                dfs.move_to(id.as_str());
                while let Some(node) = dfs.next(&g) {
                    order.push(node.to_string());
                }
            }
        }
        order
    }
}
