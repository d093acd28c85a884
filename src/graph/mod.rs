// src/graph/mod.rs

//! Task dependency graph and scheduling kernel.
//!
//! - [`task`] holds the per-task arena record (edges, generation, digests,
//!   in-flight execution).
//! - [`task_graph`] is the scheduling kernel: graph replacement, dirty
//!   marking, dispatch, and the completion protocol.
//! - [`cycle`] is the cycle finder used to reject invalid graphs.
//!
//! The kernel is a pure, synchronous state machine. It requests runs and
//! reports lifecycle events over unbounded channels; whoever owns the graph
//! (the workspace loop in production, a driver loop in tests) executes the
//! requests and feeds completions back between `run()` passes, which is what
//! keeps the kernel from ever re-entering itself.

use std::fmt;
use std::str::FromStr;

use tokio_util::sync::CancellationToken;

use crate::util::Digest;

pub mod cycle;
pub mod task;
pub mod task_graph;

pub use task_graph::TaskGraph;

/// Canonical task identifier: in practice the absolute configuration path.
pub type TaskId = String;

/// Maximum number of concurrently running tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jobs {
    Limited(usize),
    Unlimited,
}

impl Jobs {
    /// Remaining dispatch capacity given the current in-flight count.
    pub fn capacity(&self, in_flight: usize) -> usize {
        match self {
            Jobs::Unlimited => usize::MAX,
            Jobs::Limited(max) => max.saturating_sub(in_flight),
        }
    }
}

impl FromStr for Jobs {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unlimited" | "0" => Ok(Jobs::Unlimited),
            other => other
                .parse::<usize>()
                .map(Jobs::Limited)
                .map_err(|_| format!("invalid jobs value: {other} (expected a number or \"unlimited\")")),
        }
    }
}

/// Status of a single task as derived from its execution and the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// No execution and the tree has settled; this task will not run.
    NotApplicable,
    /// No execution yet, but the tree is still working towards it.
    Pending,
    Running,
    Ok,
    Fail,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::NotApplicable => "n/a",
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Ok => "ok",
            TaskStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Aggregate status of the whole graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeStatus {
    Pending,
    Running,
    Ok,
    Fail,
}

impl fmt::Display for TreeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TreeStatus::Pending => "pending",
            TreeStatus::Running => "running",
            TreeStatus::Ok => "ok",
            TreeStatus::Fail => "fail",
        };
        f.write_str(s)
    }
}

/// Lifecycle events emitted by the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    /// An execution was assigned and the run callback is about to fire.
    TaskStarted(TaskId),
    /// A completion was recorded (success or failure).
    TaskFinished(TaskId),
    /// An execution was discarded by invalidation (version change, graph
    /// change, explicit reset, or disposal).
    TaskReset(TaskId),
    TreeStatusChanged(TreeStatus),
}

/// Pairs a dispatched execution with the task version it was dispatched at.
///
/// Handed to the run callback; passed back through
/// [`TaskGraph::resolve`](task_graph::TaskGraph::resolve) on completion.
/// A stale ticket (the task's version moved on) is silently ignored there.
#[derive(Debug, Clone)]
pub struct CompletionTicket {
    pub(crate) task_id: TaskId,
    pub(crate) version: Digest,
}

impl CompletionTicket {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }
}

/// A request from the graph to run one task.
#[derive(Debug)]
pub struct RunRequest {
    pub task_id: TaskId,
    /// Fired when the execution is invalidated; the runner should kill the
    /// child process tree and stop reporting.
    pub cancel: CancellationToken,
    /// Pass back via `TaskGraph::resolve` together with the outcome.
    pub completion: CompletionTicket,
}

/// A dependency cycle found while replacing the graph.
///
/// `cycle` is the slice of the DFS stack from the first occurrence of the
/// revisited node, i.e. the nodes actually on the cycle, in edge order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    pub cycle: Vec<TaskId>,
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dependency cycle detected: ")?;
        for id in &self.cycle {
            write!(f, "{id} -> ")?;
        }
        match self.cycle.first() {
            Some(first) => write!(f, "{first}"),
            None => f.write_str("(empty)"),
        }
    }
}

impl std::error::Error for CycleError {}
