//! Deterministic driver for exercising the task graph without a workspace.
//!
//! Mirrors how the workspace loop owns the graph: run requests are drained
//! from the channel, completions are resolved between `run()` passes, and
//! events are collected for assertions.

use tokio::sync::mpsc;

use taskdag::graph::{GraphEvent, Jobs, RunRequest, TaskGraph, TaskId};
use taskdag::util::Multimap;

pub struct GraphHarness {
    pub graph: TaskGraph,
    pub run_rx: mpsc::UnboundedReceiver<RunRequest>,
    pub event_rx: mpsc::UnboundedReceiver<GraphEvent>,
    /// Requests the driver left unresolved (hanging tasks).
    pub parked: Vec<RunRequest>,
}

impl GraphHarness {
    pub fn new(jobs: Jobs) -> Self {
        let (run_tx, run_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            graph: TaskGraph::new(jobs, run_tx, event_tx),
            run_rx,
            event_rx,
            parked: Vec::new(),
        }
    }

    /// Build an adjacency multimap from `(task, [deps])` entries.
    pub fn adjacency(entries: &[(&str, &[&str])]) -> Multimap<TaskId, TaskId> {
        entries
            .iter()
            .map(|(task, deps)| {
                (
                    task.to_string(),
                    deps.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
                )
            })
            .collect()
    }

    /// Drain run requests queued right now.
    pub fn pending_requests(&mut self) -> Vec<RunRequest> {
        let mut requests = Vec::new();
        while let Ok(request) = self.run_rx.try_recv() {
            requests.push(request);
        }
        requests
    }

    /// Drive the graph to quiescence.
    ///
    /// Each round drains the queued requests, resolves those for which
    /// `outcome` returns `Some(success)`, parks the rest, and calls `run()`
    /// again, matching the cadence of the workspace loop so completions
    /// never re-enter a dispatch pass.
    pub fn drive<F>(&mut self, mut outcome: F)
    where
        F: FnMut(&TaskId) -> Option<bool>,
    {
        self.graph.run();
        loop {
            let batch = self.pending_requests();
            if batch.is_empty() {
                break;
            }
            let mut resolved_any = false;
            for request in batch {
                match outcome(&request.task_id) {
                    Some(success) => {
                        self.graph.resolve(&request.completion, success);
                        resolved_any = true;
                    }
                    None => self.parked.push(request),
                }
            }
            self.graph.run();
            if !resolved_any {
                break;
            }
        }
    }

    /// Drain events collected so far.
    pub fn events(&mut self) -> Vec<GraphEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Drain events, formatted and filtered to task lifecycle entries.
    pub fn task_events(&mut self) -> Vec<String> {
        format_task_events(&self.events())
    }
}

/// Render started/finished/reset events as `"started:id"` strings, dropping
/// tree status changes.
pub fn format_task_events(events: &[GraphEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            GraphEvent::TaskStarted(id) => Some(format!("started:{id}")),
            GraphEvent::TaskFinished(id) => Some(format!("finished:{id}")),
            GraphEvent::TaskReset(id) => Some(format!("reset:{id}")),
            GraphEvent::TreeStatusChanged(_) => None,
        })
        .collect()
}
