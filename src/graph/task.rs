// src/graph/task.rs

//! Arena record for a single task.

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;

use crate::graph::TaskId;
use crate::util::{Digest, subtree_digest, version_digest};

/// An in-flight (or completed but not yet invalidated) attempt to run a task.
#[derive(Debug)]
pub struct Execution {
    pub cancel: CancellationToken,
    /// The task's version at the moment this execution was dispatched. If
    /// the version later diverges, the execution is discarded.
    pub version_at_dispatch: Digest,
    /// `None` while running; `Some(success)` once a completion was recorded.
    pub outcome: Option<bool>,
}

impl Execution {
    pub fn is_in_flight(&self) -> bool {
        self.outcome.is_none()
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == Some(true)
    }
}

/// One task in the graph arena.
///
/// Parent/child cross-links would form reference cycles, so edges are stored
/// as id sets and resolved through the arena. `BTreeSet` keeps children in
/// the canonical sorted order the subtree digest relies on.
#[derive(Debug)]
pub struct Task {
    pub id: TaskId,
    pub parents: BTreeSet<TaskId>,
    pub children: BTreeSet<TaskId>,
    /// Bumped every time this task's own inputs are declared dirty.
    pub generation: u64,
    /// Digest of this task's id and its children's subtree digests.
    pub subtree_sha: Digest,
    pub execution: Option<Execution>,
}

impl Task {
    pub fn new(id: TaskId) -> Self {
        let subtree_sha = subtree_digest(&id, std::iter::empty());
        Self {
            id,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
            generation: 0,
            subtree_sha,
            execution: None,
        }
    }

    /// Digest of `(generation, subtree_sha)`. Any change to either
    /// invalidates in-flight executions.
    pub fn version(&self) -> Digest {
        version_digest(self.generation, &self.subtree_sha)
    }

    /// Whether this task holds an execution that is current (dispatched at
    /// the present version) and succeeded.
    pub fn has_current_success(&self) -> bool {
        self.execution
            .as_ref()
            .is_some_and(|exec| exec.succeeded() && exec.version_at_dispatch == self.version())
    }
}
