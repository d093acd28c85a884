// src/watch/watcher.rs

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::workspace::WsMsg;

/// Compiled ignore entries for one project.
///
/// Entries containing glob metacharacters are compiled into a `GlobSet`;
/// plain entries match any path they are a prefix of (a directory entry
/// ignores everything below it).
#[derive(Debug, Default)]
pub struct IgnoreSet {
    prefixes: Vec<PathBuf>,
    globs: Option<GlobSet>,
}

impl IgnoreSet {
    pub fn compile(entries: &[PathBuf]) -> Self {
        let mut prefixes = Vec::new();
        let mut builder = GlobSetBuilder::new();
        let mut any_glob = false;

        for entry in entries {
            let text = entry.to_string_lossy();
            if text.contains(['*', '?', '[', '{']) {
                match Glob::new(&text) {
                    Ok(glob) => {
                        builder.add(glob);
                        any_glob = true;
                    }
                    Err(err) => {
                        warn!(pattern = %text, error = %err, "invalid ignore pattern; skipping");
                    }
                }
            } else {
                prefixes.push(entry.clone());
            }
        }

        let globs = if any_glob { builder.build().ok() } else { None };
        Self { prefixes, globs }
    }

    pub fn matches(&self, path: &Path) -> bool {
        if self.prefixes.iter().any(|prefix| path.starts_with(prefix)) {
            return true;
        }
        self.globs.as_ref().is_some_and(|set| set.is_match(path))
    }
}

/// Keeps the underlying `RecommendedWatcher` alive; dropping this handle
/// stops file watching for the project.
pub struct ProjectWatcher {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for ProjectWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectWatcher").finish()
    }
}

/// Watch `paths` on behalf of the project at `config_path`.
///
/// Every surviving change event is forwarded to the workspace loop as
/// [`WsMsg::FileChanged`]; the workspace decides whether the change requires
/// a configuration re-read. Paths that do not exist yet are skipped with a
/// debug log; watcher errors are logged and never fatal.
pub fn spawn_project_watcher(
    config_path: PathBuf,
    paths: Vec<PathBuf>,
    ignore: IgnoreSet,
    msg_tx: mpsc::UnboundedSender<WsMsg>,
) -> Result<ProjectWatcher> {
    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = event_tx.send(event);
            }
            Err(err) => {
                eprintln!("taskdag: file watch error: {err}");
            }
        },
        Config::default(),
    )?;

    for path in &paths {
        let mode = if path.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        match watcher.watch(path, mode) {
            Ok(()) => debug!(project = %config_path.display(), path = %path.display(), "watching"),
            Err(err) => {
                debug!(
                    project = %config_path.display(),
                    path = %path.display(),
                    error = %err,
                    "could not watch path; skipping"
                );
            }
        }
    }

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            for path in event.paths {
                if ignore.matches(&path) {
                    continue;
                }
                let forwarded = msg_tx.send(WsMsg::FileChanged {
                    project: config_path.clone(),
                    path,
                });
                if forwarded.is_err() {
                    // Workspace is gone; no point keeping the loop alive.
                    return;
                }
            }
        }
        debug!(project = %config_path.display(), "watch event loop ended");
    });

    Ok(ProjectWatcher { _inner: watcher })
}
