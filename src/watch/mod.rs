// src/watch/mod.rs

//! Filesystem watching.
//!
//! Each project gets its own watcher over its declared watch list, its
//! configuration file, and the conventional manifest siblings next to it.
//! Events are bridged from notify's callback thread into the workspace loop
//! and filtered against the project's ignore entries.

pub mod watcher;

pub use watcher::{IgnoreSet, ProjectWatcher, spawn_project_watcher};
