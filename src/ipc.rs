// src/ipc.rs

//! Environment markers and the readiness sentinel shared between the
//! workspace, the configuration prober, and child task scripts.

/// Set by the configuration prober. A script seeing this should print its
/// declaration as a single line of JSON and exit successfully.
pub const DUMP_CONFIG_ENV: &str = "TASKDAG_DUMP_CONFIG";

/// Set by the workspace when spawning a task. A script run without it is
/// being invoked standalone and may print a friendly notice.
pub const RUNNER_ENV: &str = "TASKDAG_RUNNER";

/// Set in addition to [`RUNNER_ENV`] when the workspace is in watch mode.
pub const WATCH_ENV: &str = "TASKDAG_WATCH";

/// Carries the path of the env file requested via the workspace options.
pub const ENV_FILE_ENV: &str = "TASKDAG_ENV_FILE";

/// Conventional marker asking child processes to emit colored output even
/// though their stdio is a pipe.
pub const FORCE_COLOR_ENV: &str = "FORCE_COLOR";

/// A task process prints this exact line on stdout to declare itself ready
/// while continuing to run (servers, watchers, and other long-lived tasks).
pub const READY_SENTINEL: &str = "task-done";
