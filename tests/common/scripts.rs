//! On-disk task script fixtures.
//!
//! A task's configuration is the script itself: probed with the dump marker
//! it prints its declaration as one JSON line; run normally it executes its
//! body.

use std::fs;
use std::path::{Path, PathBuf};

/// Write an executable task script that prints `declaration` when probed
/// and otherwise runs `body`.
pub fn write_task_script(dir: &Path, name: &str, declaration: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let script = format!(
        "#!/bin/sh\n\
         if [ -n \"$TASKDAG_DUMP_CONFIG\" ]; then\n\
         \x20 echo '{declaration}'\n\
         \x20 exit 0\n\
         fi\n\
         {body}\n"
    );
    fs::write(&path, script).expect("writing task script");
    make_executable(&path);
    path
}

/// Write a script that misbehaves when probed (for loader error tests).
pub fn write_raw_script(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("writing raw script");
    make_executable(&path);
    path
}

#[cfg(unix)]
pub fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("marking script executable");
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) {}
