// src/exec/kill.rs

//! Process-tree termination.
//!
//! Task children are spawned into their own process group so the whole
//! subtree can be taken down at once. An interrupt goes to the immediate
//! group; a hard kill first enumerates every descendant (via `/proc` on
//! Linux, `ps` elsewhere on POSIX) and signals each distinct process group,
//! which also reaps grandchildren that moved themselves into new groups.
//! Errors from processes that already exited are swallowed.

use tracing::debug;

/// Which way to take the tree down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    /// Polite interrupt to the child's process group.
    Interrupt,
    /// Hard kill of every process group in the descendant tree.
    Kill,
}

#[cfg(windows)]
pub async fn kill_process_tree(pid: u32, _signal: KillSignal) {
    use tokio::process::Command;

    // taskkill handles the recursive tree itself.
    let result = Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/T", "/F"])
        .output()
        .await;
    if let Err(err) = result {
        debug!(pid, error = %err, "taskkill failed");
    }
}

#[cfg(unix)]
pub async fn kill_process_tree(pid: u32, signal: KillSignal) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match signal {
        KillSignal::Interrupt => {
            // The negative pid addresses the child's process group.
            let group = Pid::from_raw(-(pid as i32));
            if let Err(err) = kill(group, Signal::SIGINT) {
                debug!(pid, error = %err, "interrupting process group failed");
            }
        }
        KillSignal::Kill => {
            let groups = descendant_process_groups(pid).await;
            debug!(pid, ?groups, "killing process groups");
            for group_id in groups {
                let group = Pid::from_raw(-(group_id as i32));
                if let Err(err) = kill(group, Signal::SIGKILL) {
                    debug!(pid, group_id, error = %err, "killing process group failed");
                }
            }
        }
    }
}

/// Collect the process-group ids of `pid` and all its descendants, falling
/// back to the pid itself where no group id is known.
#[cfg(unix)]
async fn descendant_process_groups(pid: u32) -> Vec<u32> {
    use std::collections::{BTreeSet, HashMap, VecDeque};

    let entries = process_table().await;

    let mut children_of: HashMap<u32, Vec<u32>> = HashMap::new();
    let mut group_of: HashMap<u32, u32> = HashMap::new();
    for entry in &entries {
        children_of.entry(entry.ppid).or_default().push(entry.pid);
        group_of.insert(entry.pid, entry.pgid);
    }

    let mut groups: BTreeSet<u32> = BTreeSet::new();
    let mut queue: VecDeque<u32> = VecDeque::from([pid]);
    let mut seen: BTreeSet<u32> = BTreeSet::new();
    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        let pgid = group_of.get(&current).copied().unwrap_or(0);
        groups.insert(if pgid == 0 { current } else { pgid });
        if let Some(children) = children_of.get(&current) {
            queue.extend(children.iter().copied());
        }
    }

    groups.into_iter().collect()
}

#[cfg(unix)]
struct ProcessEntry {
    pid: u32,
    ppid: u32,
    pgid: u32,
}

/// Snapshot of the live process table as `(pid, ppid, pgid)` rows.
#[cfg(target_os = "linux")]
async fn process_table() -> Vec<ProcessEntry> {
    use std::fs;

    let Ok(dir) = fs::read_dir("/proc") else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    for dirent in dir.flatten() {
        let name = dirent.file_name();
        let Some(pid) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(stat) = fs::read_to_string(dirent.path().join("stat")) else {
            continue;
        };
        if let Some(entry) = parse_proc_stat(pid, &stat) {
            entries.push(entry);
        }
    }
    entries
}

/// Parse `/proc/<pid>/stat`. The comm field may contain spaces and
/// parentheses, so fields are taken after the last `)`.
#[cfg(target_os = "linux")]
fn parse_proc_stat(pid: u32, stat: &str) -> Option<ProcessEntry> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    let ppid = fields.next()?.parse().ok()?;
    let pgid = fields.next()?.parse().ok()?;
    Some(ProcessEntry { pid, ppid, pgid })
}

#[cfg(all(unix, not(target_os = "linux")))]
async fn process_table() -> Vec<ProcessEntry> {
    use tokio::process::Command;

    let Ok(output) = Command::new("ps").args(["-axo", "pid=,ppid=,pgid="]).output().await
    else {
        return Vec::new();
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            let pgid = fields.next()?.parse().ok()?;
            Some(ProcessEntry { pid, ppid, pgid })
        })
        .collect()
}
