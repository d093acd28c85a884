// src/config/loader.rs

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::model::{Declaration, RawDeclaration, TaskConfig};
use crate::exec::run_captured;
use crate::ipc;

/// Discovers the transitive configuration closure.
///
/// Every configuration is probed by running the script itself with the dump
/// marker set; the script prints its declaration as one line of JSON and
/// exits successfully. Dependencies discovered that way are enqueued until
/// the closure is complete. Probes for independent configurations run in
/// parallel.
#[derive(Debug, Default)]
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load `roots` and everything reachable through `deps`.
    ///
    /// The result maps each absolute configuration path to its declaration;
    /// per-path failures (missing file, failing probe, unparseable output)
    /// are recorded on the declaration rather than aborting the load.
    pub async fn load_all(&self, roots: &[PathBuf]) -> BTreeMap<PathBuf, Declaration> {
        let mut results: BTreeMap<PathBuf, Declaration> = BTreeMap::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut probes: JoinSet<Declaration> = JoinSet::new();

        for root in roots {
            enqueue(root, &mut seen, &mut probes);
        }

        while let Some(joined) = probes.join_next().await {
            let decl = match joined {
                Ok(decl) => decl,
                Err(err) => {
                    warn!(error = %err, "configuration probe task failed");
                    continue;
                }
            };
            if let Some(config) = &decl.config {
                for dep in &config.deps {
                    enqueue(dep, &mut seen, &mut probes);
                }
            }
            results.insert(decl.config_path.clone(), decl);
        }

        debug!(configs = results.len(), "configuration closure loaded");
        results
    }
}

/// Canonical spelling of a configuration path, used as its task id.
///
/// Missing files keep their given path; their probe then fails with a
/// friendly diagnostic instead of the load aborting.
pub fn canonical_config_path(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn enqueue(path: &Path, seen: &mut HashSet<PathBuf>, probes: &mut JoinSet<Declaration>) {
    // Canonicalize so the same configuration reached through different
    // spellings maps to one task.
    let canonical = canonical_config_path(path);
    if !seen.insert(canonical.clone()) {
        return;
    }
    probes.spawn(async move { probe(canonical).await });
}

/// Probe a single configuration script for its declaration.
async fn probe(config_path: PathBuf) -> Declaration {
    if !config_path.is_file() {
        return Declaration::err(
            config_path.clone(),
            format!("configuration file not found: {}", config_path.display()),
        );
    }

    let config_dir = parent_dir(&config_path);

    let mut cmd = Command::new(&config_path);
    cmd.current_dir(&config_dir).env(ipc::DUMP_CONFIG_ENV, "1");

    let captured = match run_captured(cmd).await {
        Ok(captured) => captured,
        Err(err) => {
            return Declaration::err(
                config_path.clone(),
                format!("probing {} failed: {err:#}", config_path.display()),
            );
        }
    };

    if captured.exit_code != 0 {
        return Declaration::err(
            config_path.clone(),
            format!(
                "configuration probe exited with code {}:\n{}",
                captured.exit_code,
                captured.combined.trim_end()
            ),
        );
    }

    match parse_declaration(&captured.stdout) {
        Some(raw) => {
            let config = TaskConfig::resolve(raw, &config_dir);
            debug!(config = %config_path.display(), deps = config.deps.len(), "configuration loaded");
            Declaration::ok(config_path, config)
        }
        None => Declaration::err(
            config_path.clone(),
            format!(
                "could not parse configuration declaration from {}:\n{}",
                config_path.display(),
                captured.stdout.trim_end()
            ),
        ),
    }
}

/// The declaration is a single JSON line, but scripts occasionally print
/// other noise first; take the last line that parses as an object.
fn parse_declaration(stdout: &str) -> Option<RawDeclaration> {
    let trimmed = stdout.trim();
    if let Ok(raw) = serde_json::from_str::<RawDeclaration>(trimmed) {
        return Some(raw);
    }
    trimmed
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<RawDeclaration>(line.trim()).ok())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
