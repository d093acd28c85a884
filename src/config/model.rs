// src/config/model.rs

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

/// A string-or-list field as it appears on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

/// The declaration a configuration script prints when probed.
///
/// All path fields may be a single string or a list; both forms normalize to
/// a list. Paths are interpreted relative to the configuration's directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDeclaration {
    pub name: Option<String>,
    #[serde(default)]
    pub watch: OneOrMany,
    #[serde(default)]
    pub ignore: OneOrMany,
    #[serde(default)]
    pub deps: OneOrMany,
}

/// A successfully loaded configuration with all paths made absolute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskConfig {
    pub name: Option<String>,
    pub watch: Vec<PathBuf>,
    pub ignore: Vec<PathBuf>,
    pub deps: Vec<PathBuf>,
}

impl TaskConfig {
    /// Resolve a raw declaration against the configuration's directory.
    pub fn resolve(raw: RawDeclaration, config_dir: &Path) -> Self {
        let resolve_all = |entries: OneOrMany| {
            entries
                .into_vec()
                .into_iter()
                .map(|entry| absolutize(config_dir, Path::new(&entry)))
                .collect()
        };

        Self {
            name: raw.name,
            watch: resolve_all(raw.watch),
            ignore: resolve_all(raw.ignore),
            deps: resolve_all(raw.deps),
        }
    }
}

/// The loader's result for one configuration path: either a config or an
/// error, never both.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub config_path: PathBuf,
    pub error: Option<String>,
    pub config: Option<TaskConfig>,
}

impl Declaration {
    pub fn ok(config_path: PathBuf, config: TaskConfig) -> Self {
        Self {
            config_path,
            error: None,
            config: Some(config),
        }
    }

    pub fn err(config_path: PathBuf, error: String) -> Self {
        Self {
            config_path,
            error: Some(error),
            config: None,
        }
    }
}

/// Join `path` onto `base` when relative and clean `.` / `..` components
/// lexically. Declared paths may not exist yet, so this never touches the
/// filesystem.
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut cleaned = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !cleaned.pop() {
                    cleaned.push(Component::ParentDir);
                }
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}
