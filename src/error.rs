use std::sync::Arc;
#[cfg(feature = "live")]
use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

/// Fatal problems with the shape of the build: the manifest, the task graph,
/// or the layout. Any of these aborts the run before work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Task '{0}' is not defined")]
    UnknownTask(String),

    #[error("Task '{task}' depends on '{dependency}', which is not defined")]
    MissingDependency { task: String, dependency: String },

    #[error("Task '{0}' is defined more than once")]
    DuplicateTask(String),

    #[error("Circular dependency detected at task '{0}'")]
    Cycle(String),

    #[error("Couldn't read manifest '{path}'.\n{source}")]
    ManifestRead {
        path: Utf8PathBuf,
        source: std::io::Error,
    },

    #[error("Couldn't parse manifest '{path}'.\n{source}")]
    ManifestParse {
        path: Utf8PathBuf,
        source: serde_json::Error,
    },

    #[error("Manifest field '{0}' is required by this task")]
    MissingField(&'static str),

    #[error("Path '{0}' is required but doesn't exist")]
    MissingPath(Utf8PathBuf),

    #[error("Refusing to generate a service worker for the live app root '{0}'")]
    LiveRoot(Utf8PathBuf),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),
}

/// A failure scoped to a single processed item. These are recovered by the
/// [`Policy`](crate::policy::Policy): reported, and the item is dropped.
#[derive(Debug, Error, Clone)]
#[error("{path}: {error}")]
pub struct ItemFailure {
    pub path: Utf8PathBuf,
    pub error: Arc<anyhow::Error>,
}

impl ItemFailure {
    pub fn new(path: impl Into<Utf8PathBuf>, error: impl Into<anyhow::Error>) -> Self {
        Self {
            path: path.into(),
            error: Arc::new(error.into()),
        }
    }
}

/// Fatal error returned by a task body.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{count} lint problem(s) reported by '{linter}'")]
    Lint { linter: &'static str, count: usize },

    #[error("Unit tests failed: {0}")]
    Test(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[cfg(feature = "live")]
    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Top level error returned by the runner.
#[derive(Debug, Error)]
pub enum GantryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Task '{0}' failed:\n{1}")]
    Task(String, TaskError),

    #[error("Task '{0}' panicked: {1}")]
    Panic(String, String),
}

impl GantryError {
    /// Whether this error stems from the build configuration rather than
    /// from the work itself.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            GantryError::Config(_) | GantryError::Task(_, TaskError::Config(_))
        )
    }
}

#[cfg(feature = "live")]
#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),

    #[error("Nothing to watch: none of the watched roots exist")]
    Empty,
}
