//! Error types for kiln-core.
//!
//! Each pipeline stage has its own error type so callers can tell exactly
//! where an `execute` stopped. All of them convert into [`Error`].

use std::path::PathBuf;

use thiserror::Error;

/// Result type for kiln-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to turn a source blob into a loadable artifact.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The scratch workspace could not be created or written to.
    #[error("workspace unavailable at {}: {message}", path.display())]
    WorkspaceUnavailable { path: PathBuf, message: String },

    /// The project-generation step exited non-zero or could not run.
    #[error("project generation failed, see {}", log_path.display())]
    ProjectGenerationFailed { log_path: PathBuf, log: String },

    /// The compile/link step exited non-zero or could not run.
    #[error("build failed, see {}", log_path.display())]
    CompileLinkFailed { log_path: PathBuf, log: String },
}

impl BuildError {
    /// Captured toolchain output, if the failure happened in a toolchain step.
    pub fn log(&self) -> Option<&str> {
        match self {
            Self::WorkspaceUnavailable { .. } => None,
            Self::ProjectGenerationFailed { log, .. } | Self::CompileLinkFailed { log, .. } => {
                Some(log)
            }
        }
    }
}

/// Failure to map a built artifact into the process.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Missing file, ABI/link mismatch or unresolved external symbols.
    #[error("failed to load {}: {message}", path.display())]
    OpenFailed { path: PathBuf, message: String },
}

/// Failure to find the entry point inside a loaded module.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The module does not export the expected symbol.
    #[error("symbol `{symbol}` not found: {message}")]
    SymbolNotFound { symbol: String, message: String },
}

/// Failure to subscribe to file changes.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The path did not exist at subscribe time.
    #[error("path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    /// The notification backend refused the subscription.
    #[error("failed to watch {}: {message}", path.display())]
    Subscribe { path: PathBuf, message: String },

    /// The notification backend could not be started.
    #[error("file watcher unavailable: {0}")]
    Backend(String),
}

/// Errors that can occur in kiln-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Build stage failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Load stage failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Entry symbol resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// File watching failed.
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// A source file could not be read.
    #[error("cannot read source {}: {message}", path.display())]
    SourceUnreadable { path: PathBuf, message: String },

    /// Invalid build configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Render the error together with a short recovery hint for terminal output.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Self::Build(BuildError::WorkspaceUnavailable { .. }) => {
                "check that the workspace directory is writable, or pass --workspace"
            }
            Self::Build(BuildError::ProjectGenerationFailed { .. }) => {
                "check the dependency list and that the generator program is on PATH"
            }
            Self::Build(BuildError::CompileLinkFailed { .. }) => {
                "fix the compiler errors above; the previous modules are still loaded"
            }
            Self::Load(_) => "the artifact may link against libraries missing at runtime",
            Self::Resolve(_) => "the module must export `kiln_entry`; use #[kiln::entry]",
            Self::Watch(_) => "check that the file exists and is readable",
            Self::SourceUnreadable { .. } => "check the path and file permissions",
            Self::Config(_) => "see `kiln --help` for the expected formats",
            Self::Io(_) => return self.to_string(),
        };
        format!("{}\n  hint: {}", self, hint)
    }
}
