//! Scratch workspace management.
//!
//! Every build writes its intermediate files into one directory that lives as
//! long as the engine:
//!
//! ```text
//! <workspace>/
//! ├── module_0.rs          # source, written verbatim
//! ├── module_0/Cargo.toml  # build description
//! ├── module_0.log         # merged toolchain output
//! ├── module_1.rs
//! ├── ...
//! └── target/<profile>/libkiln_module_0.so   # artifacts
//! ```
//!
//! All names derive from the build sequence number, so no two builds of one
//! workspace ever share a file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::build::Profile;

/// Paths of the files produced by one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFiles {
    /// Source text as submitted.
    pub source: PathBuf,
    /// Generated build description.
    pub manifest: PathBuf,
    /// Merged output of every toolchain step.
    pub log: PathBuf,
    /// Loadable artifact (only exists after a successful build).
    pub artifact: PathBuf,
}

/// Scratch directory holding every build's files.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    target_dir: PathBuf,
    /// Owned temp dir, removed on drop. `None` for user-supplied directories.
    temp: Option<TempDir>,
}

impl Workspace {
    /// Create a fresh temporary workspace, deleted when dropped.
    pub fn temporary() -> io::Result<Self> {
        let temp = tempfile::Builder::new().prefix("kiln-").tempdir()?;
        let root = temp.path().to_path_buf();
        Ok(Self {
            target_dir: root.join("target"),
            root,
            temp: Some(temp),
        })
    }

    /// Use (and create if needed) a directory chosen by the host.
    ///
    /// The directory is left in place when the workspace is dropped.
    pub fn at(path: impl AsRef<Path>) -> io::Result<Self> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            target_dir: root.join("target"),
            root,
            temp: None,
        })
    }

    /// Override where the toolchain puts compiled output.
    ///
    /// Sharing one target directory between workspaces lets dependencies be
    /// compiled once, at the price of artifact names no longer being unique
    /// across those workspaces.
    pub fn with_target_dir(mut self, target_dir: impl Into<PathBuf>) -> Self {
        self.target_dir = target_dir.into();
        self
    }

    /// Workspace root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the toolchain writes compiled output into.
    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Whether the directory is removed when the workspace is dropped.
    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }

    /// Package name used for the build with the given sequence number.
    pub fn package_name(sequence: u64) -> String {
        format!("kiln_module_{}", sequence)
    }

    /// All file paths for one build.
    pub fn files(&self, sequence: u64, profile: Profile) -> BuildFiles {
        let stem = format!("module_{}", sequence);
        let artifact_name = format!(
            "{}{}.{}",
            dylib_prefix(),
            Self::package_name(sequence),
            dylib_extension()
        );

        BuildFiles {
            source: self.root.join(format!("{}.rs", stem)),
            manifest: self.root.join(&stem).join("Cargo.toml"),
            log: self.root.join(format!("{}.log", stem)),
            artifact: self
                .target_dir
                .join(profile.target_subdir())
                .join(artifact_name),
        }
    }
}

/// Platform-specific dynamic library extension.
pub fn dylib_extension() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dll"
    }
    #[cfg(target_os = "macos")]
    {
        "dylib"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        "so"
    }
}

/// Platform-specific dynamic library prefix.
pub fn dylib_prefix() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        ""
    }
    #[cfg(not(target_os = "windows"))]
    {
        "lib"
    }
}
