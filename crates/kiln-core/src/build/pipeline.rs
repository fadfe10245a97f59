//! Source-to-artifact build orchestration.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::BuildError;
use crate::workspace::{BuildFiles, Workspace};

use super::config::{BuildConfig, Profile};
use super::manifest::{ManifestConfig, generate_cargo_toml};
use super::toolchain::{BuildStep, StepCommand};

/// Separator cargo expects between entries of `CARGO_ENCODED_RUSTFLAGS`.
const ENCODED_FLAG_SEPARATOR: char = '\x1f';

/// One build invocation. Immutable once created.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Build sequence number; names every file of this build.
    pub sequence: u64,
    /// Source text, written to disk verbatim.
    pub source: String,
    /// Configuration as it was when the request was made.
    pub config: BuildConfig,
}

/// A successfully built module.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Build sequence number.
    pub sequence: u64,
    /// Loadable library.
    pub path: PathBuf,
    /// All files of this build.
    pub files: BuildFiles,
    /// Wall-clock time of both toolchain steps.
    pub elapsed: Duration,
}

/// Turns source text into a loadable artifact using the external toolchain.
pub struct BuildPipeline {
    config: BuildConfig,
    /// Created on first build.
    workspace: Option<Workspace>,
    next_sequence: u64,
}

impl BuildPipeline {
    /// Create a pipeline. Nothing touches the disk until the first build.
    pub fn new(config: BuildConfig) -> Self {
        Self {
            config,
            workspace: None,
            next_sequence: 0,
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Mutable configuration. Changes apply to requests made afterwards.
    pub fn config_mut(&mut self) -> &mut BuildConfig {
        &mut self.config
    }

    /// The scratch workspace, once created.
    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    /// Snapshot the config and assign the next sequence number.
    ///
    /// The counter advances for every request, so a failed build never hands
    /// its file names to a later one.
    pub fn next_request(&mut self, source: impl Into<String>) -> BuildRequest {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        BuildRequest {
            sequence,
            source: source.into(),
            config: self.config.clone(),
        }
    }

    /// Build a request into a loadable artifact.
    ///
    /// Every toolchain output line is passed to `sink`. On failure all files
    /// written so far stay on disk for inspection.
    pub fn build(
        &mut self,
        request: &BuildRequest,
        sink: &mut dyn FnMut(BuildStep, &str),
    ) -> Result<Artifact, BuildError> {
        let start = Instant::now();
        let config = &request.config;
        let workspace = self.ensure_workspace(config)?;
        let files = workspace.files(request.sequence, config.profile);
        let target_dir = workspace.target_dir().to_path_buf();

        tracing::info!(
            "Building module {} in {}",
            request.sequence,
            workspace.root().display()
        );

        write_file(&files.source, request.source.as_bytes())?;

        let package = Workspace::package_name(request.sequence);
        let manifest = generate_cargo_toml(&ManifestConfig {
            name: &package,
            source: &files.source,
            config,
        });
        let manifest_dir = files.manifest.parent().unwrap_or(workspace.root());
        fs::create_dir_all(manifest_dir).map_err(|e| unavailable(manifest_dir, e))?;
        write_file(&files.manifest, manifest.as_bytes())?;

        let log_file = File::create(&files.log).map_err(|e| unavailable(&files.log, e))?;
        let mut log_file = BufWriter::new(log_file);

        let env = step_env(config);
        let manifest_dir = manifest_dir.to_path_buf();

        let generate = StepCommand {
            step: BuildStep::Generate,
            program: config.generator.clone(),
            args: generate_args(&files.manifest),
            env: env.clone(),
            current_dir: manifest_dir.clone(),
        }
        .run(&mut log_file, sink);

        if !generate.success {
            let _ = log_file.flush();
            tracing::error!("Project generation failed for module {}", request.sequence);
            return Err(BuildError::ProjectGenerationFailed {
                log_path: files.log.clone(),
                log: generate.log,
            });
        }

        let build = StepCommand {
            step: BuildStep::Build,
            program: config.builder.clone(),
            args: build_args(&files.manifest, &target_dir, config.profile),
            env,
            current_dir: manifest_dir,
        }
        .run(&mut log_file, sink);

        let _ = log_file.flush();

        if !build.success {
            tracing::error!("Build failed for module {}", request.sequence);
            return Err(BuildError::CompileLinkFailed {
                log_path: files.log.clone(),
                log: build.log,
            });
        }

        let elapsed = start.elapsed();
        tracing::info!(
            "Built module {} in {}ms",
            request.sequence,
            elapsed.as_millis()
        );

        Ok(Artifact {
            sequence: request.sequence,
            path: files.artifact.clone(),
            files,
            elapsed,
        })
    }

    fn ensure_workspace(&mut self, config: &BuildConfig) -> Result<&Workspace, BuildError> {
        let workspace = match self.workspace.take() {
            Some(workspace) => workspace,
            None => {
                let workspace = match &config.workspace {
                    Some(path) => Workspace::at(path).map_err(|e| unavailable(path, e))?,
                    None => Workspace::temporary()
                        .map_err(|e| unavailable(&std::env::temp_dir(), e))?,
                };
                let workspace = match &config.target_dir {
                    Some(dir) => workspace.with_target_dir(dir),
                    None => workspace,
                };
                tracing::debug!("Created workspace at {}", workspace.root().display());
                workspace
            }
        };

        Ok(&*self.workspace.insert(workspace))
    }
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), BuildError> {
    fs::write(path, contents).map_err(|e| unavailable(path, e))
}

fn unavailable(path: &Path, message: impl ToString) -> BuildError {
    BuildError::WorkspaceUnavailable {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn generate_args(manifest: &Path) -> Vec<OsString> {
    vec![
        "fetch".into(),
        "--manifest-path".into(),
        manifest.as_os_str().to_owned(),
    ]
}

fn build_args(manifest: &Path, target_dir: &Path, profile: Profile) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "build".into(),
        "--manifest-path".into(),
        manifest.as_os_str().to_owned(),
        "--target-dir".into(),
        target_dir.as_os_str().to_owned(),
        "--color".into(),
        "never".into(),
    ];
    if profile == Profile::Release {
        args.push("--release".into());
    }
    args
}

/// Environment for both toolchain steps: the config's overrides plus the
/// native link options folded into `CARGO_ENCODED_RUSTFLAGS`.
fn step_env(config: &BuildConfig) -> Vec<(OsString, OsString)> {
    let mut env: Vec<(OsString, OsString)> = config
        .env
        .iter()
        .filter(|(name, _)| name.as_str() != "CARGO_ENCODED_RUSTFLAGS")
        .map(|(name, value)| (name.into(), value.into()))
        .collect();

    let extra = config.rustflags();
    if extra.is_empty() {
        if let Some(value) = config.env.get("CARGO_ENCODED_RUSTFLAGS") {
            env.push(("CARGO_ENCODED_RUSTFLAGS".into(), value.into()));
        }
        return env;
    }

    // Cargo ignores RUSTFLAGS once the encoded form is set, so carry it over.
    let lookup = |name: &str| {
        config
            .env
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
            .filter(|v| !v.is_empty())
    };
    let mut flags: Vec<String> = match lookup("CARGO_ENCODED_RUSTFLAGS") {
        Some(encoded) => encoded
            .split(ENCODED_FLAG_SEPARATOR)
            .map(str::to_string)
            .collect(),
        None => lookup("RUSTFLAGS")
            .map(|plain| plain.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
    };
    flags.extend(extra);

    let separator = ENCODED_FLAG_SEPARATOR.to_string();
    env.push((
        "CARGO_ENCODED_RUSTFLAGS".into(),
        flags.join(&separator).into(),
    ));
    env
}
