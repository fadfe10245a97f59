//! Build options shared by all commands.

use std::path::PathBuf;

use clap::Args;
use kiln_core::{BuildConfig, Dependency, HotReloadEngine, Profile};

use crate::callback::TerminalCallback;

#[derive(Args, Debug, Clone, Default)]
pub struct BuildArgs {
    /// Load build settings from a JSON file (flags override it)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Build modules with optimizations
    #[arg(long)]
    release: bool,

    /// Keep build files in this directory instead of a temporary one
    #[arg(long, value_name = "DIR")]
    workspace: Option<PathBuf>,

    /// Enable a cargo feature in every module (usable with #[cfg(feature = ...)])
    #[arg(short = 'D', long = "define", value_name = "FEATURE")]
    defines: Vec<String>,

    /// Make a crate available to modules
    #[arg(long = "dep", value_name = "NAME=VERSION|PATH")]
    deps: Vec<String>,

    /// Link a native library
    #[arg(short = 'l', long = "lib", value_name = "NAME")]
    libs: Vec<String>,

    /// Add a native library search path
    #[arg(short = 'L', long = "lib-path", value_name = "DIR")]
    lib_paths: Vec<PathBuf>,

    /// Pass a raw flag to rustc
    #[arg(long = "flag", value_name = "FLAG", allow_hyphen_values = true)]
    flags: Vec<String>,

    /// Set an environment variable for the toolchain
    #[arg(long = "env", value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Load toolchain environment variables from a KEY=VALUE file
    #[arg(long = "env-file", value_name = "FILE")]
    env_files: Vec<PathBuf>,

    /// Prepend a directory to the toolchain's PATH
    #[arg(long = "path", value_name = "DIR")]
    path_dirs: Vec<String>,

    /// Project-generation program (default: cargo)
    #[arg(long, value_name = "PROGRAM")]
    generator: Option<PathBuf>,

    /// Build program (default: cargo)
    #[arg(long, value_name = "PROGRAM")]
    builder: Option<PathBuf>,

    /// Do not make the kiln crate available to modules
    #[arg(long)]
    no_sdk: bool,

    /// Keep modules loaded at exit instead of unloading them
    #[arg(long)]
    keep_modules: bool,

    /// Register a host string visible to modules
    #[arg(long = "var", value_name = "NAME=VALUE")]
    vars: Vec<String>,
}

impl BuildArgs {
    /// Build configuration from the config file and flags.
    pub fn to_config(&self) -> anyhow::Result<BuildConfig> {
        let mut config = match &self.config {
            Some(path) => BuildConfig::from_file(path)?,
            None => BuildConfig::default(),
        };

        if self.release {
            config.profile = Profile::Release;
        }
        if let Some(workspace) = &self.workspace {
            config.workspace = Some(workspace.clone());
        }
        if let Some(generator) = &self.generator {
            config.generator = generator.clone();
        }
        if let Some(builder) = &self.builder {
            config.builder = builder.clone();
        }
        if self.no_sdk {
            config.link_sdk = false;
        }
        if self.keep_modules {
            config.unload_modules = false;
        }

        config.defines.extend(self.defines.iter().cloned());
        for dep in &self.deps {
            config.dependencies.push(Dependency::parse(dep)?);
        }
        config.link_libs.extend(self.libs.iter().cloned());
        config.link_search_paths.extend(self.lib_paths.iter().cloned());
        config.extra_flags.extend(self.flags.iter().cloned());

        for file in &self.env_files {
            config.load_env(file)?;
        }
        for pair in &self.env {
            let (name, value) = split_pair(pair, "--env")?;
            config.set_env(name, value);
        }
        for dir in &self.path_dirs {
            config.add_env("PATH", dir);
        }

        Ok(config)
    }

    /// Host values given with `--var`.
    pub fn vars(&self) -> anyhow::Result<Vec<(String, String)>> {
        self.vars
            .iter()
            .map(|pair| {
                split_pair(pair, "--var").map(|(name, value)| (name.to_string(), value.to_string()))
            })
            .collect()
    }

    /// Create an engine reporting to the terminal, with `--var` values
    /// registered in the bootstrap frame.
    pub fn engine(&self, callback: TerminalCallback) -> anyhow::Result<HotReloadEngine> {
        let vars = self.vars()?;
        let mut engine = HotReloadEngine::new(self.to_config()?);
        engine.set_callback(callback);
        for (name, value) in vars {
            engine.register_boxed(name, value);
        }
        Ok(engine)
    }
}

fn split_pair<'a>(pair: &'a str, flag: &str) -> anyhow::Result<(&'a str, &'a str)> {
    match pair.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name, value)),
        _ => anyhow::bail!("invalid {} `{}`, expected NAME=VALUE", flag, pair),
    }
}
