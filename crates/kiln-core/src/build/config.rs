//! Build configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator for path-list environment variables such as `PATH`.
#[cfg(windows)]
const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_LIST_SEPARATOR: char = ':';

/// Cargo profile used for module builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Debug,
    Release,
}

impl Profile {
    /// Subdirectory of the target dir holding this profile's output.
    pub fn target_subdir(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    /// Name of the manifest's `[profile.*]` table.
    pub fn manifest_table(self) -> &'static str {
        match self {
            Self::Debug => "dev",
            Self::Release => "release",
        }
    }
}

/// A crate the module may use, in cargo's terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// Crate name.
    pub name: String,
    /// Version requirement (for registry crates).
    #[serde(default)]
    pub version: Option<String>,
    /// Local path (for path crates).
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Features to enable.
    #[serde(default)]
    pub features: Vec<String>,
}

impl Dependency {
    /// Registry dependency.
    pub fn version(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
            path: None,
            features: Vec::new(),
        }
    }

    /// Local path dependency.
    pub fn path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            version: None,
            path: Some(path.into()),
            features: Vec::new(),
        }
    }

    /// Parse a `name=version` or `name=path` spec.
    ///
    /// The right-hand side is a path when it contains a path separator or
    /// starts with `.`; otherwise it is a version requirement. A bare name
    /// means any version.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, rhs) = match spec.split_once('=') {
            Some((name, rhs)) => (name.trim(), rhs.trim()),
            None => (spec.trim(), "*"),
        };

        if name.is_empty() || rhs.is_empty() {
            return Err(Error::Config(format!(
                "invalid dependency `{}`, expected name=version or name=path",
                spec
            )));
        }

        if rhs.starts_with('.') || rhs.contains('/') || rhs.contains('\\') {
            Ok(Self::path(name, rhs))
        } else {
            Ok(Self::version(name, rhs))
        }
    }
}

/// Configuration for module builds.
///
/// Everything here is snapshotted into each build request, so changing the
/// config only affects later builds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Workspace directory. `None` means a temporary directory that is
    /// removed at teardown.
    pub workspace: Option<PathBuf>,

    /// Target directory override. Defaults to `<workspace>/target`.
    pub target_dir: Option<PathBuf>,

    /// Project-generation program (resolves dependencies, writes the lockfile).
    pub generator: PathBuf,

    /// Compile/link program.
    pub builder: PathBuf,

    /// Environment overrides for toolchain processes, on top of the
    /// inherited environment.
    pub env: BTreeMap<String, String>,

    /// Cargo features enabled by default, usable as `#[cfg(feature = "...")]`.
    pub defines: Vec<String>,

    /// Crates available to the module.
    pub dependencies: Vec<Dependency>,

    /// Native libraries to link (`-l`).
    pub link_libs: Vec<String>,

    /// Native library search paths (`-L`).
    pub link_search_paths: Vec<PathBuf>,

    /// Raw rustc flags.
    pub extra_flags: Vec<String>,

    /// Build profile.
    pub profile: Profile,

    /// Optimization level override for the chosen profile (0-3).
    pub opt_level: Option<u8>,

    /// Debug info override for the chosen profile.
    pub debug_info: Option<bool>,

    /// Rust edition of module sources.
    pub edition: String,

    /// Make the `kiln` crate available to modules.
    pub link_sdk: bool,

    /// Where the `kiln` crate lives. `None` uses the published version.
    pub sdk_path: Option<PathBuf>,

    /// Unload modules at teardown. When `false`, module code stays mapped
    /// until the process exits, so objects created by modules may outlive
    /// the engine.
    pub unload_modules: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            workspace: None,
            target_dir: None,
            generator: PathBuf::from("cargo"),
            builder: PathBuf::from("cargo"),
            env: BTreeMap::new(),
            defines: Vec::new(),
            dependencies: Vec::new(),
            link_libs: Vec::new(),
            link_search_paths: Vec::new(),
            extra_flags: Vec::new(),
            profile: Profile::Debug,
            opt_level: None,
            debug_info: None,
            edition: "2021".to_string(),
            link_sdk: true,
            sdk_path: Self::detect_sdk_path(),
            unload_modules: true,
        }
    }
}

impl BuildConfig {
    /// Detect the path to the kiln SDK crate.
    ///
    /// Checks `KILN_SDK_PATH`, then a source checkout around the running
    /// executable, then `CARGO_MANIFEST_DIR` (set under `cargo test`).
    /// Returns `None` when installed from crates.io.
    fn detect_sdk_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("KILN_SDK_PATH") {
            let path = PathBuf::from(path);
            if path.join("Cargo.toml").exists() {
                return Some(path);
            }
        }

        // e.g. /path/to/kiln/target/release/kiln
        if let Ok(exe_path) = std::env::current_exe()
            && let Some(root) = exe_path.ancestors().nth(3)
        {
            let sdk = root.join("crates").join("kiln");
            if sdk.join("Cargo.toml").exists() {
                return Some(sdk);
            }
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR")
            && let Some(root) = PathBuf::from(&manifest_dir)
                .ancestors()
                .find(|p| p.join("crates").join("kiln").join("Cargo.toml").exists())
        {
            return Some(root.join("crates").join("kiln"));
        }

        None
    }

    /// Config for fast development builds.
    pub fn development() -> Self {
        Self::default()
    }

    /// Config for optimized builds.
    pub fn release() -> Self {
        Self {
            profile: Profile::Release,
            ..Self::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Set an environment variable for the toolchain processes.
    pub fn set_env(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.env.insert(name.into(), value.into());
    }

    /// Put `value` in front of a path-list variable such as `PATH`.
    ///
    /// The current value comes from earlier overrides, or else from the
    /// host's own environment.
    pub fn add_env(&mut self, name: &str, value: &str) {
        let current = self
            .env
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
            .unwrap_or_default();

        let joined = match (value.is_empty(), current.is_empty()) {
            (_, true) => value.to_string(),
            (true, false) => current,
            (false, false) => format!("{}{}{}", value, PATH_LIST_SEPARATOR, current),
        };
        self.env.insert(name.to_string(), joined);
    }

    /// Load `NAME=VALUE` lines from a file into the environment overrides.
    ///
    /// Blank lines, lines starting with `#` and lines without `=` are skipped.
    pub fn load_env(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let text = fs::read_to_string(path.as_ref())?;
        for line in text.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            if let Some((name, value)) = line.split_once('=') {
                self.env.insert(name.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    /// Flags passed to rustc for native linking and raw options.
    pub fn rustflags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        for dir in &self.link_search_paths {
            flags.push("-L".to_string());
            flags.push(dir.display().to_string());
        }
        for lib in &self.link_libs {
            flags.push("-l".to_string());
            flags.push(lib.clone());
        }
        flags.extend(self.extra_flags.iter().cloned());
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = BuildConfig::default();
        assert_eq!(config.profile, Profile::Debug);
        assert_eq!(config.generator, PathBuf::from("cargo"));
        assert!(config.link_sdk);
        assert!(config.unload_modules);
        assert_eq!(config.edition, "2021");
    }

    #[test]
    fn test_release_config() {
        let config = BuildConfig::release();
        assert_eq!(config.profile, Profile::Release);
        assert_eq!(config.profile.target_subdir(), "release");
    }

    #[test]
    fn test_sdk_detected_in_checkout() {
        // CARGO_MANIFEST_DIR points into this workspace under `cargo test`.
        let config = BuildConfig::default();
        let sdk = config.sdk_path.expect("SDK should be found in the checkout");
        assert!(sdk.join("Cargo.toml").exists());
    }

    #[test]
    fn test_add_env_prepends() {
        let mut config = BuildConfig::default();
        config.set_env("KILN_TEST_LIST", "/a");
        config.add_env("KILN_TEST_LIST", "/b");

        let expected = format!("/b{}/a", PATH_LIST_SEPARATOR);
        assert_eq!(config.env["KILN_TEST_LIST"], expected);
    }

    #[test]
    fn test_add_env_to_empty() {
        let mut config = BuildConfig::default();
        config.add_env("KILN_TEST_UNSET_VARIABLE", "/only");
        assert_eq!(config.env["KILN_TEST_UNSET_VARIABLE"], "/only");
    }

    #[test]
    fn test_load_env() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("env.txt");
        fs::write(&file, "# toolchain\nCC=clang\n\nnot a pair\nRUSTFLAGS=-Copt-level=1\n").unwrap();

        let mut config = BuildConfig::default();
        config.load_env(&file).unwrap();

        assert_eq!(config.env["CC"], "clang");
        assert_eq!(config.env["RUSTFLAGS"], "-Copt-level=1");
        assert_eq!(config.env.len(), 2);
    }

    #[test]
    fn test_load_env_missing_file() {
        let mut config = BuildConfig::default();
        assert!(config.load_env("/definitely/not/here.env").is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("kiln.json");
        fs::write(
            &file,
            r#"{ "profile": "release", "defines": ["fast"], "link_libs": ["m"] }"#,
        )
        .unwrap();

        let config = BuildConfig::from_file(&file).unwrap();
        assert_eq!(config.profile, Profile::Release);
        assert_eq!(config.defines, vec!["fast"]);
        assert_eq!(config.edition, "2021");
    }

    #[test]
    fn test_from_file_invalid() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("kiln.json");
        fs::write(&file, "{ not json").unwrap();

        let err = BuildConfig::from_file(&file).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_parse_dependency() {
        assert_eq!(
            Dependency::parse("serde=1.0").unwrap(),
            Dependency::version("serde", "1.0")
        );
        assert_eq!(
            Dependency::parse("local=../crates/local").unwrap(),
            Dependency::path("local", "../crates/local")
        );
        assert_eq!(
            Dependency::parse("anyhow").unwrap(),
            Dependency::version("anyhow", "*")
        );
        assert!(Dependency::parse("=1.0").is_err());
    }

    #[test]
    fn test_rustflags() {
        let config = BuildConfig {
            link_libs: vec!["m".to_string()],
            link_search_paths: vec![PathBuf::from("/opt/lib")],
            extra_flags: vec!["-Ctarget-cpu=native".to_string()],
            ..Default::default()
        };
        assert_eq!(
            config.rustflags(),
            vec!["-L", "/opt/lib", "-l", "m", "-Ctarget-cpu=native"]
        );
    }
}
