//! Cargo manifest generation for module builds.
//!
//! Each build gets its own standalone package whose `[lib] path` points at the
//! scratch source file, so no source is copied or rewritten.

use std::path::Path;

use super::config::{BuildConfig, Dependency};

/// Inputs for one generated manifest.
#[derive(Debug, Clone)]
pub struct ManifestConfig<'a> {
    /// Package (and library) name.
    pub name: &'a str,
    /// Absolute path of the module source.
    pub source: &'a Path,
    /// Build configuration snapshot.
    pub config: &'a BuildConfig,
}

/// Generate the `Cargo.toml` for a module build.
pub fn generate_cargo_toml(manifest: &ManifestConfig<'_>) -> String {
    let config = manifest.config;
    let mut toml = String::new();

    toml.push_str("[package]\n");
    toml.push_str(&format!("name = \"{}\"\n", manifest.name));
    toml.push_str("version = \"0.0.0\"\n");
    toml.push_str(&format!("edition = \"{}\"\n", config.edition));
    toml.push_str("publish = false\n");
    toml.push('\n');

    toml.push_str("[lib]\n");
    toml.push_str(&format!("path = {}\n", literal(&manifest.source.display().to_string())));
    toml.push_str("crate-type = [\"cdylib\"]\n");
    toml.push('\n');

    // Defines become features that are on by default.
    toml.push_str("[features]\n");
    toml.push_str(&format!("default = [{}]\n", quoted_list(&config.defines)));
    for define in &config.defines {
        toml.push_str(&format!("{} = []\n", basic(define)));
    }
    toml.push('\n');

    toml.push_str("[dependencies]\n");
    if config.link_sdk {
        match &config.sdk_path {
            Some(path) => toml.push_str(&format!(
                "kiln = {{ path = {} }}\n",
                literal(&path.display().to_string())
            )),
            None => toml.push_str(&format!("kiln = \"{}\"\n", env!("CARGO_PKG_VERSION"))),
        }
    }
    for dep in &config.dependencies {
        if config.link_sdk && dep.name == "kiln" {
            continue;
        }
        format_dependency(&mut toml, dep);
    }

    if config.opt_level.is_some() || config.debug_info.is_some() {
        toml.push('\n');
        toml.push_str(&format!("[profile.{}]\n", config.profile.manifest_table()));
        if let Some(level) = config.opt_level {
            toml.push_str(&format!("opt-level = {}\n", level.min(3)));
        }
        if let Some(debug) = config.debug_info {
            toml.push_str(&format!("debug = {}\n", debug));
        }
    }

    // Standalone workspace table (keeps the package out of any parent workspace)
    toml.push('\n');
    toml.push_str("[workspace]\n");

    toml
}

/// Format a single dependency entry.
fn format_dependency(toml: &mut String, dep: &Dependency) {
    let mut fields = Vec::new();

    if let Some(path) = &dep.path {
        // Relative paths would resolve against the per-build directory.
        let abs_path = path.canonicalize().unwrap_or_else(|_| path.clone());
        fields.push(format!("path = {}", literal(&abs_path.display().to_string())));
    } else {
        let version = dep.version.as_deref().unwrap_or("*");
        fields.push(format!("version = {}", basic(version)));
    }

    if !dep.features.is_empty() {
        fields.push(format!("features = [{}]", quoted_list(&dep.features)));
    }

    toml.push_str(&format!("{} = {{ {} }}\n", dep.name, fields.join(", ")));
}

/// TOML literal string; backslashes in Windows paths need no escaping.
fn literal(s: &str) -> String {
    if s.contains('\'') {
        basic(s)
    } else {
        format!("'{}'", s)
    }
}

/// TOML basic string with escapes.
fn basic(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quoted_list(items: &[String]) -> String {
    items.iter().map(|s| basic(s)).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::config::Profile;
    use std::path::PathBuf;

    fn config() -> BuildConfig {
        BuildConfig {
            link_sdk: false,
            ..Default::default()
        }
    }

    fn generate(config: &BuildConfig) -> String {
        generate_cargo_toml(&ManifestConfig {
            name: "kiln_module_3",
            source: Path::new("/ws/module_3.rs"),
            config,
        })
    }

    #[test]
    fn test_basic_manifest() {
        let toml = generate(&config());

        assert!(toml.contains("name = \"kiln_module_3\""));
        assert!(toml.contains("edition = \"2021\""));
        assert!(toml.contains("path = '/ws/module_3.rs'"));
        assert!(toml.contains("crate-type = [\"cdylib\"]"));
        assert!(toml.contains("default = []"));
        assert!(toml.contains("[workspace]"));
        assert!(!toml.contains("kiln ="));
        assert!(!toml.contains("[profile."));
    }

    #[test]
    fn test_defines_become_default_features() {
        let config = BuildConfig {
            defines: vec!["fast".to_string(), "trace".to_string()],
            ..config()
        };
        let toml = generate(&config);

        assert!(toml.contains("default = [\"fast\", \"trace\"]"));
        assert!(toml.contains("\"fast\" = []"));
        assert!(toml.contains("\"trace\" = []"));
    }

    #[test]
    fn test_dependencies() {
        let mut serde = Dependency::version("serde", "1.0");
        serde.features = vec!["derive".to_string()];
        let config = BuildConfig {
            dependencies: vec![serde, Dependency::path("local", "/opt/local")],
            ..config()
        };
        let toml = generate(&config);

        assert!(toml.contains("serde = { version = \"1.0\", features = [\"derive\"] }"));
        assert!(toml.contains("local = { path = '/opt/local' }"));
    }

    #[test]
    fn test_sdk_dependency() {
        let config = BuildConfig {
            link_sdk: true,
            sdk_path: Some(PathBuf::from("/src/kiln/crates/kiln")),
            ..Default::default()
        };
        let toml = generate(&config);
        assert!(toml.contains("kiln = { path = '/src/kiln/crates/kiln' }"));

        let config = BuildConfig {
            link_sdk: true,
            sdk_path: None,
            ..Default::default()
        };
        let toml = generate(&config);
        assert!(toml.contains(&format!("kiln = \"{}\"", env!("CARGO_PKG_VERSION"))));
    }

    #[test]
    fn test_profile_overrides() {
        let config = BuildConfig {
            profile: Profile::Release,
            opt_level: Some(1),
            debug_info: Some(true),
            ..config()
        };
        let toml = generate(&config);

        assert!(toml.contains("[profile.release]\nopt-level = 1\ndebug = true\n"));
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(literal("C:\\ws\\module_0.rs"), "'C:\\ws\\module_0.rs'");
        assert_eq!(literal("it's"), "\"it's\"");
        assert_eq!(basic("a\"b"), "\"a\\\"b\"");
    }
}
