//! Dynamic module loading.
//!
//! A [`Module`] is a library mapped into the host process. Only the engine
//! loads modules, and each one is owned by exactly one frame of the variable
//! registry, which decides when it goes away.

use std::fmt;
use std::path::{Path, PathBuf};

use kiln::ffi::EntryFn;
use libloading::{Library, Symbol};

use crate::error::{LoadError, ResolveError};

/// Maps built artifacts into the process.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ModuleLoader;

impl ModuleLoader {
    /// Load the library at `path`.
    ///
    /// Fails on a missing file, a binary for another platform, or unresolved
    /// external symbols; the platform loader's message is kept.
    pub(crate) fn load(path: impl AsRef<Path>) -> Result<Module, LoadError> {
        let path = path.as_ref();
        tracing::debug!("Loading module {}", path.display());

        // SAFETY: loading runs the library's initializers; modules are
        // trusted code built by this process.
        let library = unsafe { Library::new(path) }.map_err(|e| LoadError::OpenFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(Module {
            library,
            path: path.to_path_buf(),
        })
    }
}

/// A loaded library.
///
/// Hosts cannot load one themselves; modules enter the process only through
/// `HotReloadEngine::execute`.
///
/// ```compile_fail
/// let module = kiln_core::load::ModuleLoader::load("libscene.so");
/// ```
pub struct Module {
    library: Library,
    path: PathBuf,
}

impl Module {
    /// Path the module was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Find the entry point exported under `symbol`.
    ///
    /// The returned function pointer is only valid while the module is loaded.
    pub(crate) fn resolve_entry(&self, symbol: &str) -> Result<EntryFn, ResolveError> {
        // SAFETY: the symbol is only ever called with the entry signature, which
        // `#[kiln::entry]` guarantees for well-formed modules.
        let entry: Symbol<EntryFn> = unsafe { self.library.get(symbol.as_bytes()) }.map_err(|e| {
            ResolveError::SymbolNotFound {
                symbol: symbol.to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(*entry)
    }

    /// Unmap the library. Code and statics of the module are gone afterwards.
    pub(crate) fn unload(self) {
        let path = self.path;
        if let Err(e) = self.library.close() {
            tracing::warn!("Failed to unload {}: {}", path.display(), e);
        } else {
            tracing::debug!("Unloaded module {}", path.display());
        }
    }

    /// Keep the library mapped until the process exits.
    pub(crate) fn leak(self) {
        tracing::debug!("Keeping module {} loaded", self.path.display());
        std::mem::forget(self.library);
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module").field("path", &self.path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln::ffi::ENTRY_SYMBOL;

    #[test]
    fn test_missing_file() {
        let err = ModuleLoader::load("/definitely/not/a/module.so").unwrap_err();
        match err {
            LoadError::OpenFailed { path, message } => {
                assert_eq!(path, PathBuf::from("/definitely/not/a/module.so"));
                assert!(!message.is_empty());
            }
        }
    }

    #[test]
    fn test_not_a_library() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"plain text").unwrap();
        assert!(ModuleLoader::load(temp.path()).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_missing_entry_symbol() {
        // Any real library without the entry point will do.
        let module = ModuleLoader::load("libc.so.6").unwrap();
        let err = module.resolve_entry(ENTRY_SYMBOL).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::SymbolNotFound { ref symbol, .. } if symbol == ENTRY_SYMBOL
        ));
        module.leak();
    }
}
