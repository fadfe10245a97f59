//! Build, load and hot-reload engine for the kiln runtime.
//!
//! This crate provides:
//! - Build pipeline driving cargo to turn source text into a `cdylib`
//! - Module loading and entry point resolution
//! - Frame-stack variable registry shared by the host and its modules
//! - Hot-reload engine tying the stages together
//! - Watch loop re-executing files as they change
//!
//! ```text
//! WatchLoop ──► HotReloadEngine::execute(source)
//!                   │
//!                   ├── BuildPipeline::build   ──► artifact
//!                   ├── ModuleLoader::load     ──► Module
//!                   ├── VariableRegistry::push_frame(module)
//!                   └── kiln_entry(ExecutionContext)
//! ```

pub mod build;
pub mod context;
pub mod engine;
pub mod error;
pub mod load;
pub mod watch;
pub mod workspace;

pub use build::{
    Artifact, BuildConfig, BuildPipeline, BuildRequest, BuildStep, Dependency, Profile,
};
pub use context::{Destructor, ExecutionContext, FrameId, FrameInfo, Handle, VariableRegistry};
pub use engine::{EngineCallback, EngineState, HotReloadEngine};
pub use error::{BuildError, Error, LoadError, ResolveError, Result, WatchError};
pub use load::Module;
pub use notify::EventKind;
pub use watch::{ExecuteFile, WatchLoop, WatchOptions, WatchedSource};
pub use workspace::{BuildFiles, Workspace};
