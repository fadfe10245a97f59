//! Hot-reload engine.
//!
//! Drives one source blob at a time through build, load, resolve and
//! execute, keeping every successfully executed module alive in its own
//! frame until the engine is torn down.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use kiln::ffi::ENTRY_SYMBOL;

use crate::build::{BuildConfig, BuildPipeline, BuildStep};
use crate::context::{Destructor, ExecutionContext, FrameId, FrameInfo, Handle, VariableRegistry};
use crate::error::{Error, Result};
use crate::load::ModuleLoader;

/// Where the engine is in the execute cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Building,
    Loading,
    Executing,
    /// A stage failed; the engine returns to `Idle` right after reporting.
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::Loading => "loading",
            Self::Executing => "executing",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Callback trait for engine progress reporting.
///
/// Every method has an empty default, so implementors pick what they need.
pub trait EngineCallback {
    /// Called before the toolchain runs.
    fn on_build_started(&self, _sequence: u64) {}

    /// Called for every line of toolchain output.
    fn on_build_output(&self, _step: BuildStep, _line: &str) {}

    /// Called after a successful build.
    fn on_build_finished(&self, _sequence: u64, _elapsed: Duration) {}

    /// Called when a module's frame has been pushed, before its entry runs.
    fn on_frame_created(&self, _frame: FrameId) {}

    /// Called when a module logs a message.
    fn on_module_log(&self, _frame: FrameId, _message: &str) {}

    /// Called when `execute` fails.
    fn on_error(&self, _error: &Error) {}
}

/// Compiles, loads and runs source code inside the current process.
///
/// ```rust,ignore
/// let mut engine = HotReloadEngine::new(BuildConfig::default());
/// engine.register_boxed("greeting", String::from("hello"));
/// let frame = engine.execute(r#"
///     #[kiln::entry]
///     fn main(ctx: &kiln::Context) {
///         let greeting = unsafe { ctx.get::<String>("greeting") };
///         kiln::log!(ctx, "{:?}", greeting);
///     }
/// "#)?;
/// ```
pub struct HotReloadEngine {
    // Dropped first: modules go away before the workspace holding them.
    registry: VariableRegistry,
    pipeline: BuildPipeline,
    state: EngineState,
    callback: Option<Box<dyn EngineCallback>>,
}

impl HotReloadEngine {
    /// Create an engine. The workspace is created on the first build.
    pub fn new(config: BuildConfig) -> Self {
        Self {
            registry: VariableRegistry::new(),
            pipeline: BuildPipeline::new(config),
            state: EngineState::Idle,
            callback: None,
        }
    }

    /// Set the progress callback.
    pub fn set_callback(&mut self, callback: impl EngineCallback + 'static) {
        self.callback = Some(Box::new(callback));
    }

    /// Current build configuration.
    pub fn config(&self) -> &BuildConfig {
        self.pipeline.config()
    }

    /// Mutable build configuration. Applies to later `execute` calls.
    pub fn config_mut(&mut self) -> &mut BuildConfig {
        self.pipeline.config_mut()
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The variable registry.
    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    /// Mutable access to the variable registry.
    pub fn registry_mut(&mut self) -> &mut VariableRegistry {
        &mut self.registry
    }

    /// Number of frames, bootstrap included.
    pub fn frame_count(&self) -> usize {
        self.registry.frame_count()
    }

    /// Snapshot of all frames, oldest first.
    pub fn frames(&self) -> Vec<FrameInfo> {
        self.registry.frames()
    }

    /// Workspace directory, once the first build created it.
    pub fn workspace_path(&self) -> Option<&Path> {
        self.pipeline.workspace().map(|w| w.root())
    }

    /// Most recent binding of `name`.
    pub fn lookup(&self, name: &str) -> Option<Handle> {
        self.registry.lookup(name)
    }

    /// Bind a host value in the current top frame.
    pub fn register(
        &mut self,
        value: Handle,
        name: impl Into<String>,
        destructor: Option<Destructor>,
    ) -> Handle {
        self.registry.register(value, name, destructor)
    }

    /// Move a host value to the heap and bind it; teardown drops it.
    pub fn register_boxed<T: 'static>(&mut self, name: impl Into<String>, value: T) -> Handle {
        self.registry.register_boxed(name, value)
    }

    /// Build, load and run `source` in a new frame.
    ///
    /// On success the module and everything it registered stay alive until
    /// teardown. On failure no frame or binding is added or removed.
    pub fn execute(&mut self, source: &str) -> Result<FrameId> {
        let request = self.pipeline.next_request(source);

        self.set_state(EngineState::Building);
        if let Some(callback) = &self.callback {
            callback.on_build_started(request.sequence);
        }

        let callback = self.callback.as_deref();
        let built = self.pipeline.build(&request, &mut |step, line| {
            tracing::trace!("[{}] {}", step, line);
            if let Some(callback) = callback {
                callback.on_build_output(step, line);
            }
        });
        let artifact = match built {
            Ok(artifact) => artifact,
            Err(e) => return Err(self.fail(e.into())),
        };
        if let Some(callback) = &self.callback {
            callback.on_build_finished(artifact.sequence, artifact.elapsed);
        }

        self.set_state(EngineState::Loading);
        let module = match ModuleLoader::load(&artifact.path) {
            Ok(module) => module,
            Err(e) => return Err(self.fail(e.into())),
        };
        let entry = match module.resolve_entry(ENTRY_SYMBOL) {
            Ok(entry) => entry,
            Err(e) => {
                module.unload();
                return Err(self.fail(e.into()));
            }
        };

        self.set_state(EngineState::Executing);
        let frame = self.registry.push_frame(Some(module));
        tracing::info!("Executing module {} in frame {}", artifact.sequence, frame);
        if let Some(callback) = &self.callback {
            callback.on_frame_created(frame);
        }

        let mut ctx =
            ExecutionContext::new(&mut self.registry).with_callback(self.callback.as_deref());
        // SAFETY: the module owning `entry` was just moved into the top frame
        // and stays loaded until teardown.
        unsafe { ctx.invoke(entry) };

        self.set_state(EngineState::Idle);
        Ok(frame)
    }

    /// Read a source file and [`execute`](Self::execute) it.
    pub fn execute_file(&mut self, path: impl AsRef<Path>) -> Result<FrameId> {
        let path = path.as_ref();
        let source = match fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                return Err(self.fail(Error::SourceUnreadable {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }));
            }
        };
        tracing::debug!("Executing {}", path.display());
        self.execute(&source)
    }

    /// Destroy all values and release all modules, newest first.
    ///
    /// Same as dropping the engine.
    pub fn teardown(self) {
        drop(self);
    }

    fn set_state(&mut self, state: EngineState) {
        tracing::debug!("Engine {} -> {}", self.state, state);
        self.state = state;
    }

    /// Report `error` and return to idle.
    fn fail(&mut self, error: Error) -> Error {
        self.set_state(EngineState::Failed);
        tracing::error!("{}", error);
        if let Some(callback) = &self.callback {
            callback.on_error(&error);
        }
        self.set_state(EngineState::Idle);
        error
    }
}

impl Drop for HotReloadEngine {
    fn drop(&mut self) {
        let unload = self.pipeline.config().unload_modules;
        self.registry.set_unload_modules(unload);
    }
}
