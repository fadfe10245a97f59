//! Integration tests for the hot-reload engine.
//!
//! Every test compiles real modules with cargo. Modules speak the raw C ABI
//! and are built without the SDK, so no registry access is needed.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use kiln_core::{
    BuildConfig, BuildError, EngineCallback, EngineState, Error, FrameId, Handle, HotReloadEngine,
    ResolveError,
};
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Declarations every raw-ABI test module starts with.
const PRELUDE: &str = r#"
use std::ffi::{c_char, c_void};

#[repr(C)]
pub struct RawContext {
    abi_version: u32,
    data: *mut c_void,
    lookup: unsafe extern "C" fn(*mut c_void, *const c_char) -> *mut c_void,
    register: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        *const c_char,
        Option<unsafe extern "C" fn(*mut c_void)>,
    ) -> *mut c_void,
    log: unsafe extern "C" fn(*mut c_void, *const u8, usize),
}
"#;

/// A module whose entry point runs `body` with `ctx: &RawContext` in scope.
fn module(body: &str) -> String {
    format!(
        "{PRELUDE}\n#[no_mangle]\npub unsafe extern \"C\" fn kiln_entry(ctx: *mut RawContext) {{\n    let ctx = &*ctx;\n    {body}\n}}\n"
    )
}

/// A module registering `value` under `name`.
fn registering(name: &str, value: usize) -> String {
    module(&format!(
        "(ctx.register)(ctx.data, {value} as *mut c_void, c\"{name}\".as_ptr(), None);"
    ))
}

fn engine(dir: &Path) -> HotReloadEngine {
    HotReloadEngine::new(BuildConfig {
        workspace: Some(dir.join("ws")),
        link_sdk: false,
        ..Default::default()
    })
}

#[derive(Default, Clone)]
struct LogCollector {
    lines: Rc<RefCell<Vec<(FrameId, String)>>>,
}

impl EngineCallback for LogCollector {
    fn on_module_log(&self, frame: FrameId, message: &str) {
        self.lines.borrow_mut().push((frame, message.to_string()));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn test_later_module_shadows_earlier_binding() {
    let temp = TempDir::new().unwrap();
    let mut engine = engine(temp.path());

    let first = engine.execute(&registering("a", 0x1)).unwrap();
    assert_eq!(engine.lookup("a"), Some(Handle::from_addr(0x1)));

    let second = engine.execute(&registering("a", 0x2)).unwrap();
    assert_eq!(engine.lookup("a"), Some(Handle::from_addr(0x2)));

    assert_eq!(first, FrameId::new(1));
    assert_eq!(second, FrameId::new(2));

    let frames = engine.frames();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[1].variables, vec!["a"]);
    assert_eq!(frames[2].variables, vec!["a"]);
    assert!(frames[1].module.is_some());
    assert_ne!(frames[1].module, frames[2].module);
}

#[test]
fn test_module_reads_host_values() {
    let temp = TempDir::new().unwrap();
    let mut engine = engine(temp.path());
    engine.register(Handle::from_addr(21), "base", None);

    let source = module(
        r#"let base = (ctx.lookup)(ctx.data, c"base".as_ptr()) as usize;
    (ctx.register)(ctx.data, (base * 2) as *mut c_void, c"doubled".as_ptr(), None);"#,
    );
    engine.execute(&source).unwrap();

    assert_eq!(engine.lookup("doubled"), Some(Handle::from_addr(42)));
    assert_eq!(engine.frames()[0].variables, vec!["base"]);
}

#[test]
fn test_failed_build_then_success() {
    let temp = TempDir::new().unwrap();
    let mut engine = engine(temp.path());
    engine.execute(&registering("a", 0x1)).unwrap();
    let before = engine.frames();

    let err = engine.execute("this is not rust").unwrap_err();
    match &err {
        Error::Build(BuildError::CompileLinkFailed { log_path, log }) => {
            assert!(log_path.exists());
            assert!(log.contains("[build]"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.frames(), before);
    assert_eq!(engine.lookup("a"), Some(Handle::from_addr(0x1)));

    let frame = engine.execute(&registering("b", 0x2)).unwrap();
    assert_eq!(frame.as_usize(), before.len());

    // One set of files per attempt, none overwritten.
    let ws = engine.workspace_path().unwrap();
    for seq in 0..3 {
        assert!(ws.join(format!("module_{seq}.rs")).exists());
        assert!(ws.join(format!("module_{seq}.log")).exists());
    }
    let failed = fs::read_to_string(ws.join("module_1.rs")).unwrap();
    assert_eq!(failed, "this is not rust");
}

#[test]
fn test_missing_entry_point() {
    let temp = TempDir::new().unwrap();
    let mut engine = engine(temp.path());

    let source = format!("{PRELUDE}\n#[no_mangle]\npub extern \"C\" fn not_the_entry() {{}}\n");
    let err = engine.execute(&source).unwrap_err();

    assert!(matches!(
        err,
        Error::Resolve(ResolveError::SymbolNotFound { .. })
    ));
    assert_eq!(engine.frame_count(), 1);
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn test_module_log_reaches_callback() {
    let temp = TempDir::new().unwrap();
    let mut engine = engine(temp.path());
    let collector = LogCollector::default();
    engine.set_callback(collector.clone());

    let source = module(
        r#"let message = "hello from a module";
    (ctx.log)(ctx.data, message.as_ptr(), message.len());"#,
    );
    let frame = engine.execute(&source).unwrap();

    assert_eq!(
        *collector.lines.borrow(),
        vec![(frame, "hello from a module".to_string())]
    );
}

#[test]
fn test_keep_modules_loaded_at_teardown() {
    let temp = TempDir::new().unwrap();
    let mut engine = engine(temp.path());
    engine.config_mut().unload_modules = false;

    engine.execute(&registering("a", 0x1)).unwrap();
    engine.teardown();
}

#[test]
#[ignore = "needs crates.io access to resolve the SDK's dependencies"]
fn test_sdk_module() {
    let temp = TempDir::new().unwrap();
    let mut engine = HotReloadEngine::new(BuildConfig {
        workspace: Some(temp.path().join("ws")),
        ..Default::default()
    });
    engine.register_boxed("count", 41u64);

    let source = r#"
use kiln::prelude::*;

#[kiln::entry]
fn main(ctx: &Context) {
    let count = unsafe { ctx.get::<u64>("count") }.copied().unwrap_or(0);
    ctx.set("next", count + 1);
    log!(ctx, "next = {}", count + 1);
}
"#;
    engine.execute(source).unwrap();

    let next = unsafe { engine.registry().get::<u64>("next") };
    assert_eq!(next, Some(&42));
}
