//! The context a module sees while its entry point runs.

use std::ffi::{CStr, c_char, c_void};

use kiln::ffi::{ABI_VERSION, Destructor as RawDestructor, EntryFn, RawContext};

use crate::engine::EngineCallback;

use super::registry::{Destructor, FrameId, Handle, VariableRegistry};

/// Lookup, registration and logging for one entry call.
///
/// Borrows the registry mutably for the duration of the call, so everything
/// the module registers lands in the frame that was on top when the context
/// was created.
pub struct ExecutionContext<'r> {
    registry: &'r mut VariableRegistry,
    frame: FrameId,
    callback: Option<&'r dyn EngineCallback>,
}

impl<'r> ExecutionContext<'r> {
    /// Create a context for the registry's current top frame.
    pub fn new(registry: &'r mut VariableRegistry) -> Self {
        let frame = registry.current_frame();
        Self {
            registry,
            frame,
            callback: None,
        }
    }

    /// Forward module log messages to `callback` as well.
    pub fn with_callback(mut self, callback: Option<&'r dyn EngineCallback>) -> Self {
        self.callback = callback;
        self
    }

    /// Frame this context registers into.
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    /// Most recent binding of `name`.
    pub fn lookup(&self, name: &str) -> Option<Handle> {
        self.registry.lookup(name)
    }

    /// Bind `value` to `name` in this context's frame.
    pub fn register(
        &mut self,
        value: Handle,
        name: impl Into<String>,
        destructor: Option<Destructor>,
    ) -> Handle {
        self.registry.register(value, name, destructor)
    }

    /// Diagnostic message from the running module.
    pub fn log(&self, message: &str) {
        tracing::info!(target: "kiln::module", "[frame {}] {}", self.frame, message);
        if let Some(callback) = self.callback {
            callback.on_module_log(self.frame, message);
        }
    }

    /// Call a module entry point with this context.
    ///
    /// # Safety
    /// `entry` must come from a module that is still loaded and must have the
    /// entry signature.
    pub unsafe fn invoke(&mut self, entry: EntryFn) {
        let mut raw = RawContext {
            abi_version: ABI_VERSION,
            data: (self as *mut Self).cast::<c_void>(),
            lookup: ffi_lookup,
            register: ffi_register,
            log: ffi_log,
        };
        // SAFETY: `raw.data` points to `self`, which outlives the call, and is
        // only accessed through the callbacks below while the call runs.
        unsafe { entry(&mut raw) };
    }
}

/// Recover the context from the callback data pointer.
///
/// # Safety
/// `data` must be the pointer set up by [`ExecutionContext::invoke`].
unsafe fn context<'a>(data: *mut c_void) -> Option<&'a mut ExecutionContext<'a>> {
    unsafe { data.cast::<ExecutionContext<'a>>().as_mut() }
}

unsafe fn name_arg(name: *const c_char) -> Option<String> {
    if name.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
}

unsafe extern "C" fn ffi_lookup(data: *mut c_void, name: *const c_char) -> *mut c_void {
    let (Some(ctx), Some(name)) = (unsafe { context(data) }, unsafe { name_arg(name) }) else {
        return std::ptr::null_mut();
    };
    ctx.lookup(&name).map_or(std::ptr::null_mut(), Handle::as_ptr)
}

unsafe extern "C" fn ffi_register(
    data: *mut c_void,
    value: *mut c_void,
    name: *const c_char,
    destructor: Option<RawDestructor>,
) -> *mut c_void {
    let Some(ctx) = (unsafe { context(data) }) else {
        return std::ptr::null_mut();
    };
    let Some(name) = (unsafe { name_arg(name) }) else {
        tracing::warn!("Module in frame {} registered a value without a name", ctx.frame);
        return std::ptr::null_mut();
    };

    // The destructor is code in the module; the registry releases the module
    // only after running it.
    let destructor = destructor.map(|d| -> Destructor {
        Box::new(move |handle: Handle| unsafe { d(handle.as_ptr()) })
    });
    ctx.register(Handle::from_raw(value), name, destructor).as_ptr()
}

unsafe extern "C" fn ffi_log(data: *mut c_void, message: *const u8, len: usize) {
    let Some(ctx) = (unsafe { context(data) }) else {
        return;
    };
    if message.is_null() {
        return;
    }
    let bytes = unsafe { std::slice::from_raw_parts(message, len) };
    ctx.log(&String::from_utf8_lossy(bytes));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::ffi::CString;

    /// Entry point that exercises every callback like a compiled module would.
    unsafe extern "C" fn fake_entry(raw: *mut RawContext) {
        let raw = unsafe { &*raw };
        let base = CString::new("base").unwrap();
        let doubled = CString::new("doubled").unwrap();

        let found = unsafe { (raw.lookup)(raw.data, base.as_ptr()) } as usize;
        unsafe { (raw.register)(raw.data, (found * 2) as *mut c_void, doubled.as_ptr(), None) };

        let message = b"doubled base";
        unsafe { (raw.log)(raw.data, message.as_ptr(), message.len()) };
    }

    unsafe extern "C" fn null_name_entry(raw: *mut RawContext) {
        let raw = unsafe { &*raw };
        let result =
            unsafe { (raw.register)(raw.data, 0x1 as *mut c_void, std::ptr::null(), None) };
        assert!(result.is_null());
        assert!(unsafe { (raw.lookup)(raw.data, std::ptr::null()) }.is_null());
    }

    #[derive(Default)]
    struct LogCollector {
        lines: RefCell<Vec<(FrameId, String)>>,
    }

    impl EngineCallback for LogCollector {
        fn on_module_log(&self, frame: FrameId, message: &str) {
            self.lines.borrow_mut().push((frame, message.to_string()));
        }
    }

    #[test]
    fn test_invoke_registers_into_new_frame() {
        let mut registry = VariableRegistry::new();
        registry.register(Handle::from_addr(21), "base", None);
        let frame = registry.push_frame(None);

        let collector = LogCollector::default();
        let mut ctx = ExecutionContext::new(&mut registry).with_callback(Some(&collector));
        assert_eq!(ctx.frame(), frame);
        unsafe { ctx.invoke(fake_entry) };

        assert_eq!(registry.lookup("doubled"), Some(Handle::from_addr(42)));
        assert_eq!(registry.frames()[1].variables, vec!["doubled"]);
        assert_eq!(
            *collector.lines.borrow(),
            vec![(frame, "doubled base".to_string())]
        );
    }

    #[test]
    fn test_null_names_are_rejected() {
        let mut registry = VariableRegistry::new();
        registry.push_frame(None);

        let mut ctx = ExecutionContext::new(&mut registry);
        unsafe { ctx.invoke(null_name_entry) };

        assert!(registry.frames()[1].variables.is_empty());
    }

    #[test]
    fn test_module_destructor_runs_at_teardown() {
        static DESTROYED: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

        unsafe extern "C" fn destroy(value: *mut c_void) {
            DESTROYED.store(value as usize, std::sync::atomic::Ordering::SeqCst);
        }

        unsafe extern "C" fn entry(raw: *mut RawContext) {
            let raw = unsafe { &*raw };
            let name = CString::new("owned").unwrap();
            unsafe { (raw.register)(raw.data, 7 as *mut c_void, name.as_ptr(), Some(destroy)) };
        }

        let mut registry = VariableRegistry::new();
        registry.push_frame(None);
        unsafe { ExecutionContext::new(&mut registry).invoke(entry) };

        assert_eq!(DESTROYED.load(std::sync::atomic::Ordering::SeqCst), 0);
        registry.teardown();
        assert_eq!(DESTROYED.load(std::sync::atomic::Ordering::SeqCst), 7);
    }
}
