//! Frame-stack variable registry.

use std::ffi::c_void;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use crate::load::Module;

/// Identifier of a frame. Equals the frame's position in the stack, so ids
/// are handed out in creation order and never reused. The bootstrap frame is
/// always `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameId(usize);

impl FrameId {
    /// The frame that exists before any module runs.
    pub const BOOTSTRAP: FrameId = FrameId(0);

    /// Create a frame id from a raw index.
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the raw index.
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque pointer-sized value stored under a name. May be null.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(*mut c_void);

impl Handle {
    /// The null handle.
    pub const NULL: Handle = Handle(std::ptr::null_mut());

    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    /// A handle that carries a plain integer instead of a pointer.
    pub fn from_addr(addr: usize) -> Self {
        Self(addr as *mut c_void)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn addr(self) -> usize {
        self.0 as usize
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:#x})", self.addr())
    }
}

/// Cleanup for a registered value, run once at teardown.
pub type Destructor = Box<dyn FnOnce(Handle)>;

struct Variable {
    name: String,
    value: Handle,
    destructor: Option<Destructor>,
}

struct Frame {
    id: FrameId,
    module: Option<Module>,
    variables: Vec<Variable>,
}

impl Frame {
    fn new(id: FrameId, module: Option<Module>) -> Self {
        Self {
            id,
            module,
            variables: Vec::new(),
        }
    }

    fn find(&self, name: &str) -> Option<Handle> {
        self.variables
            .iter()
            .rev()
            .find(|v| v.name == name)
            .map(|v| v.value)
    }

    /// Destroy variables newest first, then release the module.
    ///
    /// The module goes last because destructors may be code inside it.
    fn teardown(mut self, unload_module: bool) {
        while let Some(variable) = self.variables.pop() {
            let Some(destructor) = variable.destructor else {
                continue;
            };
            let value = variable.value;
            if let Err(e) = catch_unwind(AssertUnwindSafe(move || destructor(value))) {
                tracing::error!(
                    "Destructor for `{}` in frame {} panicked: {:?}",
                    variable.name,
                    self.id,
                    e
                );
            }
        }

        if let Some(module) = self.module.take() {
            if unload_module {
                module.unload();
            } else {
                module.leak();
            }
        }
    }
}

/// Snapshot of one frame, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub id: FrameId,
    /// Path of the module owned by the frame; `None` for bootstrap.
    pub module: Option<PathBuf>,
    /// Variable names in registration order.
    pub variables: Vec<String>,
}

/// Stack of frames holding every named value and every loaded module.
///
/// Lookups search frames newest to oldest and, within a frame, variables
/// newest to oldest, so the latest binding of a name shadows earlier ones.
/// Nothing is removed until teardown, which destroys everything in exactly
/// the reverse order of creation.
pub struct VariableRegistry {
    bootstrap: Frame,
    /// `frames[i]` has id `i + 1`.
    frames: Vec<Frame>,
    unload_modules: bool,
}

impl Default for VariableRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableRegistry {
    /// Create a registry holding only the bootstrap frame.
    pub fn new() -> Self {
        Self {
            bootstrap: Frame::new(FrameId::BOOTSTRAP, None),
            frames: Vec::new(),
            unload_modules: true,
        }
    }

    /// Whether teardown unloads modules or keeps them mapped.
    pub fn set_unload_modules(&mut self, unload: bool) {
        self.unload_modules = unload;
    }

    /// Number of frames, bootstrap included.
    pub fn frame_count(&self) -> usize {
        self.frames.len() + 1
    }

    /// Id of the frame new registrations go to.
    pub fn current_frame(&self) -> FrameId {
        self.top().id
    }

    /// Most recent binding of `name`.
    pub fn lookup(&self, name: &str) -> Option<Handle> {
        self.frames
            .iter()
            .rev()
            .chain(std::iter::once(&self.bootstrap))
            .find_map(|frame| frame.find(name))
    }

    /// Look up a value and reinterpret it as `T`.
    ///
    /// # Safety
    /// The value bound to `name` must point to a live `T` that nothing else
    /// mutates while the reference is held.
    pub unsafe fn get<T>(&self, name: &str) -> Option<&T> {
        self.lookup(name)
            .filter(|h| !h.is_null())
            .map(|h| unsafe { &*(h.as_ptr() as *const T) })
    }

    /// Bind `value` to `name` in the current top frame.
    ///
    /// An existing binding of the same name is shadowed, not replaced.
    pub fn register(
        &mut self,
        value: Handle,
        name: impl Into<String>,
        destructor: Option<Destructor>,
    ) -> Handle {
        let name = name.into();
        let frame = self.top_mut();
        tracing::trace!("Registering `{}` = {:?} in frame {}", name, value, frame.id);
        frame.variables.push(Variable {
            name,
            value,
            destructor,
        });
        value
    }

    /// Move `value` to the heap and bind it; teardown drops it.
    pub fn register_boxed<T: 'static>(&mut self, name: impl Into<String>, value: T) -> Handle {
        let ptr = Box::into_raw(Box::new(value));
        self.register(
            Handle::from_raw(ptr.cast()),
            name,
            Some(Box::new(|handle: Handle| {
                // SAFETY: created by `Box::into_raw` above, destroyed only here.
                drop(unsafe { Box::from_raw(handle.as_ptr().cast::<T>()) });
            })),
        )
    }

    /// Push a new top frame, optionally owning a module.
    pub fn push_frame(&mut self, module: Option<Module>) -> FrameId {
        let id = FrameId::new(self.frames.len() + 1);
        self.frames.push(Frame::new(id, module));
        id
    }

    /// Snapshot of all frames, oldest first.
    pub fn frames(&self) -> Vec<FrameInfo> {
        std::iter::once(&self.bootstrap)
            .chain(self.frames.iter())
            .map(|frame| FrameInfo {
                id: frame.id,
                module: frame.module.as_ref().map(|m| m.path().to_path_buf()),
                variables: frame.variables.iter().map(|v| v.name.clone()).collect(),
            })
            .collect()
    }

    /// Destroy every value and release every module, newest first.
    pub fn teardown(mut self) {
        self.teardown_frames();
    }

    fn teardown_frames(&mut self) {
        if !self.frames.is_empty() || !self.bootstrap.variables.is_empty() {
            tracing::debug!("Tearing down {} frames", self.frame_count());
        }

        while let Some(frame) = self.frames.pop() {
            frame.teardown(self.unload_modules);
        }
        let bootstrap = std::mem::replace(
            &mut self.bootstrap,
            Frame::new(FrameId::BOOTSTRAP, None),
        );
        bootstrap.teardown(self.unload_modules);
    }

    fn top(&self) -> &Frame {
        self.frames.last().unwrap_or(&self.bootstrap)
    }

    fn top_mut(&mut self) -> &mut Frame {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.bootstrap,
        }
    }
}

impl Drop for VariableRegistry {
    fn drop(&mut self) {
        self.teardown_frames();
    }
}

impl fmt::Debug for VariableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableRegistry")
            .field("frames", &self.frames())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Events = Rc<RefCell<Vec<String>>>;

    fn recorder(events: &Events, label: &str) -> Option<Destructor> {
        let events = events.clone();
        let label = label.to_string();
        Some(Box::new(move |_| events.borrow_mut().push(label)))
    }

    #[test]
    fn test_frame_ids() {
        let mut registry = VariableRegistry::new();
        assert_eq!(registry.frame_count(), 1);
        assert_eq!(registry.current_frame(), FrameId::BOOTSTRAP);

        assert_eq!(registry.push_frame(None), FrameId::new(1));
        assert_eq!(registry.push_frame(None), FrameId::new(2));
        assert_eq!(registry.frame_count(), 3);
        assert_eq!(registry.current_frame().as_usize(), 2);
    }

    #[test]
    fn test_lookup_missing() {
        let registry = VariableRegistry::new();
        assert_eq!(registry.lookup("nothing"), None);
    }

    #[test]
    fn test_shadowing_across_frames() {
        let mut registry = VariableRegistry::new();
        registry.register(Handle::from_addr(0x1), "a", None);
        registry.push_frame(None);
        registry.register(Handle::from_addr(0x2), "a", None);

        assert_eq!(registry.lookup("a"), Some(Handle::from_addr(0x2)));

        let frames = registry.frames();
        assert_eq!(frames[0].variables, vec!["a"]);
        assert_eq!(frames[1].variables, vec!["a"]);
    }

    #[test]
    fn test_shadowing_within_frame() {
        let mut registry = VariableRegistry::new();
        registry.push_frame(None);
        registry.register(Handle::from_addr(0x1), "a", None);
        registry.register(Handle::from_addr(0x2), "a", None);

        assert_eq!(registry.lookup("a"), Some(Handle::from_addr(0x2)));
        assert_eq!(registry.frames()[1].variables, vec!["a", "a"]);
    }

    #[test]
    fn test_older_frames_stay_visible() {
        let mut registry = VariableRegistry::new();
        registry.register(Handle::from_addr(0x10), "host", None);
        registry.push_frame(None);
        registry.register(Handle::from_addr(0x20), "module", None);
        registry.push_frame(None);

        assert_eq!(registry.lookup("host"), Some(Handle::from_addr(0x10)));
        assert_eq!(registry.lookup("module"), Some(Handle::from_addr(0x20)));
    }

    #[test]
    fn test_null_handle() {
        let mut registry = VariableRegistry::new();
        let handle = registry.register(Handle::NULL, "empty", None);

        assert!(handle.is_null());
        assert_eq!(registry.lookup("empty"), Some(Handle::NULL));
        assert!(unsafe { registry.get::<u32>("empty") }.is_none());
    }

    #[test]
    fn test_register_boxed() {
        let mut registry = VariableRegistry::new();
        registry.register_boxed("greeting", String::from("hello"));

        let value = unsafe { registry.get::<String>("greeting") };
        assert_eq!(value.map(String::as_str), Some("hello"));
    }

    #[test]
    fn test_teardown_reverse_order() {
        let events = Events::default();
        let mut registry = VariableRegistry::new();

        registry.register(Handle::NULL, "b0", recorder(&events, "b0"));
        registry.push_frame(None);
        registry.register(Handle::NULL, "f1a", recorder(&events, "f1a"));
        registry.register(Handle::NULL, "f1b", recorder(&events, "f1b"));
        registry.push_frame(None);
        registry.register(Handle::NULL, "f2", recorder(&events, "f2"));

        registry.teardown();
        assert_eq!(*events.borrow(), vec!["f2", "f1b", "f1a", "b0"]);
    }

    #[test]
    fn test_drop_tears_down_once() {
        let events = Events::default();
        {
            let mut registry = VariableRegistry::new();
            registry.register(Handle::NULL, "x", recorder(&events, "x"));
        }
        assert_eq!(*events.borrow(), vec!["x"]);
    }

    #[test]
    fn test_panicking_destructor_does_not_stop_teardown() {
        let events = Events::default();
        let mut registry = VariableRegistry::new();

        registry.register(Handle::NULL, "first", recorder(&events, "first"));
        registry.register(
            Handle::NULL,
            "bad",
            Some(Box::new(|_| panic!("destructor failure"))),
        );
        registry.register(Handle::NULL, "last", recorder(&events, "last"));

        registry.teardown();
        assert_eq!(*events.borrow(), vec!["last", "first"]);
    }

    #[test]
    fn test_destructor_receives_handle() {
        let seen = Rc::new(RefCell::new(None));
        let mut registry = VariableRegistry::new();
        let sink = seen.clone();

        registry.register(
            Handle::from_addr(0xbeef),
            "value",
            Some(Box::new(move |h| *sink.borrow_mut() = Some(h))),
        );
        registry.teardown();

        assert_eq!(*seen.borrow(), Some(Handle::from_addr(0xbeef)));
    }

    #[test]
    fn test_handle_debug() {
        assert_eq!(format!("{:?}", Handle::from_addr(0x2a)), "Handle(0x2a)");
    }
}
