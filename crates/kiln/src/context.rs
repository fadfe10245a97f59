//! Safe-ish wrapper over [`RawContext`] for module code.

use std::ffi::{CString, c_void};
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::NonNull;

use crate::ffi::{ABI_VERSION, Destructor, RawContext};

/// Handle to the host's variable registry, valid for one entry call.
///
/// Values registered through a context outlive the call: they stay alive until
/// the host tears the runtime down, and are visible to every module executed
/// afterwards. Registering a name that already exists shadows the old binding
/// instead of replacing it.
pub struct Context<'a> {
    raw: NonNull<RawContext>,
    _marker: PhantomData<&'a RawContext>,
}

impl<'a> Context<'a> {
    /// Wrap the pointer received by the entry point.
    ///
    /// Returns `None` for a null pointer or a host built against a different
    /// ABI version.
    ///
    /// # Safety
    /// `raw` must point to a `RawContext` that stays valid for `'a`.
    pub unsafe fn from_raw(raw: *mut RawContext) -> Option<Self> {
        let raw = NonNull::new(raw)?;
        if unsafe { raw.as_ref() }.abi_version != ABI_VERSION {
            return None;
        }
        Some(Self {
            raw,
            _marker: PhantomData,
        })
    }

    fn raw(&self) -> &RawContext {
        // SAFETY: validity for 'a is guaranteed by `from_raw`'s contract.
        unsafe { self.raw.as_ref() }
    }

    /// Look up the most recent value registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<NonNull<c_void>> {
        let name = CString::new(name).ok()?;
        let raw = self.raw();
        let ptr = unsafe { (raw.lookup)(raw.data, name.as_ptr()) };
        NonNull::new(ptr)
    }

    /// Look up a value and reinterpret it as `T`.
    ///
    /// # Safety
    /// The value registered under `name` must actually be a `T`, and nothing
    /// else may hold a mutable reference to it.
    pub unsafe fn get<T>(&self, name: &str) -> Option<&'a T> {
        self.lookup(name).map(|ptr| unsafe { ptr.cast::<T>().as_ref() })
    }

    /// Like [`Context::get`], but mutable.
    ///
    /// # Safety
    /// Same as [`Context::get`], and the returned reference must be unique.
    pub unsafe fn get_mut<T>(&self, name: &str) -> Option<&'a mut T> {
        self.lookup(name).map(|ptr| unsafe { ptr.cast::<T>().as_mut() })
    }

    /// Register a raw value with an optional destructor.
    ///
    /// Never register pointers to locals of the entry function: the value
    /// must stay valid until the host is torn down.
    ///
    /// # Panics
    /// Panics if `name` contains a NUL byte.
    pub fn set_raw(
        &self,
        value: *mut c_void,
        name: &str,
        destructor: Option<Destructor>,
    ) -> *mut c_void {
        let name = CString::new(name).expect("variable names must not contain NUL bytes");
        let raw = self.raw();
        unsafe { (raw.register)(raw.data, value, name.as_ptr(), destructor) }
    }

    /// Move `value` to the heap and register it.
    ///
    /// The destructor that drops it is compiled into the calling module, so
    /// the host runs it before that module is unloaded.
    pub fn set<T: 'static>(&self, name: &str, value: T) -> &'a mut T {
        let ptr = Box::into_raw(Box::new(value));
        self.set_raw(ptr.cast(), name, Some(drop_boxed::<T>));
        // SAFETY: freshly allocated above, owned by the host registry now.
        unsafe { &mut *ptr }
    }

    /// Send a diagnostic message to the host.
    pub fn log(&self, message: &str) {
        let raw = self.raw();
        unsafe { (raw.log)(raw.data, message.as_ptr(), message.len()) }
    }
}

unsafe extern "C" fn drop_boxed<T>(value: *mut c_void) {
    if value.is_null() {
        return;
    }
    let boxed = unsafe { Box::from_raw(value.cast::<T>()) };
    // Unwinding out of an extern "C" fn aborts the host. The panic hook has
    // already reported the message; teardown carries on.
    let _ = catch_unwind(AssertUnwindSafe(move || drop(boxed)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Tracked(Rc<Cell<bool>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    struct Explodes;

    impl Drop for Explodes {
        fn drop(&mut self) {
            panic!("drop failed");
        }
    }

    #[test]
    fn test_drop_boxed_drops_value() {
        let dropped = Rc::new(Cell::new(false));
        let ptr = Box::into_raw(Box::new(Tracked(dropped.clone())));

        unsafe { drop_boxed::<Tracked>(ptr.cast()) };
        assert!(dropped.get());

        unsafe { drop_boxed::<Tracked>(std::ptr::null_mut()) };
    }

    #[test]
    fn test_drop_boxed_contains_panics() {
        let ptr = Box::into_raw(Box::new(Explodes));
        // Returning at all means the panic did not cross the C boundary.
        unsafe { drop_boxed::<Explodes>(ptr.cast()) };
    }
}
