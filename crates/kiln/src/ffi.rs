//! C ABI shared by the host runtime and runtime-compiled modules.
//!
//! The host builds a [`RawContext`] for every entry call and passes a pointer
//! to it into the module's exported [`ENTRY_SYMBOL`]. Everything crossing the
//! boundary is type-erased: values are raw pointers identified by name.
//!
//! ```text
//! host (kiln-core)                         module (cdylib)
//!     │                                          │
//!     ├── RawContext { data, lookup, ... } ────► kiln_entry(*mut RawContext)
//!     │                                          │
//!     ◄── lookup / register / log callbacks ─────┘
//! ```

use std::ffi::{c_char, c_void};

/// Name of the function every module must export.
pub const ENTRY_SYMBOL: &str = "kiln_entry";

/// Version of the [`RawContext`] layout.
///
/// Bumped whenever a field is added, removed or reordered. Modules built
/// against a different layout refuse to run.
pub const ABI_VERSION: u32 = 1;

/// Destructor for a registered value. Called exactly once, at host teardown.
pub type Destructor = unsafe extern "C" fn(value: *mut c_void);

/// Signature of the exported entry point.
pub type EntryFn = unsafe extern "C" fn(ctx: *mut RawContext);

/// Looks up the most recently registered value for a NUL-terminated name.
/// Returns null when nothing is registered under that name.
pub type LookupFn = unsafe extern "C" fn(data: *mut c_void, name: *const c_char) -> *mut c_void;

/// Registers a value under a NUL-terminated name and returns the value.
pub type RegisterFn = unsafe extern "C" fn(
    data: *mut c_void,
    value: *mut c_void,
    name: *const c_char,
    destructor: Option<Destructor>,
) -> *mut c_void;

/// Emits a UTF-8 diagnostic message of `len` bytes.
pub type LogFn = unsafe extern "C" fn(data: *mut c_void, message: *const u8, len: usize);

/// Context handed to the entry point.
///
/// `data` is owned by the host and only meaningful to the host's callbacks.
/// The pointer is valid for the duration of a single entry call.
#[repr(C)]
pub struct RawContext {
    pub abi_version: u32,
    pub data: *mut c_void,
    pub lookup: LookupFn,
    pub register: RegisterFn,
    pub log: LogFn,
}
