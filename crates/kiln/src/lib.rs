//! Kiln: compile, load and run Rust code inside a live host process.
//!
//! This crate is what runtime-compiled modules link against. A module is a
//! single source file exporting one entry point; the host builds it into a
//! `cdylib`, loads it, and calls the entry point with a [`Context`] through
//! which the module shares values with the host and with later modules.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use kiln::prelude::*;
//!
//! #[kiln::entry]
//! fn main(ctx: &Context) {
//!     let counter = unsafe { ctx.get_mut::<u64>("counter") };
//!     match counter {
//!         Some(n) => *n += 1,
//!         None => {
//!             ctx.set("counter", 0u64);
//!         }
//!     }
//!     kiln::log!(ctx, "counter bumped");
//! }
//! ```
//!
//! For the host side, see the `kiln-core` crate.

pub mod ffi;

mod context;

pub use context::Context;
pub use kiln_macros::entry;

pub mod prelude {
    //! Common imports for kiln modules.
    //!
    //! ```rust,ignore
    //! use kiln::prelude::*;
    //! ```

    pub use crate::Context;
    pub use crate::entry;
    pub use crate::log;
}

/// Format a message and send it to the host's diagnostic sink.
#[macro_export]
macro_rules! log {
    ($ctx:expr, $($arg:tt)*) => {
        $ctx.log(&::std::format!($($arg)*))
    };
}

#[doc(hidden)]
pub mod __private {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use crate::Context;
    use crate::ffi::RawContext;

    /// Body of the generated `kiln_entry`.
    ///
    /// Panics must not unwind into the host, so they are caught here and
    /// reported through the context instead.
    ///
    /// # Safety
    /// `raw` must be the pointer the host passed to the entry point.
    pub unsafe fn run_entry(raw: *mut RawContext, body: fn(&Context<'_>)) {
        let Some(ctx) = (unsafe { Context::from_raw(raw) }) else {
            return;
        };

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| body(&ctx))) {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic payload".to_string());
            ctx.log(&format!("module panicked: {}", message));
        }
    }
}
