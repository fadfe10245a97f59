//! Named values shared between the host and loaded modules.
//!
//! # Architecture
//!
//! ```text
//! VariableRegistry
//!     │
//!     ├── frame 0 (bootstrap)   host values, no module
//!     ├── frame 1               module_0 + what it registered
//!     ├── frame 2               module_1 + what it registered
//!     │      ▲
//!     │      └── ExecutionContext ◄── RawContext ◄── kiln_entry
//!     ...
//! ```
//!
//! Lookups walk the stack from the top; teardown walks it from the top too,
//! destroying each frame's values before releasing its module.

mod execution;
mod registry;

pub use execution::ExecutionContext;
pub use registry::{Destructor, FrameId, FrameInfo, Handle, VariableRegistry};
