//! Build pipeline for runtime-compiled modules.
//!
//! Turns a source blob into a loadable `cdylib` by driving cargo as an
//! external process.
//!
//! # Architecture
//!
//! ```text
//! BuildPipeline::next_request(source)
//!     │
//!     └── BuildRequest { sequence, source, config snapshot }
//!             │
//!             ├── module_<seq>.rs            (source, verbatim)
//!             ├── module_<seq>/Cargo.toml    (manifest)
//!             ├── [generate] cargo fetch     ─┐
//!             ├── [build]    cargo build     ─┴─► module_<seq>.log
//!             │
//!             └── Artifact { target/<profile>/libkiln_module_<seq>.so }
//! ```
//!
//! # Module Structure
//!
//! - `config` - Build configuration, profiles and dependencies
//! - `manifest` - Cargo manifest generation
//! - `pipeline` - Build orchestration
//! - `toolchain` - External process invocation

mod config;
mod manifest;
mod pipeline;
mod toolchain;

pub use config::{BuildConfig, Dependency, Profile};
pub use pipeline::{Artifact, BuildPipeline, BuildRequest};
pub use toolchain::BuildStep;
