//! Workspace placeholder crate.
//!
//! This crate exposes feature flags that map to the individual workspace
//! crates (`core-pipeline`, `core-runtime`). Host applications can depend on
//! `media-pipeline-workspace` and enable the documented features without
//! wiring each crate individually.

#[cfg(feature = "pipeline")]
pub use core_pipeline as pipeline;

#[cfg(feature = "runtime")]
pub use core_runtime as runtime;
