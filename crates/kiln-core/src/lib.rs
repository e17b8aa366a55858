#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Core of the kiln asset bundler.
//!
//! ## Architecture
//!
//! 1. **Resolution** - map specifiers to canonical [`ResourceId`]s
//! 2. **Transform** - run the first matching rule's capability over each resource
//! 3. **Graph** - breadth-first module graph from the configured entries
//! 4. **Emit** - dependency-ordered bundles, static asset copies, all-or-nothing writes

pub mod assets;
pub mod build;
pub mod cancel;
pub mod codes;
pub mod config;
pub mod emit;
pub mod env;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod resolver;
mod resource;

pub use build::{Build, BuildReport};
pub use cancel::CancelToken;
pub use config::{BuildConfig, LoadedConfig};
pub use error::Error;
pub use graph::{DependencyEdge, Module, ModuleGraph};
pub use resource::{ModuleKind, ResourceId};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
