//! Execution
//!
//! The scene-facing layer. It compiles value keys (a computation on a scene
//! object) into a [`vdf`](crate::vdf) network, keeps that network and its
//! cached values consistent with scene edits and time changes, and hands
//! results back to hosts through requests and cache views.
//!
//! # Overview
//!
//! - [`DefinitionRegistry`] holds plugin computations. Every object also
//!   provides the builtin computations in [`builtins`].
//! - [`System`] owns the compiled [`Program`] and the executor. Hosts build
//!   [`Request`]s, compute them into [`CacheView`]s, and forward scene edits
//!   with [`System::did_change_objects`] and time changes with
//!   [`System::change_time`].
//! - [`Diagnostics`] renders the network and reports counters.
//!
//! # Design Decisions
//!
//! 1. Compilation is demand driven. Only the keys a request names, and what
//!    they transitively read, are ever compiled.
//!
//! 2. Every compiled node carries a journal of the scene paths it read.
//!    Scene edits are matched against journals, never against the scene.
//!
//! 3. Attributes that do not vary over time compile to constants. Editing
//!    one rebuilds the constant instead of invalidating a time dependency.

pub mod builtins;
mod cache_view;
mod compiler;
mod definition;
mod diagnostics;
pub mod geom;
mod input_key;
mod invalidation;
mod program;
mod registry;
mod request;
mod system;
mod value_key;

pub use builtins::BuiltinComputation;
pub use cache_view::CacheView;
pub use compiler::CompileStats;
pub use definition::{ComputationDefinition, PluginComputation};
pub use diagnostics::{Diagnostics, NetworkStats};
pub use input_key::{DynamicTraversal, InputKey, LocalTraversal};
pub use program::Program;
pub use registry::DefinitionRegistry;
pub use request::{Request, TimeChangeCallback, ValueInvalidationCallback};
pub use system::System;
pub use value_key::ValueKey;
