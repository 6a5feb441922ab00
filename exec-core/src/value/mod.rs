//! Values
//!
//! This module defines the externally-typed values that flow in and out of
//! the execution engine, and the registry that maps them onto the internal
//! [`Vector`](crate::vdf::Vector) representation.
//!
//! # Overview
//!
//! - [`Value`] is a type-erased scalar or array value, analogous to the
//!   scene layer's own value container. It is what scene attributes return
//!   and what [`CacheView`](crate::exec::CacheView) hands back to callers.
//! - [`ValueType`] enumerates the supported computation types.
//! - [`TypeRegistry`] is constructed once per system and knows, for every
//!   registered type, its fallback value and how vectors of it are stored.
//! - [`Time`] and [`InvalidationTimeInterval`] describe evaluation time.

mod gf;
mod registry;
mod time;
mod types;

pub use gf::{Matrix4d, Matrix4f, Quatd, Quatf, Vec2d, Vec2f, Vec3d, Vec3f, Vec4d, Vec4f};
pub use registry::{TypeRegistry, ValueExtractor};
pub use time::{InvalidationTimeInterval, Time};
pub use types::{FromValue, Value, ValueType};
