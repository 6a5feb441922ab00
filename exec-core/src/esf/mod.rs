//! Scene Interfaces
//!
//! The boundary between the execution engine and the scene it computes
//! over. Execution never touches scene storage directly. It reads through
//! the [`StageInterface`] family of traits, and every read made while
//! compiling is recorded in a [`Journal`] so later [`SceneEdit`]s can be
//! mapped back onto the nodes they affect.
//!
//! [`MemoryStage`] is a complete in-memory implementation.

mod interfaces;
mod journal;
mod memory;
mod path;

pub use interfaces::{
    Attribute, AttributeInterface, ObjectInterface, Prim, PrimInterface, PropertyInterface,
    Relationship, RelationshipInterface, SceneObject, StageInterface,
};
pub use journal::{EditReasons, Journal, SceneEdit};
pub use memory::MemoryStage;
pub use path::ScenePath;
