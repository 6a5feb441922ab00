//! Transform computations for `Xform` prims.
//!
//! Registers `computeLocalToWorldTransform`, which composes a prim's
//! `xformOp:transform` attribute with the world transform of its nearest
//! `Xform` ancestor. Matrices use the row vector convention, so the local
//! transform is applied first: `world = local * parent`.

use std::sync::Arc;

use super::input_key::InputKey;
use super::registry::DefinitionRegistry;
use crate::value::{Matrix4d, ValueType};
use crate::vdf::Context;

pub const XFORM_SCHEMA: &str = "Xform";
pub const COMPUTE_LOCAL_TO_WORLD_TRANSFORM: &str = "computeLocalToWorldTransform";
pub const TRANSFORM_ATTRIBUTE: &str = "xformOp:transform";

/// Add the transform computations to `registry`. Returns false if one of
/// them was already registered.
pub fn register(registry: &mut DefinitionRegistry) -> bool {
    registry.register_prim_computation(
        COMPUTE_LOCAL_TO_WORLD_TRANSFORM,
        XFORM_SCHEMA,
        ValueType::Matrix4d,
        vec![
            InputKey::namespace_ancestor(
                "parent",
                COMPUTE_LOCAL_TO_WORLD_TRANSFORM,
                ValueType::Matrix4d,
            ),
            InputKey::attribute_value(TRANSFORM_ATTRIBUTE, ValueType::Matrix4d),
        ],
        Arc::new(|ctx: &mut Context<'_>| {
            let parent = ctx.input_or("parent", Matrix4d::identity());
            let local = ctx.input_or(TRANSFORM_ATTRIBUTE, Matrix4d::identity());
            ctx.set_output(local * parent);
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_once() {
        let mut registry = DefinitionRegistry::new();
        assert!(register(&mut registry));
        assert_eq!(registry.len(), 1);
        assert!(!register(&mut registry));
    }
}
