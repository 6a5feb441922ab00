//! Input keys
//!
//! An [`InputKey`] declares one input of a computation: which computation
//! feeds it and how to find the objects that provide that computation,
//! starting from the object the consuming computation is compiled on.
//!
//! Provider resolution happens in two steps. The *local* traversal picks
//! an object near the origin: the origin itself, one of its prim's
//! properties, or the stage. The *dynamic* traversal then follows scene
//! structure from there: relationship targets, attribute connections, or
//! namespace ancestors.

use std::sync::Arc;

use serde::Serialize;

use super::builtins;
use crate::value::ValueType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LocalTraversal {
    /// The object the consuming computation is compiled on.
    Origin,
    /// A property of the origin's prim.
    Property(Arc<str>),
    /// The stage pseudo-root.
    Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DynamicTraversal {
    /// Use the locally resolved object.
    Local,
    /// Every target of the locally resolved relationship.
    RelationshipTargets,
    /// Every source the locally resolved attribute is connected to.
    ConnectionTargets,
    /// The nearest namespace ancestor providing the computation.
    NamespaceAncestor,
}

/// Declaration of one computation input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputKey {
    pub input_name: Arc<str>,
    pub computation: Arc<str>,
    pub disambiguating_id: Option<Arc<str>>,
    pub result_type: ValueType,
    pub local: LocalTraversal,
    pub dynamic: DynamicTraversal,
    /// Look for a dispatched computation when the provider has no local one.
    pub falls_back_to_dispatched: bool,
    /// Absence of a value is not an error.
    pub optional: bool,
}

impl InputKey {
    pub fn new(input_name: &str, computation: &str, result_type: ValueType) -> Self {
        Self {
            input_name: Arc::from(input_name),
            computation: Arc::from(computation),
            disambiguating_id: None,
            result_type,
            local: LocalTraversal::Origin,
            dynamic: DynamicTraversal::Local,
            falls_back_to_dispatched: false,
            optional: true,
        }
    }

    /// The value of attribute `name` on the origin's prim, delivered on an
    /// input of the same name.
    pub fn attribute_value(name: &str, result_type: ValueType) -> Self {
        Self {
            local: LocalTraversal::Property(Arc::from(name)),
            ..Self::new(name, builtins::COMPUTE_VALUE, result_type)
        }
    }

    /// Another computation on the origin.
    pub fn computation(input_name: &str, computation: &str, result_type: ValueType) -> Self {
        Self::new(input_name, computation, result_type)
    }

    /// Metadata field `key` of the origin.
    pub fn metadata(input_name: &str, key: &str, result_type: ValueType) -> Self {
        Self::new(input_name, builtins::COMPUTE_METADATA, result_type).with_disambiguating_id(key)
    }

    /// The evaluation time.
    pub fn time(input_name: &str) -> Self {
        Self {
            local: LocalTraversal::Stage,
            ..Self::new(input_name, builtins::COMPUTE_TIME, ValueType::Time)
        }
    }

    /// `computation` on the nearest ancestor prim that provides it.
    pub fn namespace_ancestor(input_name: &str, computation: &str, result_type: ValueType) -> Self {
        Self {
            dynamic: DynamicTraversal::NamespaceAncestor,
            ..Self::new(input_name, computation, result_type)
        }
    }

    /// `computation` on every target of relationship `relationship`.
    pub fn relationship_targets(
        input_name: &str,
        relationship: &str,
        computation: &str,
        result_type: ValueType,
    ) -> Self {
        Self {
            local: LocalTraversal::Property(Arc::from(relationship)),
            dynamic: DynamicTraversal::RelationshipTargets,
            ..Self::new(input_name, computation, result_type)
        }
    }

    /// `computation` on every attribute `attribute` is connected to.
    pub fn connection_targets(
        input_name: &str,
        attribute: &str,
        computation: &str,
        result_type: ValueType,
    ) -> Self {
        Self {
            local: LocalTraversal::Property(Arc::from(attribute)),
            dynamic: DynamicTraversal::ConnectionTargets,
            ..Self::new(input_name, computation, result_type)
        }
    }

    pub fn with_disambiguating_id(mut self, id: &str) -> Self {
        self.disambiguating_id = Some(Arc::from(id));
        self
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn with_dispatch_fallback(mut self) -> Self {
        self.falls_back_to_dispatched = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factories_set_traversals() {
        let key = InputKey::attribute_value("radius", ValueType::Double).required();
        assert_eq!(&*key.computation, builtins::COMPUTE_VALUE);
        assert_eq!(key.local, LocalTraversal::Property(Arc::from("radius")));
        assert!(!key.optional);

        let key = InputKey::relationship_targets("mats", "material", "color", ValueType::Vec3f);
        assert_eq!(key.dynamic, DynamicTraversal::RelationshipTargets);
        assert_eq!(key.local, LocalTraversal::Property(Arc::from("material")));

        let key = InputKey::time("t");
        assert_eq!(key.local, LocalTraversal::Stage);
        assert_eq!(key.result_type, ValueType::Time);
    }
}
