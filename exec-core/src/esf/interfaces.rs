//! Scene Object Interfaces
//!
//! The execution engine reads the scene only through these traits. Each
//! read accessor takes an optional [`Journal`]; when one is given, the
//! accessor records the path it read and the edit reasons that would change
//! its answer before returning.
//!
//! Implementors supply the `*_impl` methods. The journaling accessors are
//! provided methods and should not be overridden: a read that skips the
//! journal is a read invalidation will never see.

use std::sync::Arc;

use super::journal::{record, EditReasons, Journal};
use super::path::ScenePath;
use crate::value::{Time, Value, ValueType};

pub type Prim = Arc<dyn PrimInterface>;
pub type Attribute = Arc<dyn AttributeInterface>;
pub type Relationship = Arc<dyn RelationshipInterface>;

/// Behavior common to prims and properties.
pub trait ObjectInterface: Send + Sync {
    /// The identity of the object. Reading it is never journaled.
    fn path(&self) -> ScenePath;

    fn is_valid_impl(&self) -> bool;
    fn metadata_impl(&self, key: &str) -> Value;
    fn is_valid_metadata_key_impl(&self, key: &str) -> bool;
    fn metadata_value_type_impl(&self, key: &str) -> Option<ValueType>;
    fn prim_impl(&self) -> Option<Prim>;

    fn is_valid(&self, journal: Option<&mut Journal>) -> bool {
        record(journal, &self.path(), EditReasons::RESYNCED_OBJECT);
        self.is_valid_impl()
    }

    /// The value of `key`, or the field's fallback if none is authored.
    fn metadata(&self, key: &str, journal: Option<&mut Journal>) -> Value {
        record(journal, &self.path(), EditReasons::CHANGED_METADATA);
        self.metadata_impl(key)
    }

    fn is_valid_metadata_key(&self, key: &str, journal: Option<&mut Journal>) -> bool {
        record(journal, &self.path(), EditReasons::RESYNCED_OBJECT);
        self.is_valid_metadata_key_impl(key)
    }

    fn metadata_value_type(&self, key: &str, journal: Option<&mut Journal>) -> Option<ValueType> {
        record(journal, &self.path(), EditReasons::RESYNCED_OBJECT);
        self.metadata_value_type_impl(key)
    }

    /// The prim itself, or the prim owning a property.
    fn prim(&self, journal: Option<&mut Journal>) -> Option<Prim> {
        record(journal, &self.path().prim_path(), EditReasons::RESYNCED_OBJECT);
        self.prim_impl()
    }
}

pub trait PrimInterface: ObjectInterface {
    fn type_name_impl(&self) -> String;
    fn parent_impl(&self) -> Option<Prim>;
    fn property_names_impl(&self) -> Vec<String>;
    fn attribute_impl(&self, name: &str) -> Option<Attribute>;
    fn relationship_impl(&self, name: &str) -> Option<Relationship>;

    /// The schema type, e.g. `Xform`. Empty for typeless prims.
    fn type_name(&self, journal: Option<&mut Journal>) -> String {
        record(journal, &self.path(), EditReasons::RESYNCED_OBJECT);
        self.type_name_impl()
    }

    /// The namespace parent. `None` only for the pseudo-root.
    fn parent(&self, journal: Option<&mut Journal>) -> Option<Prim> {
        record(journal, &self.path(), EditReasons::RESYNCED_OBJECT);
        self.parent_impl()
    }

    fn property_names(&self, journal: Option<&mut Journal>) -> Vec<String> {
        record(journal, &self.path(), EditReasons::CHANGED_PROPERTY_LIST);
        self.property_names_impl()
    }

    fn attribute(&self, name: &str, journal: Option<&mut Journal>) -> Option<Attribute> {
        if let Some(path) = self.path().append_property(name) {
            record(journal, &path, EditReasons::RESYNCED_OBJECT);
        }
        self.attribute_impl(name)
    }

    fn relationship(&self, name: &str, journal: Option<&mut Journal>) -> Option<Relationship> {
        if let Some(path) = self.path().append_property(name) {
            record(journal, &path, EditReasons::RESYNCED_OBJECT);
        }
        self.relationship_impl(name)
    }
}

pub trait PropertyInterface: ObjectInterface {
    fn base_name(&self, journal: Option<&mut Journal>) -> String {
        record(journal, &self.path(), EditReasons::RESYNCED_OBJECT);
        let path = self.path();
        let name = path.name();
        name.rsplit_once(':').map_or(name, |(_, base)| base).to_string()
    }

    fn namespace(&self, journal: Option<&mut Journal>) -> String {
        record(journal, &self.path(), EditReasons::RESYNCED_OBJECT);
        let path = self.path();
        path.name()
            .rsplit_once(':')
            .map_or(String::new(), |(namespace, _)| namespace.to_string())
    }
}

pub trait AttributeInterface: PropertyInterface {
    fn value_type_impl(&self) -> ValueType;
    fn get_impl(&self, time: Time) -> Value;
    fn is_time_varying_impl(&self) -> bool;
    fn connections_impl(&self) -> Vec<ScenePath>;

    /// Whether the value resolved at `to` differs from the value at `from`.
    fn value_changes_between(&self, from: Time, to: Time) -> bool;

    fn value_type(&self, journal: Option<&mut Journal>) -> ValueType {
        record(journal, &self.path(), EditReasons::RESYNCED_OBJECT);
        self.value_type_impl()
    }

    /// The resolved value at `time`.
    fn get(&self, time: Time, journal: Option<&mut Journal>) -> Value {
        record(journal, &self.path(), EditReasons::CHANGED_PROPERTY_VALUE);
        self.get_impl(time)
    }

    fn is_time_varying(&self, journal: Option<&mut Journal>) -> bool {
        record(journal, &self.path(), EditReasons::CHANGED_PROPERTY_VALUE);
        self.is_time_varying_impl()
    }

    /// Paths of the attributes this attribute is connected to.
    fn connections(&self, journal: Option<&mut Journal>) -> Vec<ScenePath> {
        record(journal, &self.path(), EditReasons::CHANGED_CONNECTION_PATHS);
        self.connections_impl()
    }
}

pub trait RelationshipInterface: PropertyInterface {
    fn targets_impl(&self) -> Vec<ScenePath>;

    fn targets(&self, journal: Option<&mut Journal>) -> Vec<ScenePath> {
        record(journal, &self.path(), EditReasons::CHANGED_TARGET_PATHS);
        self.targets_impl()
    }
}

/// Any object a computation can be provided by.
#[derive(Clone)]
pub enum SceneObject {
    Prim(Prim),
    Attribute(Attribute),
    Relationship(Relationship),
}

macro_rules! dispatch {
    ($self:ident, $object:ident => $body:expr) => {
        match $self {
            SceneObject::Prim($object) => $body,
            SceneObject::Attribute($object) => $body,
            SceneObject::Relationship($object) => $body,
        }
    };
}

impl ObjectInterface for SceneObject {
    fn path(&self) -> ScenePath {
        dispatch!(self, object => object.path())
    }

    fn is_valid_impl(&self) -> bool {
        dispatch!(self, object => object.is_valid_impl())
    }

    fn metadata_impl(&self, key: &str) -> Value {
        dispatch!(self, object => object.metadata_impl(key))
    }

    fn is_valid_metadata_key_impl(&self, key: &str) -> bool {
        dispatch!(self, object => object.is_valid_metadata_key_impl(key))
    }

    fn metadata_value_type_impl(&self, key: &str) -> Option<ValueType> {
        dispatch!(self, object => object.metadata_value_type_impl(key))
    }

    fn prim_impl(&self) -> Option<Prim> {
        dispatch!(self, object => object.prim_impl())
    }
}

impl SceneObject {
    pub fn as_prim(&self) -> Option<&Prim> {
        match self {
            SceneObject::Prim(prim) => Some(prim),
            _ => None,
        }
    }

    pub fn as_attribute(&self) -> Option<&Attribute> {
        match self {
            SceneObject::Attribute(attribute) => Some(attribute),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            SceneObject::Relationship(relationship) => Some(relationship),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SceneObject::Prim(_) => "prim",
            SceneObject::Attribute(_) => "attribute",
            SceneObject::Relationship(_) => "relationship",
        }
    }
}

impl std::fmt::Debug for SceneObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SceneObject::{}({})", self.kind_name(), self.path())
    }
}

/// Entry point into a scene.
pub trait StageInterface: Send + Sync {
    fn prim_at_path_impl(&self, path: &ScenePath) -> Option<Prim>;
    fn attribute_at_path_impl(&self, path: &ScenePath) -> Option<Attribute>;
    fn relationship_at_path_impl(&self, path: &ScenePath) -> Option<Relationship>;

    /// The pseudo-root prim at `/`.
    fn pseudo_root(&self) -> Prim;

    fn prim_at_path(&self, path: &ScenePath, journal: Option<&mut Journal>) -> Option<Prim> {
        record(journal, path, EditReasons::RESYNCED_OBJECT);
        self.prim_at_path_impl(path)
    }

    fn attribute_at_path(&self, path: &ScenePath, journal: Option<&mut Journal>) -> Option<Attribute> {
        record(journal, path, EditReasons::RESYNCED_OBJECT);
        self.attribute_at_path_impl(path)
    }

    fn relationship_at_path(&self, path: &ScenePath, journal: Option<&mut Journal>) -> Option<Relationship> {
        record(journal, path, EditReasons::RESYNCED_OBJECT);
        self.relationship_at_path_impl(path)
    }

    fn object_at_path(&self, path: &ScenePath, journal: Option<&mut Journal>) -> Option<SceneObject> {
        record(journal, path, EditReasons::RESYNCED_OBJECT);
        if !path.is_property_path() {
            return self.prim_at_path_impl(path).map(SceneObject::Prim);
        }
        self.attribute_at_path_impl(path)
            .map(SceneObject::Attribute)
            .or_else(|| self.relationship_at_path_impl(path).map(SceneObject::Relationship))
    }
}
