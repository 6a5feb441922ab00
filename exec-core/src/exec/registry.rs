//! Definition registry
//!
//! Maps computation names to definitions. Lookup on a provider checks, in
//! order: the builtins, computations registered for the provider prim's
//! schema, and computations registered for every prim (the empty schema).
//! Attribute providers are matched the same way, by the schema of the
//! owning prim and the attribute's name.
//! Dispatched computations live in a separate table. They are found only
//! through an input key that falls back to dispatch, and apply to whichever
//! prim the consuming computation is compiled on.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::builtins::{self, BuiltinComputation};
use super::definition::{ComputationDefinition, PluginComputation};
use super::input_key::InputKey;
use crate::error::{report, ExecError};
use crate::esf::{Journal, ObjectInterface, PrimInterface, SceneObject};
use crate::value::ValueType;
use crate::vdf::ComputeFn;

type Table = IndexMap<(Arc<str>, Arc<str>), ComputationDefinition>;

/// Keyed by (schema, attribute name, computation name).
type AttributeTable = IndexMap<(Arc<str>, Arc<str>, Arc<str>), ComputationDefinition>;

#[derive(Debug, Default)]
pub struct DefinitionRegistry {
    prim: Table,
    dispatched: Table,
    attribute: AttributeTable,
}

impl DefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` on prims of type `schema`, or on every prim when
    /// `schema` is empty. Returns false, reporting why, if the name is
    /// empty, shadows a builtin or is already registered for the schema.
    pub fn register_prim_computation(
        &mut self,
        name: &str,
        schema: &str,
        result_type: ValueType,
        inputs: Vec<InputKey>,
        callback: ComputeFn,
    ) -> bool {
        let plugin = PluginComputation::new(name, result_type, inputs, callback);
        Self::insert(&mut self.prim, schema, plugin)
    }

    /// Register `name` as a computation other schemas can dispatch to.
    pub fn register_dispatched_prim_computation(
        &mut self,
        name: &str,
        schema: &str,
        result_type: ValueType,
        inputs: Vec<InputKey>,
        callback: ComputeFn,
    ) -> bool {
        let plugin = PluginComputation::new(name, result_type, inputs, callback);
        Self::insert(&mut self.dispatched, schema, plugin)
    }

    /// Register `name` on attributes called `attribute_name` whose prim
    /// is of type `schema`, or on such attributes of every prim when
    /// `schema` is empty.
    pub fn register_attribute_computation(
        &mut self,
        name: &str,
        attribute_name: &str,
        schema: &str,
        result_type: ValueType,
        inputs: Vec<InputKey>,
        callback: ComputeFn,
    ) -> bool {
        if attribute_name.is_empty() {
            report(ExecError::InvalidValueKey(format!(
                "computation '{name}' registered on an unnamed attribute of schema '{schema}'"
            )));
            return false;
        }
        let plugin = PluginComputation::new(name, result_type, inputs, callback);
        let key = (Arc::from(schema), Arc::from(attribute_name), Arc::from(name));
        if !Self::admits(schema, name, self.attribute.contains_key(&key)) {
            return false;
        }
        debug!(schema, attribute = attribute_name, name, "registered attribute computation");
        self.attribute.insert(key, ComputationDefinition::Plugin(Arc::new(plugin)));
        true
    }

    fn insert(table: &mut Table, schema: &str, plugin: PluginComputation) -> bool {
        let key = (Arc::from(schema), Arc::from(plugin.name()));
        if !Self::admits(schema, plugin.name(), table.contains_key(&key)) {
            return false;
        }
        debug!(schema, name = plugin.name(), "registered computation");
        table.insert(key, ComputationDefinition::Plugin(Arc::new(plugin)));
        true
    }

    /// Whether a registration of `name` may proceed, reporting why not.
    fn admits(schema: &str, name: &str, registered: bool) -> bool {
        if name.is_empty() {
            report(ExecError::InvalidValueKey(format!(
                "empty computation name registered for schema '{schema}'"
            )));
            return false;
        }
        if builtins::all_tokens().contains(&name) || registered {
            report(ExecError::DuplicateRegistration {
                schema: schema.to_string(),
                name: name.to_string(),
            });
            return false;
        }
        true
    }

    /// The definition of `name` on `provider`. Reading the prim's schema
    /// is journaled.
    pub fn find(
        &self,
        provider: &SceneObject,
        name: &str,
        mut journal: Option<&mut Journal>,
    ) -> Option<ComputationDefinition> {
        if let Some(builtin) = BuiltinComputation::from_name(name) {
            return Some(ComputationDefinition::Builtin(builtin));
        }
        if let Some(attribute) = provider.as_attribute() {
            let prim = attribute.prim(journal.as_deref_mut())?;
            let schema = prim.type_name(journal);
            let path = attribute.path();
            let attribute_name = path.name();
            return self
                .lookup_attribute(&schema, attribute_name, name)
                .or_else(|| self.lookup_attribute("", attribute_name, name));
        }
        let prim = provider.as_prim()?;
        let schema = prim.type_name(journal);
        Self::lookup(&self.prim, &schema, name).or_else(|| Self::lookup(&self.prim, "", name))
    }

    /// The dispatched definition of `name` registered for `schema`.
    pub fn find_dispatched(&self, schema: &str, name: &str) -> Option<ComputationDefinition> {
        Self::lookup(&self.dispatched, schema, name)
            .or_else(|| Self::lookup(&self.dispatched, "", name))
    }

    fn lookup(table: &Table, schema: &str, name: &str) -> Option<ComputationDefinition> {
        table.get(&(Arc::from(schema), Arc::from(name))).cloned()
    }

    fn lookup_attribute(&self, schema: &str, attribute: &str, name: &str) -> Option<ComputationDefinition> {
        self.attribute
            .get(&(Arc::from(schema), Arc::from(attribute), Arc::from(name)))
            .cloned()
    }

    /// Number of registered plugin computations.
    pub fn len(&self) -> usize {
        self.prim.len() + self.dispatched.len() + self.attribute.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DiagnosticScope, ErrorSink};
    use crate::esf::{MemoryStage, ScenePath, StageInterface};
    use crate::vdf::Context;

    fn noop() -> ComputeFn {
        Arc::new(|_: &mut Context<'_>| {})
    }

    fn object(stage: &MemoryStage, path: &str) -> SceneObject {
        stage.object_at_path(&ScenePath::new(path).unwrap(), None).unwrap()
    }

    #[test]
    fn schema_specific_computations_win() {
        let stage = MemoryStage::new();
        stage.define_prim("/S", "Sphere").unwrap();
        stage.define_prim("/C", "Cube").unwrap();

        let mut registry = DefinitionRegistry::new();
        assert!(registry.register_prim_computation("size", "", ValueType::Int, vec![], noop()));
        assert!(registry.register_prim_computation("size", "Sphere", ValueType::Double, vec![], noop()));

        let sphere = object(&stage, "/S");
        let cube = object(&stage, "/C");
        let on_sphere = registry.find(&sphere, "size", None).unwrap();
        let on_cube = registry.find(&cube, "size", None).unwrap();
        assert_eq!(on_sphere.result_type(&sphere, None, None), Some(ValueType::Double));
        assert_eq!(on_cube.result_type(&cube, None, None), Some(ValueType::Int));
        assert!(registry.find(&cube, "missing", None).is_none());
        assert!(registry.find(&cube, builtins::COMPUTE_METADATA, None).unwrap().is_builtin());
    }

    #[test]
    fn invalid_registrations_are_reported() {
        let sink = ErrorSink::new();
        let _scope = DiagnosticScope::enter(sink.clone());
        let mut registry = DefinitionRegistry::new();
        assert!(registry.register_prim_computation("a", "Xform", ValueType::Int, vec![], noop()));
        assert!(!registry.register_prim_computation("a", "Xform", ValueType::Int, vec![], noop()));
        assert!(!registry.register_prim_computation("", "Xform", ValueType::Int, vec![], noop()));
        assert!(!registry.register_prim_computation(
            builtins::COMPUTE_VALUE,
            "",
            ValueType::Int,
            vec![],
            noop()
        ));
        assert_eq!(sink.len(), 3);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn attribute_computations_match_schema_and_name() {
        let stage = MemoryStage::new();
        stage.define_prim("/S", "Sphere").unwrap();
        stage.define_prim("/C", "Cube").unwrap();
        stage.create_attribute("/S.radius", ValueType::Double, 1.0).unwrap();
        stage.create_attribute("/S.height", ValueType::Double, 1.0).unwrap();
        stage.create_attribute("/C.radius", ValueType::Double, 1.0).unwrap();

        let mut registry = DefinitionRegistry::new();
        assert!(registry.register_attribute_computation(
            "doubled",
            "radius",
            "Sphere",
            ValueType::Double,
            vec![],
            noop()
        ));
        assert!(!registry.register_attribute_computation(
            "doubled",
            "radius",
            "Sphere",
            ValueType::Double,
            vec![],
            noop()
        ));
        assert!(registry.register_attribute_computation("label", "height", "", ValueType::Token, vec![], noop()));

        assert!(registry.find(&object(&stage, "/S.radius"), "doubled", None).is_some());
        assert!(registry.find(&object(&stage, "/C.radius"), "doubled", None).is_none());
        assert!(registry.find(&object(&stage, "/S.height"), "doubled", None).is_none());
        assert!(registry.find(&object(&stage, "/S.height"), "label", None).is_some());
        // Prims do not see attribute computations.
        assert!(registry.find(&object(&stage, "/S"), "doubled", None).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn dispatched_computations_are_separate() {
        let stage = MemoryStage::new();
        stage.define_prim("/S", "Sphere").unwrap();
        let mut registry = DefinitionRegistry::new();
        registry.register_dispatched_prim_computation("extent", "Boundable", ValueType::Vec3d, vec![], noop());

        assert!(registry.find(&object(&stage, "/S"), "extent", None).is_none());
        assert!(registry.find_dispatched("Boundable", "extent").is_some());
        assert!(registry.find_dispatched("Sphere", "extent").is_none());
    }
}
