//! In-Memory Stage
//!
//! [`MemoryStage`] is a small scene implementing every scene interface. It
//! holds prims, attributes with a default value and time samples, and
//! relationships. Each mutator returns the [`SceneEdit`]s it caused, ready
//! to be handed to [`System::did_change_objects`](crate::exec::System::did_change_objects).
//!
//! Attribute values resolve with held interpolation: at frame `t` the value
//! is the latest sample at or before `t`, or the earliest sample when `t`
//! precedes them all. The default time reads the default value, falling
//! back to the earliest sample when no default is authored.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::interfaces::{
    Attribute, AttributeInterface, ObjectInterface, Prim, PrimInterface, PropertyInterface,
    Relationship, RelationshipInterface, StageInterface,
};
use super::journal::{EditReasons, SceneEdit};
use super::path::ScenePath;
use crate::error::{ExecError, Result};
use crate::value::{Time, Value, ValueType};

#[derive(Debug, Clone)]
struct MetadataField {
    value_type: ValueType,
    fallback: Value,
}

#[derive(Debug, Clone)]
struct AttributeData {
    value_type: ValueType,
    default: Value,
    /// Sorted by frame.
    samples: Vec<(f64, Value)>,
    connections: Vec<ScenePath>,
}

impl AttributeData {
    /// Whether resolving at two times can give different values. An
    /// authored default counts when it differs from the samples.
    fn varies(&self) -> bool {
        let mut values = self.samples.iter().map(|(_, v)| v);
        let first = if self.default.is_empty() {
            values.next()
        } else {
            Some(&self.default)
        };
        match first {
            Some(first) => values.any(|v| v != first),
            None => false,
        }
    }

    fn resolve(&self, time: Time) -> Value {
        let Some(frame) = time.frame() else {
            if !self.default.is_empty() {
                return self.default.clone();
            }
            return self.samples.first().map(|(_, v)| v.clone()).unwrap_or_default();
        };
        if self.samples.is_empty() {
            return self.default.clone();
        }
        let after = self.samples.partition_point(|(f, _)| *f <= frame);
        let index = after.saturating_sub(1);
        self.samples[index].1.clone()
    }
}

#[derive(Debug, Clone)]
enum PropertyKind {
    Attribute(AttributeData),
    Relationship(Vec<ScenePath>),
}

#[derive(Debug, Clone)]
struct PropertyData {
    kind: PropertyKind,
    metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
struct PrimData {
    type_name: String,
    metadata: BTreeMap<String, Value>,
    properties: IndexMap<String, PropertyData>,
}

#[derive(Debug)]
struct StageData {
    prims: BTreeMap<ScenePath, PrimData>,
    metadata_fields: IndexMap<String, MetadataField>,
}

impl Default for StageData {
    fn default() -> Self {
        let mut prims = BTreeMap::new();
        prims.insert(ScenePath::absolute_root(), PrimData::default());
        let mut metadata_fields = IndexMap::new();
        for (key, fallback) in [
            ("active", Value::Bool(true)),
            ("hidden", Value::Bool(false)),
            ("kind", Value::token("")),
            ("documentation", Value::token("")),
            ("comment", Value::token("")),
        ] {
            if let Some(value_type) = fallback.value_type() {
                metadata_fields.insert(key.to_string(), MetadataField { value_type, fallback });
            }
        }
        Self {
            prims,
            metadata_fields,
        }
    }
}

impl StageData {
    fn property(&self, path: &ScenePath) -> Option<&PropertyData> {
        self.prims.get(&path.prim_path())?.properties.get(path.name())
    }

    fn property_mut(&mut self, path: &ScenePath) -> Option<&mut PropertyData> {
        self.prims.get_mut(&path.prim_path())?.properties.get_mut(path.name())
    }

    fn attribute(&self, path: &ScenePath) -> Option<&AttributeData> {
        match &self.property(path)?.kind {
            PropertyKind::Attribute(data) => Some(data),
            PropertyKind::Relationship(_) => None,
        }
    }

    fn attribute_mut(&mut self, path: &ScenePath) -> Result<&mut AttributeData> {
        match self.property_mut(path).map(|p| &mut p.kind) {
            Some(PropertyKind::Attribute(data)) => Ok(data),
            _ => Err(ExecError::InvalidProvider(path.clone())),
        }
    }

    fn exists(&self, path: &ScenePath) -> bool {
        if path.is_property_path() {
            self.property(path).is_some()
        } else {
            self.prims.contains_key(path)
        }
    }

    fn metadata(&self, path: &ScenePath) -> Option<&BTreeMap<String, Value>> {
        if path.is_property_path() {
            self.property(path).map(|p| &p.metadata)
        } else {
            self.prims.get(path).map(|p| &p.metadata)
        }
    }

    fn metadata_mut(&mut self, path: &ScenePath) -> Option<&mut BTreeMap<String, Value>> {
        if path.is_property_path() {
            self.property_mut(path).map(|p| &mut p.metadata)
        } else {
            self.prims.get_mut(path).map(|p| &mut p.metadata)
        }
    }
}

fn parse(path: &str) -> Result<ScenePath> {
    ScenePath::new(path).ok_or_else(|| ExecError::InvalidSceneEdit(format!("'{path}' is not a valid scene path")))
}

fn parse_property(path: &str) -> Result<ScenePath> {
    let parsed = parse(path)?;
    if !parsed.is_property_path() {
        return Err(ExecError::InvalidSceneEdit(format!("'{path}' is not a property path")));
    }
    Ok(parsed)
}

fn parse_all(paths: &[&str]) -> Result<Vec<ScenePath>> {
    paths.iter().map(|p| parse(p)).collect()
}

fn check_type(path: &ScenePath, expected: ValueType, value: &Value) -> Result<()> {
    match value.value_type() {
        None => Ok(()),
        Some(found) if found == expected => Ok(()),
        Some(found) => Err(ExecError::TypeMismatch {
            context: path.to_string(),
            expected,
            found,
        }),
    }
}

/// A scene held in memory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStage {
    data: Arc<RwLock<StageData>>,
}

impl MemoryStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `key` a valid metadata field on every object.
    ///
    /// Returns `false` if the key is already registered or the fallback is
    /// empty.
    pub fn register_metadata_field(&self, key: &str, fallback: Value) -> bool {
        let Some(value_type) = fallback.value_type() else {
            return false;
        };
        let mut data = self.data.write();
        if data.metadata_fields.contains_key(key) {
            return false;
        }
        data.metadata_fields
            .insert(key.to_string(), MetadataField { value_type, fallback });
        true
    }

    /// Define a prim of `type_name`, creating typeless ancestors as needed.
    pub fn define_prim(&self, path: &str, type_name: &str) -> Result<Vec<SceneEdit>> {
        let path = parse(path)?;
        if !path.is_prim_path() {
            return Err(ExecError::InvalidSceneEdit(format!("{path} is not a prim path")));
        }
        let mut data = self.data.write();
        let mut edits = Vec::new();
        let mut missing: Vec<ScenePath> = path.ancestors().filter(|a| !data.prims.contains_key(a)).collect();
        missing.reverse();
        for ancestor in missing {
            data.prims.insert(ancestor.clone(), PrimData::default());
            edits.push(SceneEdit::resync(ancestor));
        }
        match data.prims.get_mut(&path) {
            Some(prim) if prim.type_name == type_name => {}
            Some(prim) => {
                prim.type_name = type_name.to_string();
                edits.push(SceneEdit::resync(path));
            }
            None => {
                data.prims.insert(
                    path.clone(),
                    PrimData {
                        type_name: type_name.to_string(),
                        ..Default::default()
                    },
                );
                edits.push(SceneEdit::resync(path));
            }
        }
        Ok(edits)
    }

    /// Remove a prim and everything beneath it.
    pub fn remove_prim(&self, path: &str) -> Result<Vec<SceneEdit>> {
        let path = parse(path)?;
        if !path.is_prim_path() {
            return Err(ExecError::InvalidSceneEdit(format!("{path} is not a prim path")));
        }
        let mut data = self.data.write();
        if !data.prims.contains_key(&path) {
            return Err(ExecError::InvalidProvider(path));
        }
        data.prims.retain(|p, _| !p.has_prefix(&path));
        Ok(vec![SceneEdit::resync(path)])
    }

    /// Create an attribute. `default` may be [`Value::Empty`].
    pub fn create_attribute(
        &self,
        path: &str,
        value_type: ValueType,
        default: impl Into<Value>,
    ) -> Result<Vec<SceneEdit>> {
        let path = parse_property(path)?;
        let default = default.into();
        check_type(&path, value_type, &default)?;
        let attribute = AttributeData {
            value_type,
            default,
            samples: Vec::new(),
            connections: Vec::new(),
        };
        self.create_property(path, PropertyKind::Attribute(attribute))
    }

    pub fn create_relationship(&self, path: &str, targets: &[&str]) -> Result<Vec<SceneEdit>> {
        let path = parse_property(path)?;
        let targets = parse_all(targets)?;
        self.create_property(path, PropertyKind::Relationship(targets))
    }

    fn create_property(&self, path: ScenePath, kind: PropertyKind) -> Result<Vec<SceneEdit>> {
        let prim_path = path.prim_path();
        let mut data = self.data.write();
        let prim = data
            .prims
            .get_mut(&prim_path)
            .ok_or_else(|| ExecError::InvalidProvider(prim_path.clone()))?;
        prim.properties.insert(
            path.name().to_string(),
            PropertyData {
                kind,
                metadata: BTreeMap::new(),
            },
        );
        Ok(vec![
            SceneEdit::resync(path),
            SceneEdit::new(prim_path, EditReasons::CHANGED_PROPERTY_LIST),
        ])
    }

    pub fn remove_property(&self, path: &str) -> Result<Vec<SceneEdit>> {
        let path = parse_property(path)?;
        let prim_path = path.prim_path();
        let mut data = self.data.write();
        let removed = data
            .prims
            .get_mut(&prim_path)
            .and_then(|prim| prim.properties.shift_remove(path.name()));
        if removed.is_none() {
            return Err(ExecError::InvalidProvider(path));
        }
        Ok(vec![
            SceneEdit::resync(path),
            SceneEdit::new(prim_path, EditReasons::CHANGED_PROPERTY_LIST),
        ])
    }

    pub fn set_default(&self, path: &str, value: impl Into<Value>) -> Result<Vec<SceneEdit>> {
        let path = parse_property(path)?;
        let value = value.into();
        let mut data = self.data.write();
        let attribute = data.attribute_mut(&path)?;
        check_type(&path, attribute.value_type, &value)?;
        attribute.default = value;
        Ok(vec![SceneEdit::new(path, EditReasons::CHANGED_PROPERTY_VALUE)])
    }

    /// Author a time sample, replacing any sample at the same frame.
    pub fn set_time_sample(&self, path: &str, frame: f64, value: impl Into<Value>) -> Result<Vec<SceneEdit>> {
        let path = parse_property(path)?;
        let value = value.into();
        let mut data = self.data.write();
        let attribute = data.attribute_mut(&path)?;
        check_type(&path, attribute.value_type, &value)?;
        match attribute.samples.binary_search_by(|(f, _)| f.total_cmp(&frame)) {
            Ok(i) => attribute.samples[i].1 = value,
            Err(i) => attribute.samples.insert(i, (frame, value)),
        }
        Ok(vec![SceneEdit::new(path, EditReasons::CHANGED_PROPERTY_VALUE)])
    }

    pub fn clear_time_samples(&self, path: &str) -> Result<Vec<SceneEdit>> {
        let path = parse_property(path)?;
        let mut data = self.data.write();
        data.attribute_mut(&path)?.samples.clear();
        Ok(vec![SceneEdit::new(path, EditReasons::CHANGED_PROPERTY_VALUE)])
    }

    pub fn set_connections(&self, path: &str, sources: &[&str]) -> Result<Vec<SceneEdit>> {
        let path = parse_property(path)?;
        let sources = parse_all(sources)?;
        let mut data = self.data.write();
        data.attribute_mut(&path)?.connections = sources;
        Ok(vec![SceneEdit::new(path, EditReasons::CHANGED_CONNECTION_PATHS)])
    }

    pub fn set_targets(&self, path: &str, targets: &[&str]) -> Result<Vec<SceneEdit>> {
        let path = parse_property(path)?;
        let targets = parse_all(targets)?;
        let mut data = self.data.write();
        match data.property_mut(&path).map(|p| &mut p.kind) {
            Some(PropertyKind::Relationship(existing)) => *existing = targets,
            _ => return Err(ExecError::InvalidProvider(path)),
        }
        Ok(vec![SceneEdit::new(path, EditReasons::CHANGED_TARGET_PATHS)])
    }

    /// Author metadata `key` on the prim or property at `path`.
    pub fn set_metadata(&self, path: &str, key: &str, value: impl Into<Value>) -> Result<Vec<SceneEdit>> {
        let path = parse(path)?;
        let value = value.into();
        let mut data = self.data.write();
        let Some(field) = data.metadata_fields.get(key) else {
            return Err(ExecError::InvalidMetadataKey {
                provider: path,
                key: key.to_string(),
            });
        };
        check_type(&path, field.value_type, &value)?;
        let metadata = data
            .metadata_mut(&path)
            .ok_or_else(|| ExecError::InvalidProvider(path.clone()))?;
        metadata.insert(key.to_string(), value);
        Ok(vec![SceneEdit::new(path, EditReasons::CHANGED_METADATA)])
    }

    /// Number of prims, excluding the pseudo-root.
    pub fn prim_count(&self) -> usize {
        self.data.read().prims.len() - 1
    }

    fn prim_handle(&self, path: ScenePath) -> Prim {
        Arc::new(MemoryPrim {
            stage: self.clone(),
            path,
        })
    }
}

impl StageInterface for MemoryStage {
    fn prim_at_path_impl(&self, path: &ScenePath) -> Option<Prim> {
        let exists = !path.is_property_path() && self.data.read().prims.contains_key(path);
        exists.then(|| self.prim_handle(path.clone()))
    }

    fn attribute_at_path_impl(&self, path: &ScenePath) -> Option<Attribute> {
        self.data.read().attribute(path)?;
        Some(Arc::new(MemoryAttribute {
            stage: self.clone(),
            path: path.clone(),
        }))
    }

    fn relationship_at_path_impl(&self, path: &ScenePath) -> Option<Relationship> {
        match self.data.read().property(path)?.kind {
            PropertyKind::Relationship(_) => Some(Arc::new(MemoryRelationship {
                stage: self.clone(),
                path: path.clone(),
            })),
            PropertyKind::Attribute(_) => None,
        }
    }

    fn pseudo_root(&self) -> Prim {
        self.prim_handle(ScenePath::absolute_root())
    }
}

struct MemoryPrim {
    stage: MemoryStage,
    path: ScenePath,
}

struct MemoryAttribute {
    stage: MemoryStage,
    path: ScenePath,
}

struct MemoryRelationship {
    stage: MemoryStage,
    path: ScenePath,
}

macro_rules! memory_object {
    ($ty:ty) => {
        impl ObjectInterface for $ty {
            fn path(&self) -> ScenePath {
                self.path.clone()
            }

            fn is_valid_impl(&self) -> bool {
                self.stage.data.read().exists(&self.path)
            }

            fn metadata_impl(&self, key: &str) -> Value {
                let data = self.stage.data.read();
                let Some(field) = data.metadata_fields.get(key) else {
                    return Value::Empty;
                };
                data.metadata(&self.path)
                    .and_then(|m| m.get(key))
                    .cloned()
                    .unwrap_or_else(|| field.fallback.clone())
            }

            fn is_valid_metadata_key_impl(&self, key: &str) -> bool {
                self.stage.data.read().metadata_fields.contains_key(key)
            }

            fn metadata_value_type_impl(&self, key: &str) -> Option<ValueType> {
                self.stage.data.read().metadata_fields.get(key).map(|f| f.value_type)
            }

            fn prim_impl(&self) -> Option<Prim> {
                self.stage.prim_at_path_impl(&self.path.prim_path())
            }
        }
    };
}

memory_object!(MemoryPrim);
memory_object!(MemoryAttribute);
memory_object!(MemoryRelationship);

impl PrimInterface for MemoryPrim {
    fn type_name_impl(&self) -> String {
        self.stage
            .data
            .read()
            .prims
            .get(&self.path)
            .map(|p| p.type_name.clone())
            .unwrap_or_default()
    }

    fn parent_impl(&self) -> Option<Prim> {
        self.stage.prim_at_path_impl(&self.path.parent()?)
    }

    fn property_names_impl(&self) -> Vec<String> {
        self.stage
            .data
            .read()
            .prims
            .get(&self.path)
            .map(|p| p.properties.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn attribute_impl(&self, name: &str) -> Option<Attribute> {
        self.stage.attribute_at_path_impl(&self.path.append_property(name)?)
    }

    fn relationship_impl(&self, name: &str) -> Option<Relationship> {
        self.stage.relationship_at_path_impl(&self.path.append_property(name)?)
    }
}

impl PropertyInterface for MemoryAttribute {}
impl PropertyInterface for MemoryRelationship {}

impl MemoryAttribute {
    fn with_data<R>(&self, f: impl FnOnce(&AttributeData) -> R) -> Option<R> {
        self.stage.data.read().attribute(&self.path).map(f)
    }
}

impl AttributeInterface for MemoryAttribute {
    fn value_type_impl(&self) -> ValueType {
        self.with_data(|a| a.value_type).unwrap_or(ValueType::Double)
    }

    fn get_impl(&self, time: Time) -> Value {
        self.with_data(|a| a.resolve(time)).unwrap_or_default()
    }

    fn is_time_varying_impl(&self) -> bool {
        self.with_data(AttributeData::varies).unwrap_or(false)
    }

    fn connections_impl(&self) -> Vec<ScenePath> {
        self.with_data(|a| a.connections.clone()).unwrap_or_default()
    }

    fn value_changes_between(&self, from: Time, to: Time) -> bool {
        self.with_data(|a| a.resolve(from) != a.resolve(to)).unwrap_or(false)
    }
}

impl RelationshipInterface for MemoryRelationship {
    fn targets_impl(&self) -> Vec<ScenePath> {
        match self.stage.data.read().property(&self.path).map(|p| &p.kind) {
            Some(PropertyKind::Relationship(targets)) => targets.clone(),
            _ => Vec::new(),
        }
    }
}
