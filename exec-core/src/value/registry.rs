//! Type Registry
//!
//! The type registry maps external [`Value`]s onto internal vectors and back.
//! It is an explicitly constructed object: a system owns one, shares it with
//! its executors, and never mutates it once execution has started.

use indexmap::IndexMap;
use tracing::debug;

use super::gf::{Matrix4d, Matrix4f, Quatd, Quatf};
use super::time::Time;
use super::types::{Value, ValueType};
use crate::vdf::{Mask, Vector};

/// Per-type information.
#[derive(Debug, Clone)]
struct TypeInfo {
    fallback: Value,
}

/// Registry of the value types known to execution.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: IndexMap<ValueType, TypeInfo>,
}

impl TypeRegistry {
    /// An empty registry. Most callers want [`TypeRegistry::with_builtin_types`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every [`ValueType`] registered with its natural
    /// fallback (zero, identity, empty).
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        for ty in ValueType::ALL {
            registry.register(ty, natural_fallback(ty));
        }
        registry
    }

    /// Register `ty` with the given fallback value. Re-registering replaces the
    /// fallback. Returns `false` if the fallback is not of type `ty`.
    pub fn register(&mut self, ty: ValueType, fallback: Value) -> bool {
        if fallback.value_type() != Some(ty) {
            return false;
        }
        debug!(value_type = %ty, "registering execution type");
        self.types.insert(ty, TypeInfo { fallback });
        true
    }

    pub fn is_registered(&self, ty: ValueType) -> bool {
        self.types.contains_key(&ty)
    }

    /// The fallback value for `ty`.
    pub fn fallback(&self, ty: ValueType) -> Option<&Value> {
        self.types.get(&ty).map(|info| &info.fallback)
    }

    /// Wrap a single value in a one-element vector.
    ///
    /// Returns `None` for an empty value or an unregistered type.
    pub fn create_vector(&self, value: &Value) -> Option<Vector> {
        let ty = value.value_type()?;
        if !self.is_registered(ty) {
            return None;
        }
        Vector::splat(value.clone(), 1)
    }

    /// Allocate storage for `size` elements of `ty`, sized for `mask`.
    ///
    /// # Panics
    ///
    /// Panics if `ty` has not been registered. An unknown type reaching an
    /// executor means a node was built against a different registry, which
    /// cannot be recovered from.
    pub fn allocate(&self, ty: ValueType, size: usize, mask: &Mask) -> Vector {
        assert!(
            self.is_registered(ty),
            "value type {ty} is not registered with the type registry"
        );
        Vector::allocate(ty, size, mask)
    }

    /// A broadcast vector holding the fallback of `ty`.
    pub fn fallback_vector(&self, ty: ValueType, size: usize) -> Option<Vector> {
        Vector::splat(self.fallback(ty)?.clone(), size)
    }

    /// An extractor for reading values of `ty` back out of vectors.
    pub fn extractor(&self, ty: ValueType) -> Option<ValueExtractor> {
        self.is_registered(ty).then_some(ValueExtractor { ty })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn natural_fallback(ty: ValueType) -> Value {
    match ty {
        ValueType::Double => Value::Double(0.0),
        ValueType::Float => Value::Float(0.0),
        ValueType::Int => Value::Int(0),
        ValueType::Bool => Value::Bool(false),
        ValueType::Token => Value::token(""),
        ValueType::Time => Value::Time(Time::default_time()),
        ValueType::Vec2d => Value::Vec2d(Default::default()),
        ValueType::Vec2f => Value::Vec2f(Default::default()),
        ValueType::Vec3d => Value::Vec3d(Default::default()),
        ValueType::Vec3f => Value::Vec3f(Default::default()),
        ValueType::Vec4d => Value::Vec4d(Default::default()),
        ValueType::Vec4f => Value::Vec4f(Default::default()),
        ValueType::Quatd => Value::Quatd(Quatd::identity()),
        ValueType::Quatf => Value::Quatf(Quatf::identity()),
        ValueType::Matrix4d => Value::Matrix4d(Matrix4d::identity()),
        ValueType::Matrix4f => Value::Matrix4f(Matrix4f::identity()),
        ValueType::DoubleArray => Value::DoubleArray(Vec::new().into()),
        ValueType::FloatArray => Value::FloatArray(Vec::new().into()),
        ValueType::IntArray => Value::IntArray(Vec::new().into()),
    }
}

/// Reads a single external value back out of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueExtractor {
    ty: ValueType,
}

impl ValueExtractor {
    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    /// The value at the first index of `mask` that the vector holds.
    ///
    /// Yields [`Value::Empty`] when the vector holds nothing under the mask
    /// or holds a value of some other type.
    pub fn extract(&self, vector: &Vector, mask: &Mask) -> Value {
        mask.iter()
            .find_map(|index| vector.get(index))
            .filter(|value| value.value_type() == Some(self.ty))
            .unwrap_or_default()
    }
}
