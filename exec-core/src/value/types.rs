//! The type-erased value container and its type tags.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::gf::{Matrix4d, Matrix4f, Quatd, Quatf, Vec2d, Vec2f, Vec3d, Vec3f, Vec4d, Vec4f};
use super::time::Time;

/// The result types a computation may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueType {
    Double,
    Float,
    Int,
    Bool,
    Token,
    Time,
    Vec2d,
    Vec2f,
    Vec3d,
    Vec3f,
    Vec4d,
    Vec4f,
    Quatd,
    Quatf,
    Matrix4d,
    Matrix4f,
    DoubleArray,
    FloatArray,
    IntArray,
}

impl ValueType {
    /// Every supported type, in declaration order.
    pub const ALL: [ValueType; 19] = [
        ValueType::Double,
        ValueType::Float,
        ValueType::Int,
        ValueType::Bool,
        ValueType::Token,
        ValueType::Time,
        ValueType::Vec2d,
        ValueType::Vec2f,
        ValueType::Vec3d,
        ValueType::Vec3f,
        ValueType::Vec4d,
        ValueType::Vec4f,
        ValueType::Quatd,
        ValueType::Quatf,
        ValueType::Matrix4d,
        ValueType::Matrix4f,
        ValueType::DoubleArray,
        ValueType::FloatArray,
        ValueType::IntArray,
    ];

    /// The scene-level type name.
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Double => "double",
            ValueType::Float => "float",
            ValueType::Int => "int",
            ValueType::Bool => "bool",
            ValueType::Token => "token",
            ValueType::Time => "EfTime",
            ValueType::Vec2d => "GfVec2d",
            ValueType::Vec2f => "GfVec2f",
            ValueType::Vec3d => "GfVec3d",
            ValueType::Vec3f => "GfVec3f",
            ValueType::Vec4d => "GfVec4d",
            ValueType::Vec4f => "GfVec4f",
            ValueType::Quatd => "GfQuatd",
            ValueType::Quatf => "GfQuatf",
            ValueType::Matrix4d => "GfMatrix4d",
            ValueType::Matrix4f => "GfMatrix4f",
            ValueType::DoubleArray => "VtArray<double>",
            ValueType::FloatArray => "VtArray<float>",
            ValueType::IntArray => "VtArray<int>",
        }
    }

    /// Look a type up by its scene-level name.
    pub fn from_name(name: &str) -> Option<ValueType> {
        Self::ALL.iter().copied().find(|ty| ty.name() == name)
    }

    /// Whether vectors of this type can use packed contiguous storage.
    pub fn is_packed(&self) -> bool {
        matches!(
            self,
            ValueType::Double | ValueType::Float | ValueType::Int | ValueType::Bool
        )
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A type-erased value.
///
/// `Empty` represents "no value"; every other variant carries exactly one
/// [`ValueType`]. Array payloads are reference counted so cloning a value is
/// always cheap.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Empty,
    Double(f64),
    Float(f32),
    Int(i64),
    Bool(bool),
    Token(Arc<str>),
    Time(Time),
    Vec2d(Vec2d),
    Vec2f(Vec2f),
    Vec3d(Vec3d),
    Vec3f(Vec3f),
    Vec4d(Vec4d),
    Vec4f(Vec4f),
    Quatd(Quatd),
    Quatf(Quatf),
    Matrix4d(Matrix4d),
    Matrix4f(Matrix4f),
    DoubleArray(Arc<[f64]>),
    FloatArray(Arc<[f32]>),
    IntArray(Arc<[i64]>),
}

impl Value {
    /// The type of the held value, `None` when empty.
    pub fn value_type(&self) -> Option<ValueType> {
        Some(match self {
            Value::Empty => return None,
            Value::Double(_) => ValueType::Double,
            Value::Float(_) => ValueType::Float,
            Value::Int(_) => ValueType::Int,
            Value::Bool(_) => ValueType::Bool,
            Value::Token(_) => ValueType::Token,
            Value::Time(_) => ValueType::Time,
            Value::Vec2d(_) => ValueType::Vec2d,
            Value::Vec2f(_) => ValueType::Vec2f,
            Value::Vec3d(_) => ValueType::Vec3d,
            Value::Vec3f(_) => ValueType::Vec3f,
            Value::Vec4d(_) => ValueType::Vec4d,
            Value::Vec4f(_) => ValueType::Vec4f,
            Value::Quatd(_) => ValueType::Quatd,
            Value::Quatf(_) => ValueType::Quatf,
            Value::Matrix4d(_) => ValueType::Matrix4d,
            Value::Matrix4f(_) => ValueType::Matrix4f,
            Value::DoubleArray(_) => ValueType::DoubleArray,
            Value::FloatArray(_) => ValueType::FloatArray,
            Value::IntArray(_) => ValueType::IntArray,
        })
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Value::Empty)
    }

    /// Whether this value holds a `T`.
    pub fn is_holding<T: FromValue>(&self) -> bool {
        T::from_value(self).is_some()
    }

    /// Extract a `T` if this value holds one.
    pub fn get<T: FromValue>(&self) -> Option<T> {
        T::from_value(self)
    }

    /// The name of the held type, or an empty string when empty.
    pub fn type_name(&self) -> &'static str {
        self.value_type().map(|ty| ty.name()).unwrap_or("")
    }

    /// A token value.
    pub fn token(s: &str) -> Value {
        Value::Token(Arc::from(s))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Empty => f.write_str("<empty>"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Token(v) => f.write_str(v),
            Value::Time(v) => write!(f, "{v}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Typed extraction out of a [`Value`].
pub trait FromValue: Sized {
    const VALUE_TYPE: ValueType;

    fn from_value(value: &Value) -> Option<Self>;
}

macro_rules! value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl FromValue for $ty {
                const VALUE_TYPE: ValueType = ValueType::$variant;

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }

            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_conversions! {
    f64 => Double,
    f32 => Float,
    i64 => Int,
    bool => Bool,
    Arc<str> => Token,
    Time => Time,
    Vec2d => Vec2d,
    Vec2f => Vec2f,
    Vec3d => Vec3d,
    Vec3f => Vec3f,
    Vec4d => Vec4d,
    Vec4f => Vec4f,
    Quatd => Quatd,
    Quatf => Quatf,
    Matrix4d => Matrix4d,
    Matrix4f => Matrix4f,
    Arc<[f64]> => DoubleArray,
    Arc<[f32]> => FloatArray,
    Arc<[i64]> => IntArray,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::token(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::DoubleArray(v.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_types_match_variants() {
        assert_eq!(Value::Double(1.0).value_type(), Some(ValueType::Double));
        assert_eq!(Value::token("x").value_type(), Some(ValueType::Token));
        assert_eq!(Value::Empty.value_type(), None);
        assert_eq!(
            Value::from(Matrix4d::identity()).value_type(),
            Some(ValueType::Matrix4d)
        );
    }

    #[test]
    fn typed_extraction() {
        let v = Value::from(2.5f64);
        assert_eq!(v.get::<f64>(), Some(2.5));
        assert_eq!(v.get::<f32>(), None);
        assert!(v.is_holding::<f64>());
        assert!(!v.is_holding::<bool>());
    }

    #[test]
    fn names_round_trip() {
        for ty in ValueType::ALL {
            assert_eq!(ValueType::from_name(ty.name()), Some(ty));
        }
        assert_eq!(ValueType::from_name("GfMatrix4d"), Some(ValueType::Matrix4d));
        assert_eq!(ValueType::from_name("nope"), None);
    }
}
