//! Cache views.

use crate::value::{FromValue, Matrix4d, TypeRegistry, Value, ValueType, Vec3d};
use crate::vdf::{Mask, OutputData};

use super::request::Request;

/// Read-only view of the values computed for a request.
///
/// The view holds a snapshot of the output data taken when the request
/// was computed, so later invalidation does not change what it reports.
pub struct CacheView<'a> {
    request: &'a Request,
    types: &'a TypeRegistry,
    data: Vec<Option<(OutputData, Mask)>>,
}

impl<'a> CacheView<'a> {
    pub(crate) fn new(
        request: &'a Request,
        types: &'a TypeRegistry,
        data: Vec<Option<(OutputData, Mask)>>,
    ) -> Self {
        Self { request, types, data }
    }

    pub fn request(&self) -> &Request {
        self.request
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The value computed for key `index`, or [`Value::Empty`] if it
    /// failed to compile or compute.
    pub fn get(&self, index: usize) -> Value {
        let Some(Some((data, mask))) = self.data.get(index) else {
            return Value::Empty;
        };
        let vector = &data.vector;
        match self.types.extractor(vector.value_type()) {
            Some(extractor) => extractor.extract(vector, &mask.and(&data.computed)),
            None => Value::Empty,
        }
    }

    /// The value at `index` as a `T`, if it holds one.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Option<T> {
        self.get(index).get::<T>()
    }

    pub fn get_double(&self, index: usize) -> Option<f64> {
        self.get_as(index)
    }

    pub fn get_int(&self, index: usize) -> Option<i64> {
        self.get_as(index)
    }

    pub fn get_bool(&self, index: usize) -> Option<bool> {
        self.get_as(index)
    }

    pub fn get_vec3d(&self, index: usize) -> Option<Vec3d> {
        self.get_as(index)
    }

    pub fn get_matrix4d(&self, index: usize) -> Option<Matrix4d> {
        self.get_as(index)
    }

    pub fn is_holding<T: FromValue>(&self, index: usize) -> bool {
        self.get(index).is_holding::<T>()
    }

    /// Type of the value at `index`, `None` when empty.
    pub fn value_type(&self, index: usize) -> Option<ValueType> {
        self.get(index).value_type()
    }

    pub fn type_name(&self, index: usize) -> &'static str {
        self.get(index).type_name()
    }
}
