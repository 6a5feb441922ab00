//! Vectors
//!
//! A [`Vector`] is the typed, type-erased container that carries an output's
//! elements between nodes. Storage is chosen by shape:
//!
//! - **Empty**: nothing stored.
//! - **Single**: one value broadcast to every element.
//! - **Packed**: a window `[first, first + len)` of a primitive type stored
//!   contiguously.
//! - **Boxed**: a window of arbitrary values.
//!
//! Windowed payloads are shared behind an [`Arc`] and copied on write, so
//! handing a vector to a consumer never copies element data.

use std::sync::Arc;

use super::mask::Mask;
use crate::value::{Value, ValueType};

/// The storage shape of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Empty,
    Single,
    Packed,
    Boxed,
}

#[derive(Debug, Clone, PartialEq)]
enum Packed {
    Double(Vec<f64>),
    Float(Vec<f32>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
}

impl Packed {
    fn new(ty: ValueType, len: usize) -> Option<Packed> {
        Some(match ty {
            ValueType::Double => Packed::Double(vec![0.0; len]),
            ValueType::Float => Packed::Float(vec![0.0; len]),
            ValueType::Int => Packed::Int(vec![0; len]),
            ValueType::Bool => Packed::Bool(vec![false; len]),
            _ => return None,
        })
    }

    fn len(&self) -> usize {
        match self {
            Packed::Double(v) => v.len(),
            Packed::Float(v) => v.len(),
            Packed::Int(v) => v.len(),
            Packed::Bool(v) => v.len(),
        }
    }

    fn get(&self, offset: usize) -> Option<Value> {
        match self {
            Packed::Double(v) => v.get(offset).map(|x| Value::Double(*x)),
            Packed::Float(v) => v.get(offset).map(|x| Value::Float(*x)),
            Packed::Int(v) => v.get(offset).map(|x| Value::Int(*x)),
            Packed::Bool(v) => v.get(offset).map(|x| Value::Bool(*x)),
        }
    }

    fn set(&mut self, offset: usize, value: &Value) -> bool {
        match (self, value) {
            (Packed::Double(v), Value::Double(x)) => v[offset] = *x,
            (Packed::Float(v), Value::Float(x)) => v[offset] = *x,
            (Packed::Int(v), Value::Int(x)) => v[offset] = *x,
            (Packed::Bool(v), Value::Bool(x)) => v[offset] = *x,
            _ => return false,
        }
        true
    }

    /// Grow the window by `front` elements before and `back` after.
    fn grow(&mut self, front: usize, back: usize) {
        fn pad<T: Copy + Default>(v: &mut Vec<T>, front: usize, back: usize) {
            let mut grown = vec![T::default(); front];
            grown.extend_from_slice(v);
            grown.resize(grown.len() + back, T::default());
            *v = grown;
        }
        match self {
            Packed::Double(v) => pad(v, front, back),
            Packed::Float(v) => pad(v, front, back),
            Packed::Int(v) => pad(v, front, back),
            Packed::Bool(v) => pad(v, front, back),
        }
    }
}

#[derive(Debug, Clone)]
enum Storage {
    Empty,
    Single(Value),
    Packed {
        first: usize,
        // Elements of the window that hold a value.
        present: Mask,
        data: Arc<Packed>,
    },
    Boxed {
        first: usize,
        data: Arc<Vec<Value>>,
    },
}

/// A typed container of `size` elements.
#[derive(Debug, Clone)]
pub struct Vector {
    ty: ValueType,
    size: usize,
    storage: Storage,
}

impl Vector {
    /// A vector of `size` elements holding nothing.
    pub fn empty(ty: ValueType, size: usize) -> Self {
        Self {
            ty,
            size,
            storage: Storage::Empty,
        }
    }

    /// A vector broadcasting `value` to all `size` elements.
    ///
    /// Returns `None` for [`Value::Empty`], which has no type.
    pub fn splat(value: Value, size: usize) -> Option<Self> {
        let ty = value.value_type()?;
        Some(Self {
            ty,
            size,
            storage: Storage::Single(value),
        })
    }

    /// Storage for `size` elements of `ty`, sized to span the set bits of
    /// `mask`. Nothing is present until it is set.
    pub fn allocate(ty: ValueType, size: usize, mask: &Mask) -> Self {
        let (Some(first), Some(last)) = (mask.first_set(), mask.last_set()) else {
            return Self::empty(ty, size);
        };
        let len = last - first + 1;
        let storage = match Packed::new(ty, len) {
            Some(packed) => Storage::Packed {
                first,
                present: Mask::empty(len),
                data: Arc::new(packed),
            },
            None => Storage::Boxed {
                first,
                data: Arc::new(vec![Value::Empty; len]),
            },
        };
        Self { ty, size, storage }
    }

    pub fn value_type(&self) -> ValueType {
        self.ty
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn storage_kind(&self) -> StorageKind {
        match self.storage {
            Storage::Empty => StorageKind::Empty,
            Storage::Single(_) => StorageKind::Single,
            Storage::Packed { .. } => StorageKind::Packed,
            Storage::Boxed { .. } => StorageKind::Boxed,
        }
    }

    /// The value at `index`, if one is held.
    pub fn get(&self, index: usize) -> Option<Value> {
        if index >= self.size {
            return None;
        }
        match &self.storage {
            Storage::Empty => None,
            Storage::Single(value) => Some(value.clone()),
            Storage::Packed {
                first,
                present,
                data,
            } => {
                let offset = index.checked_sub(*first)?;
                if !present.contains(offset) {
                    return None;
                }
                data.get(offset)
            }
            Storage::Boxed { first, data } => {
                let offset = index.checked_sub(*first)?;
                data.get(offset).filter(|v| !v.is_empty()).cloned()
            }
        }
    }

    /// The mask of elements that currently hold a value.
    pub fn present_mask(&self) -> Mask {
        match &self.storage {
            Storage::Empty => Mask::empty(self.size),
            Storage::Single(_) => Mask::all_ones(self.size),
            Storage::Packed { first, present, .. } => {
                Mask::from_indices(self.size, present.iter().map(|i| i + first))
            }
            Storage::Boxed { first, data } => Mask::from_indices(
                self.size,
                data.iter()
                    .enumerate()
                    .filter(|(_, v)| !v.is_empty())
                    .map(|(i, _)| i + first),
            ),
        }
    }

    /// Store `value` at `index`. Returns `false` if the index is out of
    /// range or the value has the wrong type.
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        if index >= self.size || value.value_type() != Some(self.ty) {
            return false;
        }
        if let Storage::Single(current) = &self.storage {
            if *current == value {
                return true;
            }
            self.expand_single();
        }
        self.ensure_window(index);

        match &mut self.storage {
            Storage::Packed {
                first,
                present,
                data,
            } => {
                let offset = index - *first;
                if !Arc::make_mut(data).set(offset, &value) {
                    return false;
                }
                *present = present.or(&Mask::from_indices(present.size(), [offset]));
                true
            }
            Storage::Boxed { first, data } => {
                let offset = index - *first;
                Arc::make_mut(data)[offset] = value;
                true
            }
            Storage::Empty | Storage::Single(_) => false,
        }
    }

    /// Copy the elements of `source` selected by `mask` into `self`.
    ///
    /// Elements the source does not hold are left untouched.
    pub fn merge(&mut self, source: &Vector, mask: &Mask) {
        if source.ty != self.ty {
            return;
        }
        let replaces_all = mask.size() == self.size
            && mask.count() == self.size
            && source.size == self.size
            && mask.is_subset_of(&source.present_mask());
        if replaces_all || matches!(self.storage, Storage::Empty) && mask.is_all_ones() {
            self.storage = source.storage.clone();
            self.size = source.size;
            return;
        }
        for index in mask.iter() {
            if let Some(value) = source.get(index) {
                self.set(index, value);
            }
        }
    }

    /// All held values under `mask`, in index order.
    pub fn extract(&self, mask: &Mask) -> Vec<Value> {
        mask.iter().filter_map(|i| self.get(i)).collect()
    }

    /// Number of elements physically stored.
    pub fn stored_len(&self) -> usize {
        match &self.storage {
            Storage::Empty => 0,
            Storage::Single(_) => 1,
            Storage::Packed { data, .. } => data.len(),
            Storage::Boxed { data, .. } => data.len(),
        }
    }

    /// Whether `self` and `other` hold equal values at every index of `mask`.
    pub fn equal_under(&self, other: &Vector, mask: &Mask) -> bool {
        self.ty == other.ty && mask.iter().all(|i| self.get(i) == other.get(i))
    }

    fn expand_single(&mut self) {
        let Storage::Single(value) = std::mem::replace(&mut self.storage, Storage::Empty) else {
            return;
        };
        let all = Mask::all_ones(self.size);
        *self = Vector::allocate(self.ty, self.size, &all);
        for index in 0..self.size {
            self.set(index, value.clone());
        }
    }

    fn ensure_window(&mut self, index: usize) {
        if matches!(self.storage, Storage::Empty) {
            *self = Vector::allocate(self.ty, self.size, &Mask::from_indices(self.size, [index]));
            return;
        }
        match &mut self.storage {
            Storage::Packed {
                first,
                present,
                data,
            } => {
                let len = data.len();
                let (front, back) = window_growth(*first, len, index);
                if front + back > 0 {
                    Arc::make_mut(data).grow(front, back);
                    *present = Mask::from_indices(len + front + back, present.iter().map(|i| i + front));
                    *first -= front;
                }
            }
            Storage::Boxed { first, data } => {
                let (front, back) = window_growth(*first, data.len(), index);
                if front + back > 0 {
                    let values = Arc::make_mut(data);
                    let mut grown = vec![Value::Empty; front];
                    grown.append(values);
                    grown.resize(grown.len() + back, Value::Empty);
                    *values = grown;
                    *first -= front;
                }
            }
            Storage::Empty | Storage::Single(_) => {}
        }
    }
}

fn window_growth(first: usize, len: usize, index: usize) -> (usize, usize) {
    if index < first {
        (first - index, 0)
    } else if index >= first + len {
        (0, index + 1 - (first + len))
    } else {
        (0, 0)
    }
}

/// Logical equality: same type, same size, and the same value (or absence)
/// at every index, regardless of storage shape.
impl PartialEq for Vector {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty
            && self.size == other.size
            && (0..self.size).all(|i| self.get(i) == other.get(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_holds_nothing() {
        let v = Vector::empty(ValueType::Double, 3);
        assert_eq!(v.get(0), None);
        assert_eq!(v.storage_kind(), StorageKind::Empty);
        assert!(v.present_mask().is_all_zeros());
    }

    #[test]
    fn single_broadcasts() {
        let v = Vector::splat(Value::Int(7), 4).unwrap();
        assert_eq!(v.get(3), Some(Value::Int(7)));
        assert_eq!(v.get(4), None);
        assert_eq!(v.stored_len(), 1);
    }

    #[test]
    fn allocate_spans_mask_window() {
        let mask = Mask::from_indices(100, [40, 45]);
        let v = Vector::allocate(ValueType::Double, 100, &mask);
        assert_eq!(v.storage_kind(), StorageKind::Packed);
        assert_eq!(v.stored_len(), 6);

        let boxed = Vector::allocate(ValueType::Matrix4d, 100, &mask);
        assert_eq!(boxed.storage_kind(), StorageKind::Boxed);
    }

    #[test]
    fn set_grows_window_both_ways() {
        let mut v = Vector::allocate(ValueType::Double, 10, &Mask::from_indices(10, [5]));
        assert!(v.set(5, Value::Double(5.0)));
        assert!(v.set(2, Value::Double(2.0)));
        assert!(v.set(8, Value::Double(8.0)));
        assert_eq!(v.get(2), Some(Value::Double(2.0)));
        assert_eq!(v.get(5), Some(Value::Double(5.0)));
        assert_eq!(v.get(8), Some(Value::Double(8.0)));
        assert_eq!(v.get(3), None);
        assert_eq!(v.present_mask(), Mask::from_indices(10, [2, 5, 8]));
    }

    #[test]
    fn set_rejects_wrong_type() {
        let mut v = Vector::empty(ValueType::Double, 2);
        assert!(!v.set(0, Value::Int(1)));
        assert!(!v.set(5, Value::Double(1.0)));
        assert_eq!(v.storage_kind(), StorageKind::Empty);
    }

    #[test]
    fn setting_single_expands_storage() {
        let mut v = Vector::splat(Value::Bool(true), 3).unwrap();
        assert!(v.set(1, Value::Bool(false)));
        assert_eq!(v.storage_kind(), StorageKind::Packed);
        assert_eq!(v.extract(&Mask::all_ones(3)), vec![
            Value::Bool(true),
            Value::Bool(false),
            Value::Bool(true)
        ]);
    }

    #[test]
    fn merge_copies_masked_elements() {
        let mut dst = Vector::allocate(ValueType::Int, 6, &Mask::all_ones(6));
        for i in 0..6 {
            dst.set(i, Value::Int(0));
        }
        let src = Vector::splat(Value::Int(9), 6).unwrap();
        dst.merge(&src, &Mask::from_indices(6, [1, 4]));
        assert_eq!(
            dst.extract(&Mask::all_ones(6)),
            [0, 9, 0, 0, 9, 0].map(Value::Int).to_vec()
        );
    }

    #[test]
    fn merge_keeps_elements_the_source_lacks() {
        let mut dst = Vector::splat(Value::Double(7.0), 2).unwrap();
        dst.merge(&Vector::empty(ValueType::Double, 2), &Mask::all_ones(2));
        assert_eq!(dst.get(0), Some(Value::Double(7.0)));
        assert_eq!(dst.get(1), Some(Value::Double(7.0)));

        let mut partial = Vector::allocate(ValueType::Double, 3, &Mask::all_ones(3));
        partial.set(1, Value::Double(5.0));
        dst = Vector::splat(Value::Double(1.0), 3).unwrap();
        dst.merge(&partial, &Mask::all_ones(3));
        assert_eq!(
            dst.extract(&Mask::all_ones(3)),
            [1.0, 5.0, 1.0].map(Value::Double).to_vec()
        );
    }

    #[test]
    fn clones_copy_on_write() {
        let mut a = Vector::allocate(ValueType::Token, 2, &Mask::all_ones(2));
        a.set(0, Value::token("a"));
        let mut b = a.clone();
        b.set(0, Value::token("b"));
        assert_eq!(a.get(0), Some(Value::token("a")));
        assert_eq!(b.get(0), Some(Value::token("b")));
    }

    #[test]
    fn equality_ignores_storage_shape() {
        let single = Vector::splat(Value::Double(1.0), 2).unwrap();
        let mut packed = Vector::allocate(ValueType::Double, 2, &Mask::all_ones(2));
        packed.set(0, Value::Double(1.0));
        packed.set(1, Value::Double(1.0));
        assert_eq!(single, packed);
    }
}
