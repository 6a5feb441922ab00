//! Compute Context
//!
//! A [`Context`] is what a node callback sees while it runs: the values
//! arriving on its inputs, the elements requested of each output, the
//! evaluation time, and a place to put results.

use std::sync::Arc;

use smallvec::SmallVec;

use super::mask::Mask;
use super::node::{Node, NodeId};
use super::vector::Vector;
use crate::error::{report, ExecError};
use crate::value::{
    FromValue, Matrix4d, Matrix4f, Quatd, Quatf, Time, TypeRegistry, Value, ValueType, Vec2d,
    Vec2f, Vec3d, Vec3f, Vec4d, Vec4f,
};

/// State shared by every node of one execution.
#[derive(Debug, Clone)]
pub struct EvalState {
    time: Time,
    types: Arc<TypeRegistry>,
}

impl EvalState {
    pub fn new(time: Time, types: Arc<TypeRegistry>) -> Self {
        Self { time, types }
    }

    pub fn time(&self) -> Time {
        self.time
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }
}

/// The data arriving over one connection.
#[derive(Debug, Clone)]
pub struct InputView {
    pub vector: Vector,
    pub mask: Mask,
}

impl InputView {
    /// The first value held under the connection mask.
    pub fn first_value(&self) -> Option<Value> {
        self.mask.iter().find_map(|i| self.vector.get(i))
    }

    /// Every value held under the connection mask, in index order.
    pub fn values(&self) -> Vec<Value> {
        self.vector.extract(&self.mask)
    }
}

/// Per-input gathered views, indexed by input connector.
pub(crate) type GatheredInputs = SmallVec<[SmallVec<[InputView; 1]>; 4]>;

/// The view of a running node.
pub struct Context<'a> {
    node: &'a Node,
    inputs: &'a [SmallVec<[InputView; 1]>],
    requested: &'a [(u16, Mask)],
    outputs: SmallVec<[Option<Vector>; 1]>,
    eval: &'a EvalState,
}

macro_rules! typed_input_getters {
    ($($fn_name:ident => $ty:ty),* $(,)?) => {
        $(
            #[doc = concat!("The `", stringify!($ty), "` on input `name`, or the type's fallback.")]
            pub fn $fn_name(&self, name: &str) -> $ty {
                self.input_or_fallback::<$ty>(name)
            }
        )*
    };
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        node: &'a Node,
        inputs: &'a [SmallVec<[InputView; 1]>],
        requested: &'a [(u16, Mask)],
        eval: &'a EvalState,
    ) -> Self {
        let outputs = node.outputs().iter().map(|_| None).collect();
        Self {
            node,
            inputs,
            requested,
            outputs,
            eval,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node.id()
    }

    pub fn node_name(&self) -> &str {
        self.node.name()
    }

    /// The time being evaluated.
    pub fn time(&self) -> Time {
        self.eval.time()
    }

    /// The elements requested of output `name`, if any were requested.
    pub fn requested_mask(&self, name: &str) -> Option<&Mask> {
        let index = self.node.output_index(name)?;
        self.requested
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, mask)| mask)
    }

    /// The views arriving on input `name`, one per connection that produced
    /// data. Unknown inputs yield nothing.
    pub fn input_views(&self, name: &str) -> &[InputView] {
        self.node
            .input_index(name)
            .and_then(|i| self.inputs.get(i as usize))
            .map(|views| views.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_input_value(&self, name: &str) -> bool {
        self.input_value(name).is_some()
    }

    /// The first value arriving on input `name`.
    pub fn input_value(&self, name: &str) -> Option<Value> {
        self.input_views(name).iter().find_map(InputView::first_value)
    }

    /// Every value arriving on input `name`, across all connections.
    pub fn input_values(&self, name: &str) -> Vec<Value> {
        self.input_views(name)
            .iter()
            .flat_map(InputView::values)
            .collect()
    }

    /// The input value as a `T`, if present and of that type.
    pub fn input<T: FromValue>(&self, name: &str) -> Option<T> {
        self.input_value(name).and_then(|v| T::from_value(&v))
    }

    pub fn input_or<T: FromValue>(&self, name: &str, default: T) -> T {
        self.input(name).unwrap_or(default)
    }

    /// The input value as a `T`, falling back to the registered fallback
    /// for `T`, then to `T::default()`.
    pub fn input_or_fallback<T: FromValue + Default>(&self, name: &str) -> T {
        self.input(name)
            .or_else(|| {
                self.eval
                    .types()
                    .fallback(T::VALUE_TYPE)
                    .and_then(T::from_value)
            })
            .unwrap_or_default()
    }

    typed_input_getters! {
        input_double => f64,
        input_float => f32,
        input_int => i64,
        input_bool => bool,
        input_vec2d => Vec2d,
        input_vec2f => Vec2f,
        input_vec3d => Vec3d,
        input_vec3f => Vec3f,
        input_vec4d => Vec4d,
        input_vec4f => Vec4f,
        input_quatd => Quatd,
        input_quatf => Quatf,
        input_matrix4d => Matrix4d,
        input_matrix4f => Matrix4f,
    }

    /// Set the first output to `value` for every requested element.
    pub fn set_output(&mut self, value: impl Into<Value>) {
        self.set_output_at(0, value.into());
    }

    /// Set output `name` to `value` for every requested element.
    pub fn set_output_named(&mut self, name: &str, value: impl Into<Value>) {
        match self.node.output_index(name) {
            Some(index) => self.set_output_at(index, value.into()),
            None => report(ExecError::InvalidConnection(format!(
                "node '{}' has no output '{name}'",
                self.node.name()
            ))),
        }
    }

    /// Set output `name` to a fully formed vector.
    pub fn set_output_vector(&mut self, name: &str, vector: Vector) {
        let Some(index) = self.node.output_index(name) else {
            return;
        };
        if self.check_type(index, vector.value_type()).is_some() {
            self.outputs[index as usize] = Some(vector);
        }
    }

    /// Set a single element of output `name`.
    pub fn set_output_element(&mut self, name: &str, element: usize, value: impl Into<Value>) {
        let value = value.into();
        let Some(index) = self.node.output_index(name) else {
            return;
        };
        let Some(ty) = value.value_type() else {
            return;
        };
        if self.check_type(index, ty).is_none() {
            return;
        }
        let size = self.node.outputs()[index as usize].spec.size;
        let mask = self
            .requested
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, m)| m.clone())
            .unwrap_or_else(|| Mask::all_ones(size));
        let eval = self.eval;
        let types = eval.types();
        let slot = &mut self.outputs[index as usize];
        let vector = slot.get_or_insert_with(|| types.allocate(ty, size, &mask));
        vector.set(element, value);
    }

    fn set_output_at(&mut self, index: u16, value: Value) {
        let Some(ty) = value.value_type() else {
            return;
        };
        if self.check_type(index, ty).is_none() {
            return;
        }
        let size = self.node.outputs()[index as usize].spec.size;
        self.outputs[index as usize] = Vector::splat(value, size);
    }

    fn check_type(&self, index: u16, found: ValueType) -> Option<()> {
        let spec = &self.node.outputs().get(index as usize)?.spec;
        if spec.value_type != found {
            report(ExecError::TypeMismatch {
                context: format!("output '{}' of node '{}'", spec.name, self.node.name()),
                expected: spec.value_type,
                found,
            });
            return None;
        }
        Some(())
    }

    pub(crate) fn into_outputs(self) -> SmallVec<[Option<Vector>; 1]> {
        self.outputs
    }
}
