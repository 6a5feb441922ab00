//! Builtin computations
//!
//! Every scene object provides a handful of computations without any
//! registration:
//!
//! - `computeTime` on the stage pseudo-root yields the evaluation time.
//! - `computeValue` on an attribute yields its resolved value.
//! - `computeMetadata` on any object yields the metadata field named by the
//!   disambiguating id.
//!
//! Attribute values that cannot vary over time are baked into constant
//! nodes at compile time. Time-varying attributes compile to nodes that
//! read the attribute at the evaluation time, so a time change only
//! invalidates them when the attribute actually resolves differently.

use std::sync::Arc;

use super::program::{NodeRole, Program};
use super::value_key::ValueKey;
use crate::error::{report, ExecError};
use crate::esf::{
    AttributeInterface, EditReasons, Journal, ObjectInterface, SceneObject,
};
use crate::value::{Time, Value, ValueType};
use crate::vdf::{Context, NodeId, NodeSpec, OutputSpec};

pub const COMPUTE_TIME: &str = "computeTime";
pub const COMPUTE_VALUE: &str = "computeValue";
pub const COMPUTE_METADATA: &str = "computeMetadata";

/// Names of every builtin computation.
pub fn all_tokens() -> &'static [&'static str] {
    &[COMPUTE_TIME, COMPUTE_VALUE, COMPUTE_METADATA]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinComputation {
    Time,
    Value,
    Metadata,
}

impl BuiltinComputation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            COMPUTE_TIME => Some(BuiltinComputation::Time),
            COMPUTE_VALUE => Some(BuiltinComputation::Value),
            COMPUTE_METADATA => Some(BuiltinComputation::Metadata),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinComputation::Time => COMPUTE_TIME,
            BuiltinComputation::Value => COMPUTE_VALUE,
            BuiltinComputation::Metadata => COMPUTE_METADATA,
        }
    }

    /// The result type on `provider`, or `None` if the provider cannot
    /// supply this computation.
    pub fn result_type(
        &self,
        provider: &SceneObject,
        disambiguating_id: Option<&str>,
        journal: Option<&mut Journal>,
    ) -> Option<ValueType> {
        match self {
            BuiltinComputation::Time => Some(ValueType::Time),
            BuiltinComputation::Value => Some(provider.as_attribute()?.value_type(journal)),
            BuiltinComputation::Metadata => {
                provider.metadata_value_type(disambiguating_id?, journal)
            }
        }
    }

    pub(crate) fn compile_node(
        &self,
        provider: &SceneObject,
        key: &ValueKey,
        journal: &mut Journal,
        program: &Program,
    ) -> Option<NodeId> {
        match self {
            BuiltinComputation::Time => compile_time(provider, key, program),
            BuiltinComputation::Value => compile_value(provider, key, journal, program),
            BuiltinComputation::Metadata => compile_metadata(provider, key, journal, program),
        }
    }
}

fn unsupported(key: &ValueKey, reason: &str) {
    report(ExecError::UnsupportedProvider {
        provider: key.provider().clone(),
        computation: key.computation().to_string(),
        reason: reason.to_string(),
    });
}

fn compile_time(provider: &SceneObject, key: &ValueKey, program: &Program) -> Option<NodeId> {
    if !provider.path().is_absolute_root() {
        unsupported(key, "time is provided by the stage pseudo-root");
        return None;
    }
    let spec = NodeSpec::callback(
        COMPUTE_TIME,
        Arc::new(|ctx: &mut Context<'_>| {
            let time = ctx.time();
            ctx.set_output(Value::Time(time));
        }),
    )
    .with_output(OutputSpec::new("out", ValueType::Time));
    Some(program.create_node(spec, Some(key.clone()), NodeRole::Time, Arc::from([])))
}

fn compile_value(
    provider: &SceneObject,
    key: &ValueKey,
    journal: &mut Journal,
    program: &Program,
) -> Option<NodeId> {
    let Some(attribute) = provider.as_attribute() else {
        unsupported(key, "values are provided by attributes");
        return None;
    };
    let value_type = attribute.value_type(Some(journal));
    let name = key.provider().to_string();

    if !attribute.is_time_varying(Some(journal)) {
        let value = attribute.get(Time::default_time(), Some(journal));
        let spec = NodeSpec::constant(name, value, value_type);
        return Some(program.create_node(spec, Some(key.clone()), NodeRole::Constant, Arc::from([])));
    }

    let source = attribute.clone();
    let spec = NodeSpec::callback(
        name,
        Arc::new(move |ctx: &mut Context<'_>| {
            let value = source.get(ctx.time(), None);
            ctx.set_output(value);
        }),
    )
    .with_output(OutputSpec::new("out", value_type));
    let role = NodeRole::AttributeInput(attribute.clone());
    Some(program.create_node(spec, Some(key.clone()), role, Arc::from([])))
}

fn compile_metadata(
    provider: &SceneObject,
    key: &ValueKey,
    journal: &mut Journal,
    program: &Program,
) -> Option<NodeId> {
    let Some(field) = key.disambiguating_id() else {
        report(ExecError::InvalidValueKey(format!(
            "{key} names no metadata field"
        )));
        return None;
    };
    if !provider.is_valid_metadata_key(field, Some(journal)) {
        report(ExecError::InvalidMetadataKey {
            provider: key.provider().clone(),
            key: field.to_string(),
        });
        return None;
    }
    let Some(value_type) = provider.metadata_value_type(field, Some(journal)) else {
        report(ExecError::UnknownResultType {
            provider: key.provider().clone(),
            computation: key.computation().to_string(),
        });
        return None;
    };
    journal.add(key.provider().clone(), EditReasons::CHANGED_METADATA);

    let object = provider.clone();
    let field: Arc<str> = Arc::from(field);
    let spec = NodeSpec::callback(
        key.to_string(),
        Arc::new(move |ctx: &mut Context<'_>| {
            let value = object.metadata(&field, None);
            ctx.set_output(value);
        }),
    )
    .with_output(OutputSpec::new("out", value_type));
    Some(program.create_node(spec, Some(key.clone()), NodeRole::MetadataInput, Arc::from([])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esf::{MemoryStage, ScenePath, StageInterface};
    use crate::vdf::NodeKind;

    fn p(s: &str) -> ScenePath {
        ScenePath::new(s).unwrap()
    }

    fn stage() -> MemoryStage {
        let stage = MemoryStage::new();
        stage.define_prim("/A", "Xform").unwrap();
        stage.create_attribute("/A.radius", ValueType::Double, 2.0).unwrap();
        stage.create_attribute("/A.height", ValueType::Double, 1.0).unwrap();
        stage.set_time_sample("/A.height", 1.0, 4.0).unwrap();
        stage.set_time_sample("/A.height", 10.0, 8.0).unwrap();
        stage
    }

    fn compile(stage: &MemoryStage, key: &ValueKey, program: &Program) -> Option<NodeId> {
        let mut journal = Journal::new();
        let object = stage.object_at_path(key.provider(), Some(&mut journal))?;
        let builtin = BuiltinComputation::from_name(key.computation())?;
        builtin.compile_node(&object, key, &mut journal, program)
    }

    #[test]
    fn static_attributes_become_constants() {
        let stage = stage();
        let program = Program::new();
        let node = compile(&stage, &ValueKey::attribute_value(p("/A.radius")), &program).unwrap();
        let network = program.network();
        assert!(matches!(
            network.node(node).unwrap().kind(),
            NodeKind::Constant(Value::Double(r)) if *r == 2.0
        ));
    }

    #[test]
    fn varying_attributes_read_at_evaluation_time() {
        let stage = stage();
        let program = Program::new();
        let node = compile(&stage, &ValueKey::attribute_value(p("/A.height")), &program).unwrap();
        assert_eq!(program.role_name(node), "attribute");
        assert_eq!(program.time_dependent_nodes(Time::new(0.0), Time::new(12.0)), vec![node]);
        assert!(program.time_dependent_nodes(Time::new(0.0), Time::new(2.0)).is_empty());
    }

    #[test]
    fn time_requires_the_pseudo_root() {
        let stage = stage();
        let program = Program::new();
        assert!(compile(&stage, &ValueKey::time(), &program).is_some());
        assert!(compile(&stage, &ValueKey::new(p("/A"), COMPUTE_TIME), &program).is_none());
    }

    #[test]
    fn metadata_checks_the_field() {
        let stage = stage();
        let program = Program::new();
        assert!(compile(&stage, &ValueKey::metadata(p("/A"), "hidden"), &program).is_some());
        assert!(compile(&stage, &ValueKey::metadata(p("/A"), "bogus"), &program).is_none());
    }

    #[test]
    fn result_types_come_from_the_provider() {
        let stage = stage();
        let attr = stage.object_at_path(&p("/A.radius"), None).unwrap();
        let prim = stage.object_at_path(&p("/A"), None).unwrap();
        assert_eq!(
            BuiltinComputation::Value.result_type(&attr, None, None),
            Some(ValueType::Double)
        );
        assert_eq!(BuiltinComputation::Value.result_type(&prim, None, None), None);
        assert_eq!(
            BuiltinComputation::Metadata.result_type(&prim, Some("hidden"), None),
            Some(ValueType::Bool)
        );
        assert_eq!(all_tokens().len(), 3);
    }
}
