//! Computation definitions
//!
//! A [`ComputationDefinition`] knows, for a provider object, what a
//! computation produces, which inputs it consumes, and how to compile it
//! into a node. Builtins derive all of this from the scene; plugins carry a
//! fixed result type, a static input list and a callback.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use super::builtins::BuiltinComputation;
use super::input_key::InputKey;
use super::program::{NodeRole, Program};
use super::value_key::ValueKey;
use crate::error::{report, ExecError};
use crate::esf::{Journal, SceneObject};
use crate::value::ValueType;
use crate::vdf::{ComputeFn, InputSpec, NodeId, NodeSpec, OutputSpec};

/// A computation registered by client code.
pub struct PluginComputation {
    name: Arc<str>,
    result_type: ValueType,
    inputs: Arc<[InputKey]>,
    callback: ComputeFn,
}

impl PluginComputation {
    pub fn new(name: &str, result_type: ValueType, inputs: Vec<InputKey>, callback: ComputeFn) -> Self {
        Self {
            name: Arc::from(name),
            result_type,
            inputs: inputs.into(),
            callback,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn result_type(&self) -> ValueType {
        self.result_type
    }

    pub fn inputs(&self) -> &[InputKey] {
        &self.inputs
    }

    /// One input connector per distinct input name. A connector is
    /// required when any key feeding it is.
    fn node_spec(&self, name: String) -> NodeSpec {
        let mut connectors: IndexMap<&str, InputSpec> = IndexMap::new();
        for key in self.inputs.iter() {
            let spec = connectors
                .entry(&*key.input_name)
                .or_insert_with(|| InputSpec::new(&key.input_name, key.result_type));
            if !key.optional {
                spec.optional = false;
            }
        }
        connectors
            .into_values()
            .fold(NodeSpec::callback(name, self.callback.clone()), NodeSpec::with_input)
            .with_output(OutputSpec::new("out", self.result_type))
    }
}

impl fmt::Debug for PluginComputation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginComputation")
            .field("name", &self.name)
            .field("result_type", &self.result_type)
            .field("inputs", &self.inputs.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum ComputationDefinition {
    Builtin(BuiltinComputation),
    Plugin(Arc<PluginComputation>),
}

impl ComputationDefinition {
    pub fn name(&self) -> &str {
        match self {
            ComputationDefinition::Builtin(builtin) => builtin.name(),
            ComputationDefinition::Plugin(plugin) => plugin.name(),
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, ComputationDefinition::Builtin(_))
    }

    /// What the computation produces on `provider`.
    pub fn result_type(
        &self,
        provider: &SceneObject,
        disambiguating_id: Option<&str>,
        journal: Option<&mut Journal>,
    ) -> Option<ValueType> {
        match self {
            ComputationDefinition::Builtin(builtin) => {
                builtin.result_type(provider, disambiguating_id, journal)
            }
            ComputationDefinition::Plugin(plugin) => Some(plugin.result_type),
        }
    }

    /// The inputs the computation consumes on `provider`. Builtins read
    /// the scene directly and consume none.
    pub fn input_keys(&self, _provider: &SceneObject, _journal: Option<&mut Journal>) -> Arc<[InputKey]> {
        match self {
            ComputationDefinition::Builtin(_) => Arc::from([]),
            ComputationDefinition::Plugin(plugin) => plugin.inputs.clone(),
        }
    }

    /// Create the node computing `key` on `provider`.
    ///
    /// Both the journal and the program are required; a missing one is a
    /// coding error and yields `None`.
    pub(crate) fn compile_node(
        &self,
        provider: &SceneObject,
        key: &ValueKey,
        journal: Option<&mut Journal>,
        program: Option<&Program>,
    ) -> Option<NodeId> {
        let Some(journal) = journal else {
            report(ExecError::NullJournal("compile_node"));
            return None;
        };
        let Some(program) = program else {
            report(ExecError::NullProgram("compile_node"));
            return None;
        };
        match self {
            ComputationDefinition::Builtin(builtin) => {
                builtin.compile_node(provider, key, journal, program)
            }
            ComputationDefinition::Plugin(plugin) => {
                let spec = plugin.node_spec(key.to_string());
                Some(program.create_node(spec, Some(key.clone()), NodeRole::Plugin, plugin.inputs.clone()))
            }
        }
    }
}
