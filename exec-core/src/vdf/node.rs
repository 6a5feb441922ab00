//! Network Nodes
//!
//! This module defines the nodes that live in a [`Network`](super::Network),
//! their connectors, and the ids used to address them.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use super::context::Context;
use super::mask::Mask;
use crate::value::{Value, ValueType};

/// Identifier of a node within one network.
///
/// Ids are handed out in creation order and never reused, so ordering by id
/// is ordering by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position of the node in its network's node table.
    pub fn index(&self) -> usize {
        self.0 as usize
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// An output connector, addressed by node and connector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId {
    pub node: NodeId,
    pub index: u16,
}

impl OutputId {
    pub fn new(node: NodeId, index: u16) -> Self {
        Self { node, index }
    }
}

/// An input connector, addressed by node and connector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InputId {
    pub node: NodeId,
    pub index: u16,
}

impl InputId {
    pub fn new(node: NodeId, index: u16) -> Self {
        Self { node, index }
    }
}

/// An output together with the elements of interest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MaskedOutput {
    pub output: OutputId,
    pub mask: Mask,
}

impl MaskedOutput {
    pub fn new(output: OutputId, mask: Mask) -> Self {
        Self { output, mask }
    }

    pub fn node(&self) -> NodeId {
        self.output.node
    }
}

/// Callback computing a node's outputs from its inputs.
pub type ComputeFn = Arc<dyn Fn(&mut Context<'_>) + Send + Sync>;

/// What a node does when it runs.
#[derive(Clone)]
pub enum NodeKind {
    /// Produces a fixed value on its single output.
    Constant(Value),

    /// Runs a callback.
    Callback(ComputeFn),

    /// Breaks a cycle. The single output carries an estimate of the single
    /// `source` input, refined by the speculation executor until the two
    /// agree.
    Speculation,
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            NodeKind::Callback(_) => f.write_str("Callback"),
            NodeKind::Speculation => f.write_str("Speculation"),
        }
    }
}

/// Declared shape of an input connector.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub name: Arc<str>,
    pub value_type: ValueType,
    /// Optional inputs may be left unconnected or produce no value.
    pub optional: bool,
}

impl InputSpec {
    pub fn new(name: &str, value_type: ValueType) -> Self {
        Self {
            name: Arc::from(name),
            value_type,
            optional: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }
}

/// Declared shape of an output connector.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    pub name: Arc<str>,
    pub value_type: ValueType,
    /// Number of elements the output produces.
    pub size: usize,
}

impl OutputSpec {
    pub fn new(name: &str, value_type: ValueType) -> Self {
        Self {
            name: Arc::from(name),
            value_type,
            size: 1,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }
}

/// Everything needed to create a node.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: String,
    pub kind: NodeKind,
    pub inputs: SmallVec<[InputSpec; 4]>,
    pub outputs: SmallVec<[OutputSpec; 1]>,
}

impl NodeSpec {
    /// A callback node with no connectors yet.
    pub fn callback(name: impl Into<String>, compute: ComputeFn) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Callback(compute),
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
        }
    }

    /// A constant node with a single `out` output.
    pub fn constant(name: impl Into<String>, value: Value, value_type: ValueType) -> Self {
        let mut outputs = SmallVec::new();
        outputs.push(OutputSpec::new("out", value_type));
        Self {
            name: name.into(),
            kind: NodeKind::Constant(value),
            inputs: SmallVec::new(),
            outputs,
        }
    }

    /// A speculation node with a `source` input and a `value` output.
    pub fn speculation(name: impl Into<String>, value_type: ValueType, size: usize) -> Self {
        let mut inputs = SmallVec::new();
        inputs.push(InputSpec::new(SPECULATION_SOURCE, value_type));
        let mut outputs = SmallVec::new();
        outputs.push(OutputSpec::new(SPECULATION_VALUE, value_type).with_size(size));
        Self {
            name: name.into(),
            kind: NodeKind::Speculation,
            inputs,
            outputs,
        }
    }

    pub fn with_input(mut self, input: InputSpec) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_output(mut self, output: OutputSpec) -> Self {
        self.outputs.push(output);
        self
    }
}

pub const SPECULATION_SOURCE: &str = "source";
pub const SPECULATION_VALUE: &str = "value";

/// Identifier of a connection within one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u32);

/// A live input connector.
#[derive(Debug, Clone)]
pub struct Input {
    pub(crate) spec: InputSpec,
    pub(crate) connections: SmallVec<[ConnectionId; 2]>,
}

impl Input {
    pub fn spec(&self) -> &InputSpec {
        &self.spec
    }

    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }
}

/// A live output connector.
#[derive(Debug, Clone)]
pub struct Output {
    pub(crate) spec: OutputSpec,
    pub(crate) connections: SmallVec<[ConnectionId; 4]>,
}

impl Output {
    pub fn spec(&self) -> &OutputSpec {
        &self.spec
    }

    pub fn connections(&self) -> &[ConnectionId] {
        &self.connections
    }
}

/// Lifecycle of a node slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Connected into the network and schedulable.
    Live,
    /// Detached from the network, awaiting removal.
    Isolated,
    /// Removed. The id is never reused.
    Freed,
}

/// A node in the network.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    name: String,
    kind: NodeKind,
    pub(crate) inputs: SmallVec<[Input; 4]>,
    pub(crate) outputs: SmallVec<[Output; 1]>,
}

impl Node {
    pub(crate) fn new(id: NodeId, spec: NodeSpec) -> Self {
        Self {
            id,
            name: spec.name,
            kind: spec.kind,
            inputs: spec
                .inputs
                .into_iter()
                .map(|spec| Input {
                    spec,
                    connections: SmallVec::new(),
                })
                .collect(),
            outputs: spec
                .outputs
                .into_iter()
                .map(|spec| Output {
                    spec,
                    connections: SmallVec::new(),
                })
                .collect(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_speculation(&self) -> bool {
        matches!(self.kind, NodeKind::Speculation)
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn input_index(&self, name: &str) -> Option<u16> {
        self.inputs
            .iter()
            .position(|i| &*i.spec.name == name)
            .map(|i| i as u16)
    }

    pub fn output_index(&self, name: &str) -> Option<u16> {
        self.outputs
            .iter()
            .position(|o| &*o.spec.name == name)
            .map(|i| i as u16)
    }

    pub fn input(&self, index: u16) -> Option<&Input> {
        self.inputs.get(index as usize)
    }

    pub fn output(&self, index: u16) -> Option<&Output> {
        self.outputs.get(index as usize)
    }
}
