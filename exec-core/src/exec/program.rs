//! Program
//!
//! The compiled state of a system: the network, a record of how each node
//! was compiled, and the table mapping value keys to the outputs that
//! compute them.
//!
//! # Locking
//!
//! Compilation tasks create nodes concurrently, so every table sits behind
//! its own lock. Locks are always taken in the order network, records,
//! compiled outputs, recompilation set.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

use super::input_key::InputKey;
use super::value_key::ValueKey;
use crate::esf::{Attribute, AttributeInterface, EditReasons, Journal, SceneEdit};
use crate::value::{Time, ValueType};
use crate::vdf::{DataManager, InputId, Mask, MaskedOutput, Network, NodeId, NodeSpec, OutputId};

/// What a compiled node stands for.
#[derive(Clone)]
pub(crate) enum NodeRole {
    /// The value of an attribute that does not vary over time, baked in.
    Constant,
    /// Reads an attribute at the evaluation time.
    AttributeInput(Attribute),
    /// Produces the evaluation time.
    Time,
    MetadataInput,
    Plugin,
    Speculation,
}

impl NodeRole {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            NodeRole::Constant => "constant",
            NodeRole::AttributeInput(_) => "attribute",
            NodeRole::Time => "time",
            NodeRole::MetadataInput => "metadata",
            NodeRole::Plugin => "plugin",
            NodeRole::Speculation => "speculation",
        }
    }

    /// Whether an edit matching `reasons` requires the node to be rebuilt
    /// rather than recomputed. Constants bake their value in, so any
    /// change to it is structural for them.
    pub(crate) fn recompiles_on(&self, reasons: EditReasons) -> bool {
        reasons.is_structural() || matches!(self, NodeRole::Constant)
    }
}

pub(crate) struct NodeRecord {
    pub(crate) key: Option<ValueKey>,
    pub(crate) role: NodeRole,
    pub(crate) journal: Journal,
    pub(crate) input_keys: Arc<[InputKey]>,
}

/// A connection to make once the compilation round finishes.
#[derive(Debug, Clone)]
pub(crate) struct PendingConnection {
    pub(crate) source: MaskedOutput,
    pub(crate) target: InputId,
}

/// Nodes affected by a batch of scene edits.
#[derive(Debug, Default)]
pub(crate) struct EditMatches {
    /// Nodes whose cached values are stale.
    pub(crate) value: Vec<NodeId>,
    /// Nodes that must be uncompiled.
    pub(crate) structural: Vec<NodeId>,
}

#[derive(Default)]
pub struct Program {
    network: RwLock<Network>,
    records: RwLock<HashMap<NodeId, NodeRecord>>,
    compiled: DashMap<ValueKey, MaskedOutput>,
    recompile_inputs: Mutex<IndexSet<InputId>>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared access to the network.
    pub fn network(&self) -> RwLockReadGuard<'_, Network> {
        self.network.read()
    }

    /// Exclusive access to the network. Waits for running executions to
    /// finish.
    pub(crate) fn network_exclusive(&self) -> RwLockWriteGuard<'_, Network> {
        self.network.write()
    }

    pub fn node_count(&self) -> usize {
        self.network.read().node_count()
    }

    /// The output computing `key`, if it is compiled and live.
    pub fn compiled_output(&self, key: &ValueKey) -> Option<MaskedOutput> {
        let output = self.compiled.get(key)?.clone();
        self.network.read().is_live(output.node()).then_some(output)
    }

    pub fn compiled_count(&self) -> usize {
        self.compiled.len()
    }

    pub(crate) fn create_node(
        &self,
        spec: NodeSpec,
        key: Option<ValueKey>,
        role: NodeRole,
        input_keys: Arc<[InputKey]>,
    ) -> NodeId {
        let mut network = self.network.write();
        let id = network.create_node(spec);
        trace!(node = %id, role = role.name(), "created node");
        self.records.write().insert(
            id,
            NodeRecord {
                key,
                role,
                journal: Journal::new(),
                input_keys,
            },
        );
        id
    }

    pub(crate) fn create_speculation_node(&self, value_type: ValueType, size: usize) -> NodeId {
        self.create_node(
            NodeSpec::speculation("speculation", value_type, size),
            None,
            NodeRole::Speculation,
            Arc::from([]),
        )
    }

    pub(crate) fn merge_journal(&self, node: NodeId, journal: &Journal) {
        if let Some(record) = self.records.write().get_mut(&node) {
            record.journal.merge(journal);
        }
    }

    pub(crate) fn publish(&self, key: ValueKey, output: MaskedOutput) {
        self.compiled.insert(key, output);
    }

    pub(crate) fn with_record<R>(&self, node: NodeId, f: impl FnOnce(&NodeRecord) -> R) -> Option<R> {
        self.records.read().get(&node).map(f)
    }

    pub(crate) fn input_index(&self, node: NodeId, name: &str) -> Option<u16> {
        self.network.read().node(node)?.input_index(name)
    }

    pub(crate) fn input_name(&self, input: InputId) -> Option<Arc<str>> {
        let network = self.network.read();
        let name = network.node(input.node)?.input(input.index)?.spec().name.clone();
        Some(name)
    }

    pub(crate) fn value_type_of(&self, output: OutputId) -> Option<(ValueType, usize)> {
        let network = self.network.read();
        let spec = network.node(output.node)?.output(output.index)?.spec().clone();
        Some((spec.value_type, spec.size))
    }

    /// Make `pending` connections. Connections that already exist, or whose
    /// endpoints are gone, are skipped. Returns how many were made.
    pub(crate) fn apply_connections(&self, mut pending: Vec<PendingConnection>) -> usize {
        pending.sort_by_key(|p| (p.target, p.source.output));
        pending.dedup_by_key(|p| (p.target, p.source.output));

        let mut network = self.network.write();
        let mut made = 0;
        for p in pending {
            if !network.is_live(p.target.node) || !network.is_live(p.source.node()) {
                continue;
            }
            let exists = network
                .input_connections(p.target)
                .any(|c| c.source == p.source.output);
            if exists {
                continue;
            }
            if network.connect(p.source.output, p.target, p.source.mask).is_some() {
                made += 1;
            }
        }
        made
    }

    /// Replace the connection `source -> target` with a path through a new
    /// speculation node.
    pub(crate) fn splice_speculation(&self, source: OutputId, target: InputId) -> Option<NodeId> {
        let (value_type, size) = self.value_type_of(source)?;
        let (id, mask) = self
            .network
            .read()
            .input_connections(target)
            .find(|c| c.source == source)
            .map(|c| (c.id, c.mask.clone()))?;
        let speculation = self.create_speculation_node(value_type, size);
        let mut network = self.network.write();
        network.disconnect(id);
        network.connect(source, InputId::new(speculation, 0), Mask::all_ones(size));
        network.connect(OutputId::new(speculation, 0), target, mask);
        Some(speculation)
    }

    pub(crate) fn mark_inputs_for_recompilation(&self, inputs: impl IntoIterator<Item = InputId>) {
        self.recompile_inputs.lock().extend(inputs);
    }

    pub(crate) fn take_inputs_requiring_recompilation(&self) -> Vec<InputId> {
        let network = self.network.read();
        let mut inputs = self.recompile_inputs.lock();
        let taken: Vec<InputId> = inputs.drain(..).filter(|i| network.is_live(i.node)).collect();
        taken
    }

    pub fn inputs_requiring_recompilation(&self) -> usize {
        self.recompile_inputs.lock().len()
    }

    /// Classify every node whose journal matches one of `edits`.
    pub(crate) fn match_edits(&self, edits: &[SceneEdit]) -> EditMatches {
        let records = self.records.read();
        let mut matches = EditMatches::default();
        for (&id, record) in records.iter() {
            let mut reasons = EditReasons::NONE;
            for edit in edits {
                reasons |= record.journal.matches(edit);
            }
            if reasons.is_empty() {
                continue;
            }
            if record.role.recompiles_on(reasons) {
                matches.structural.push(id);
            } else {
                matches.value.push(id);
            }
        }
        matches.value.sort_unstable();
        matches.structural.sort_unstable();
        matches
    }

    /// Nodes whose value may differ between `from` and `to`.
    pub(crate) fn time_dependent_nodes(&self, from: Time, to: Time) -> Vec<NodeId> {
        let records = self.records.read();
        let mut nodes: Vec<NodeId> = records
            .iter()
            .filter(|(_, record)| match &record.role {
                NodeRole::Time => from != to,
                NodeRole::AttributeInput(attribute) => attribute.value_changes_between(from, to),
                _ => false,
            })
            .map(|(id, _)| *id)
            .collect();
        nodes.sort_unstable();
        nodes
    }

    /// Remove `frontier` and the upstream nodes feeding only it.
    ///
    /// Cached data of every removed node is purged from `data` before the
    /// node is freed. Inputs outside the removed region that lost a
    /// connection are marked for recompilation. A speculation node that
    /// loses its source is removed along with the region.
    pub(crate) fn uncompile(
        &self,
        frontier: Vec<NodeId>,
        protected: &HashSet<NodeId>,
        data: &dyn DataManager,
    ) -> Vec<NodeId> {
        let mut network = self.network.write();
        let mut frontier = frontier;
        let mut removed = Vec::new();
        let mut severed = Vec::new();
        while !frontier.is_empty() {
            let subnetwork =
                network.create_isolated_subnetwork(frontier.drain(..), |id| protected.contains(&id));
            for &input in subnetwork.severed_inputs() {
                if network.node(input.node).is_some_and(|n| n.is_speculation()) {
                    frontier.push(input.node);
                } else {
                    severed.push(input);
                }
            }
            for &id in subnetwork.nodes() {
                data.clear_node(id);
            }
            removed.extend_from_slice(subnetwork.nodes());
            network.free_isolated_subnetwork(subnetwork);
        }
        severed.retain(|input| network.is_live(input.node));

        let mut records = self.records.write();
        for id in &removed {
            if let Some(key) = records.remove(id).and_then(|r| r.key) {
                self.compiled.remove_if(&key, |_, output| output.node() == *id);
            }
        }
        drop(records);

        let mut inputs = self.recompile_inputs.lock();
        inputs.retain(|input| network.is_live(input.node));
        inputs.extend(severed);
        if !removed.is_empty() {
            debug!(removed = removed.len(), recompile = inputs.len(), "uncompiled nodes");
        }
        removed
    }

    /// Remove every node that no root reaches.
    pub(crate) fn uncompile_unreachable(&self, roots: &[NodeId], data: &dyn DataManager) -> usize {
        let unreachable: Vec<NodeId> = {
            let network = self.network.read();
            let reachable = network.upstream_closure(roots.iter().copied());
            network
                .nodes()
                .map(|n| n.id())
                .filter(|id| !reachable.contains(id))
                .collect()
        };
        if unreachable.is_empty() {
            return 0;
        }
        self.uncompile(unreachable, &HashSet::new(), data).len()
    }

    /// Drop everything, as if freshly constructed.
    pub(crate) fn reset(&self) {
        self.network.write().clear();
        self.records.write().clear();
        self.compiled.clear();
        self.recompile_inputs.lock().clear();
    }

    pub(crate) fn role_name(&self, node: NodeId) -> &'static str {
        self.with_record(node, |r| r.role.name()).unwrap_or("unknown")
    }

    pub(crate) fn key_of(&self, node: NodeId) -> Option<ValueKey> {
        self.with_record(node, |r| r.key.clone()).flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esf::ScenePath;
    use crate::value::Value;
    use crate::vdf::VectorDataManager;

    fn constant(program: &Program, key: &str) -> NodeId {
        let key = ValueKey::attribute_value(ScenePath::new(key).unwrap());
        let id = program.create_node(
            NodeSpec::constant("c", Value::Double(1.0), ValueType::Double),
            Some(key.clone()),
            NodeRole::Constant,
            Arc::from([]),
        );
        program.publish(key, MaskedOutput::new(OutputId::new(id, 0), Mask::all_ones(1)));
        id
    }

    fn sink(program: &Program) -> NodeId {
        use crate::vdf::{Context, InputSpec, OutputSpec};
        program.create_node(
            NodeSpec::callback("sink", Arc::new(|_: &mut Context<'_>| {}))
                .with_input(InputSpec::new("in", ValueType::Double))
                .with_output(OutputSpec::new("out", ValueType::Double)),
            None,
            NodeRole::Plugin,
            Arc::from([]),
        )
    }

    fn pending(source: NodeId, target: NodeId) -> PendingConnection {
        PendingConnection {
            source: MaskedOutput::new(OutputId::new(source, 0), Mask::all_ones(1)),
            target: InputId::new(target, 0),
        }
    }

    #[test]
    fn apply_connections_is_idempotent() {
        let program = Program::new();
        let a = constant(&program, "/A.x");
        let s = sink(&program);
        assert_eq!(program.apply_connections(vec![pending(a, s), pending(a, s)]), 1);
        assert_eq!(program.apply_connections(vec![pending(a, s)]), 0);
        assert_eq!(program.network().connection_count(), 1);
    }

    #[test]
    fn uncompile_marks_severed_inputs() {
        let program = Program::new();
        let a = constant(&program, "/A.x");
        let s = sink(&program);
        program.apply_connections(vec![pending(a, s)]);
        let removed = program.uncompile(vec![a], &HashSet::new(), &VectorDataManager::new());
        assert_eq!(removed, vec![a]);
        assert!(program
            .compiled_output(&ValueKey::attribute_value(ScenePath::new("/A.x").unwrap()))
            .is_none());
        assert_eq!(program.take_inputs_requiring_recompilation(), vec![InputId::new(s, 0)]);
    }

    #[test]
    fn uncompile_unreachable_keeps_roots() {
        let program = Program::new();
        let a = constant(&program, "/A.x");
        let b = constant(&program, "/B.x");
        let s = sink(&program);
        program.apply_connections(vec![pending(a, s)]);
        let removed = program.uncompile_unreachable(&[s], &VectorDataManager::new());
        assert_eq!(removed, 1);
        let network = program.network();
        assert!(network.is_live(a) && network.is_live(s));
        assert!(!network.is_live(b));
    }

    #[test]
    fn splice_breaks_a_direct_connection() {
        let program = Program::new();
        let a = constant(&program, "/A.x");
        let s = sink(&program);
        program.apply_connections(vec![pending(a, s)]);
        let spec = program.splice_speculation(OutputId::new(a, 0), InputId::new(s, 0)).unwrap();
        let network = program.network();
        assert_eq!(network.upstream_nodes(s).as_slice(), &[spec]);
        assert_eq!(network.upstream_nodes(spec).as_slice(), &[a]);
    }

    #[test]
    fn constants_recompile_on_value_edits() {
        assert!(NodeRole::Constant.recompiles_on(EditReasons::CHANGED_PROPERTY_VALUE));
        assert!(!NodeRole::Plugin.recompiles_on(EditReasons::CHANGED_PROPERTY_VALUE));
        assert!(NodeRole::Plugin.recompiles_on(EditReasons::RESYNCED_OBJECT));
    }
}
