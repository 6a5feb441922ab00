//! Network
//!
//! The [`Network`] owns every node and connection. It is plain data mutated
//! through `&mut self`; callers that share it across threads wrap it in a
//! lock, with one writer at a time.
//!
//! # Removal
//!
//! Nodes are never deleted in one step. A region is first *isolated*: every
//! connection touching it is severed and its nodes stop being schedulable.
//! The caller then purges any cached data for the region and finally frees
//! it. This two-step protocol lets executors drop their data for a node
//! before its id is retired.

use std::collections::{HashSet, VecDeque};

use smallvec::SmallVec;
use tracing::trace;

use super::mask::Mask;
use super::node::{ConnectionId, InputId, Node, NodeId, NodeSpec, NodeState, OutputId};
use crate::error::{report, ExecError};

/// A connection from an output to an input, restricted to `mask`.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: OutputId,
    pub target: InputId,
    pub mask: Mask,
}

/// A region detached from the network by
/// [`Network::create_isolated_subnetwork`].
#[derive(Debug, Default)]
pub struct IsolatedSubnetwork {
    nodes: Vec<NodeId>,
    severed_inputs: Vec<InputId>,
}

impl IsolatedSubnetwork {
    /// The isolated nodes, in id order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Inputs outside the region that lost a connection into it.
    pub fn severed_inputs(&self) -> &[InputId] {
        &self.severed_inputs
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Nodes and connections.
///
/// Node ids are never reused, so a stale id can never alias a new node.
/// The node table holds a slot for every id from `first` on; freed slots
/// at its head are dropped once they make up half the table, and
/// [`Network::clear`] drops them all. Freed slots between live nodes stay
/// until the nodes before them are freed too.
#[derive(Debug, Default)]
pub struct Network {
    /// Index of the id held in `nodes[0]`. Every id below it is freed.
    first: usize,
    nodes: Vec<Option<Node>>,
    states: Vec<NodeState>,
    connections: Vec<Option<Connection>>,
    free_connections: Vec<u32>,
    live_nodes: usize,
    live_connections: usize,
    version: u64,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Incremented on every topological change. Schedules remember the
    /// version they were built from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.live_nodes
    }

    pub fn connection_count(&self) -> usize {
        self.live_connections
    }

    /// One past the largest node index ever handed out.
    pub fn node_capacity(&self) -> usize {
        self.first + self.nodes.len()
    }

    /// Number of node slots held, freed ones included.
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    fn slot(&self, id: NodeId) -> Option<usize> {
        id.index().checked_sub(self.first)
    }

    pub fn create_node(&mut self, spec: NodeSpec) -> NodeId {
        let id = NodeId::from_index(self.node_capacity());
        trace!(node = %id, name = %spec.name, "creating node");
        self.nodes.push(Some(Node::new(id, spec)));
        self.states.push(NodeState::Live);
        self.live_nodes += 1;
        self.version += 1;
        id
    }

    /// Free every node and connection. Ids handed out before stay retired.
    pub fn clear(&mut self) {
        self.first = self.node_capacity();
        self.nodes.clear();
        self.states.clear();
        self.connections.clear();
        self.free_connections.clear();
        self.live_nodes = 0;
        self.live_connections = 0;
        self.version += 1;
    }

    pub fn state(&self, id: NodeId) -> NodeState {
        self.slot(id)
            .and_then(|slot| self.states.get(slot))
            .copied()
            .unwrap_or(NodeState::Freed)
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.state(id) == NodeState::Live
    }

    /// A live node.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        if !self.is_live(id) {
            return None;
        }
        self.nodes.get(self.slot(id)?)?.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slot(id)?;
        self.nodes.get_mut(slot)?.as_mut()
    }

    /// Live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> + '_ {
        self.nodes
            .iter()
            .zip(self.states.iter())
            .filter(|(_, state)| **state == NodeState::Live)
            .filter_map(|(node, _)| node.as_ref())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id.0 as usize)?.as_ref()
    }

    /// Live connections in id order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.connections.iter().filter_map(Option::as_ref)
    }

    /// The connections feeding `input`, in connection order.
    pub fn input_connections(&self, input: InputId) -> impl Iterator<Item = &Connection> + '_ {
        self.node(input.node)
            .and_then(|node| node.input(input.index))
            .into_iter()
            .flat_map(|i| i.connections.iter())
            .filter_map(|id| self.connection(*id))
    }

    /// The connections leaving `output`.
    pub fn output_connections(&self, output: OutputId) -> impl Iterator<Item = &Connection> + '_ {
        self.node(output.node)
            .and_then(|node| node.output(output.index))
            .into_iter()
            .flat_map(|o| o.connections.iter())
            .filter_map(|id| self.connection(*id))
    }

    /// Connect `source` to `target` over `mask`.
    ///
    /// Connecting dead nodes, unknown connectors, or mismatched types is a
    /// coding error: it is reported and `None` is returned.
    pub fn connect(&mut self, source: OutputId, target: InputId, mask: Mask) -> Option<ConnectionId> {
        if let Err(err) = self.validate_connection(source, target, &mask) {
            report(err);
            return None;
        }

        let connection_id = match self.free_connections.pop() {
            Some(slot) => ConnectionId(slot),
            None => {
                self.connections.push(None);
                ConnectionId((self.connections.len() - 1) as u32)
            }
        };
        self.connections[connection_id.0 as usize] = Some(Connection {
            id: connection_id,
            source,
            target,
            mask,
        });
        if let Some(node) = self.node_mut(source.node) {
            node.outputs[source.index as usize].connections.push(connection_id);
        }
        if let Some(node) = self.node_mut(target.node) {
            node.inputs[target.index as usize].connections.push(connection_id);
        }
        trace!(source = %source.node, target = %target.node, "connected");
        self.live_connections += 1;
        self.version += 1;
        Some(connection_id)
    }

    fn validate_connection(&self, source: OutputId, target: InputId, mask: &Mask) -> Result<(), ExecError> {
        let source_spec = self
            .node(source.node)
            .and_then(|n| n.output(source.index))
            .map(|o| o.spec.clone())
            .ok_or_else(|| ExecError::InvalidConnection(format!("no live output {:?}", source)))?;
        let target_spec = self
            .node(target.node)
            .and_then(|n| n.input(target.index))
            .map(|i| i.spec.clone())
            .ok_or_else(|| ExecError::InvalidConnection(format!("no live input {:?}", target)))?;

        if source_spec.value_type != target_spec.value_type {
            return Err(ExecError::TypeMismatch {
                context: format!(
                    "connection {}.{} -> {}.{}",
                    source.node, source_spec.name, target.node, target_spec.name
                ),
                expected: target_spec.value_type,
                found: source_spec.value_type,
            });
        }
        if mask.size() != source_spec.size {
            return Err(ExecError::InvalidConnection(format!(
                "mask of size {} on output of size {}",
                mask.size(),
                source_spec.size
            )));
        }
        Ok(())
    }

    /// Remove a connection. Returns `false` if it does not exist.
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        let Some(connection) = self
            .connections
            .get_mut(id.0 as usize)
            .and_then(Option::take)
        else {
            return false;
        };
        if let Some(node) = self.node_mut(connection.source.node) {
            node.outputs[connection.source.index as usize]
                .connections
                .retain(|c| *c != id);
        }
        if let Some(node) = self.node_mut(connection.target.node) {
            node.inputs[connection.target.index as usize]
                .connections
                .retain(|c| *c != id);
        }
        self.free_connections.push(id.0);
        self.live_connections -= 1;
        self.version += 1;
        true
    }

    /// Nodes feeding `id` through any input, without duplicates.
    pub fn upstream_nodes(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut out = SmallVec::<[NodeId; 4]>::new();
        if let Some(node) = self.node(id) {
            for input in node.inputs() {
                for c in input.connections() {
                    if let Some(conn) = self.connection(*c) {
                        if !out.contains(&conn.source.node) {
                            out.push(conn.source.node);
                        }
                    }
                }
            }
        }
        out
    }

    /// Nodes fed by `id` through any output, without duplicates.
    pub fn downstream_nodes(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut out = SmallVec::<[NodeId; 4]>::new();
        if let Some(node) = self.node(id) {
            for output in node.outputs() {
                for c in output.connections() {
                    if let Some(conn) = self.connection(*c) {
                        if !out.contains(&conn.target.node) {
                            out.push(conn.target.node);
                        }
                    }
                }
            }
        }
        out
    }

    /// Every node reachable downstream from `roots`, roots included, in
    /// breadth-first order.
    pub fn downstream_closure(&self, roots: impl IntoIterator<Item = NodeId>) -> Vec<NodeId> {
        let mut visited = HashSet::new();
        let mut queue: VecDeque<NodeId> = roots.into_iter().collect();
        let mut order = Vec::new();
        while let Some(id) = queue.pop_front() {
            if !self.is_live(id) || !visited.insert(id) {
                continue;
            }
            order.push(id);
            queue.extend(self.downstream_nodes(id));
        }
        order
    }

    /// Every node reachable upstream from `roots`, roots included.
    pub fn upstream_closure(&self, roots: impl IntoIterator<Item = NodeId>) -> HashSet<NodeId> {
        let mut visited = HashSet::new();
        let mut stack: Vec<NodeId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            if !self.is_live(id) || !visited.insert(id) {
                continue;
            }
            stack.extend(self.upstream_nodes(id));
        }
        visited
    }

    /// Detach `frontier` together with every upstream node that only feeds
    /// the detached region.
    ///
    /// Nodes for which `is_protected` returns true are never pulled in
    /// through the upstream walk, though they may still be named in the
    /// frontier. All connections touching the region are severed; the
    /// inputs outside it that lost a connection are reported so the caller
    /// can recompile them.
    pub fn create_isolated_subnetwork(
        &mut self,
        frontier: impl IntoIterator<Item = NodeId>,
        is_protected: impl Fn(NodeId) -> bool,
    ) -> IsolatedSubnetwork {
        let mut region: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        for id in frontier {
            if self.is_live(id) && region.insert(id) {
                queue.push_back(id);
            }
        }

        while let Some(id) = queue.pop_front() {
            for upstream in self.upstream_nodes(id) {
                if region.contains(&upstream) || is_protected(upstream) {
                    continue;
                }
                let feeds_only_region = self
                    .downstream_nodes(upstream)
                    .iter()
                    .all(|d| region.contains(d));
                if feeds_only_region {
                    region.insert(upstream);
                    queue.push_back(upstream);
                }
            }
        }

        let mut nodes: Vec<NodeId> = region.iter().copied().collect();
        nodes.sort_unstable();

        let mut severed_inputs = Vec::new();
        for &id in &nodes {
            let Some(node) = self.node(id) else { continue };
            let touching: Vec<ConnectionId> = node
                .inputs()
                .iter()
                .flat_map(|i| i.connections().iter().copied())
                .chain(node.outputs().iter().flat_map(|o| o.connections().iter().copied()))
                .collect();
            for c in touching {
                if let Some(conn) = self.connection(c) {
                    if !region.contains(&conn.target.node) && !severed_inputs.contains(&conn.target) {
                        severed_inputs.push(conn.target);
                    }
                }
                self.disconnect(c);
            }
        }
        for &id in &nodes {
            if let Some(slot) = self.slot(id) {
                self.states[slot] = NodeState::Isolated;
                self.live_nodes -= 1;
            }
        }
        if !nodes.is_empty() {
            self.version += 1;
            trace!(count = nodes.len(), "isolated subnetwork");
        }
        severed_inputs.sort_unstable();
        IsolatedSubnetwork {
            nodes,
            severed_inputs,
        }
    }

    /// Free the nodes of an isolated region. Returns how many were freed.
    pub fn free_isolated_subnetwork(&mut self, subnetwork: IsolatedSubnetwork) -> usize {
        let mut freed = 0;
        for id in subnetwork.nodes {
            if self.state(id) != NodeState::Isolated {
                continue;
            }
            if let Some(slot) = self.slot(id) {
                self.nodes[slot] = None;
                self.states[slot] = NodeState::Freed;
                freed += 1;
            }
        }
        self.compact_freed_head();
        freed
    }

    fn compact_freed_head(&mut self) {
        let head = self
            .states
            .iter()
            .take_while(|state| **state == NodeState::Freed)
            .count();
        if head == 0 || head * 2 < self.nodes.len() {
            return;
        }
        self.nodes.drain(..head);
        self.states.drain(..head);
        self.first += head;
        trace!(dropped = head, first = self.first, "compacted node table");
    }

    /// Name of the output connector, for diagnostics.
    pub fn output_name(&self, output: OutputId) -> Option<&str> {
        self.node(output.node)?
            .output(output.index)
            .map(|o| &*o.spec.name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::value::{Value, ValueType};
    use crate::vdf::node::{InputSpec, OutputSpec};
    use crate::vdf::Context;

    fn passthrough(net: &mut Network, name: &str) -> NodeId {
        net.create_node(
            NodeSpec::callback(name, Arc::new(|_ctx: &mut Context<'_>| {}))
                .with_input(InputSpec::new("in", ValueType::Double))
                .with_output(OutputSpec::new("out", ValueType::Double)),
        )
    }

    fn link(net: &mut Network, from: NodeId, to: NodeId) -> ConnectionId {
        net.connect(OutputId::new(from, 0), InputId::new(to, 0), Mask::all_ones(1))
            .unwrap()
    }

    #[test]
    fn connect_updates_both_ends() {
        let mut net = Network::new();
        let a = passthrough(&mut net, "a");
        let b = passthrough(&mut net, "b");
        let before = net.version();
        let c = link(&mut net, a, b);

        assert!(net.version() > before);
        assert_eq!(net.upstream_nodes(b).as_slice(), &[a]);
        assert_eq!(net.downstream_nodes(a).as_slice(), &[b]);
        assert_eq!(net.connection(c).unwrap().target, InputId::new(b, 0));
        assert_eq!(net.connection_count(), 1);
    }

    #[test]
    fn connect_rejects_type_mismatch() {
        let mut net = Network::new();
        let a = net.create_node(NodeSpec::constant("a", Value::Int(1), ValueType::Int));
        let b = passthrough(&mut net, "b");
        assert!(net
            .connect(OutputId::new(a, 0), InputId::new(b, 0), Mask::all_ones(1))
            .is_none());
        assert_eq!(net.connection_count(), 0);
    }

    #[test]
    fn disconnect_reuses_connection_slots() {
        let mut net = Network::new();
        let a = passthrough(&mut net, "a");
        let b = passthrough(&mut net, "b");
        let c = link(&mut net, a, b);
        assert!(net.disconnect(c));
        assert!(!net.disconnect(c));
        assert!(net.upstream_nodes(b).is_empty());
        let again = link(&mut net, a, b);
        assert_eq!(again, c);
    }

    #[test]
    fn isolation_takes_exclusive_upstream_only() {
        // shared -> x -> leaf
        // shared -> y
        // only   -> x
        let mut net = Network::new();
        let shared = passthrough(&mut net, "shared");
        let only = passthrough(&mut net, "only");
        let x = net.create_node(
            NodeSpec::callback("x", Arc::new(|_ctx: &mut Context<'_>| {}))
                .with_input(InputSpec::new("a", ValueType::Double))
                .with_input(InputSpec::new("b", ValueType::Double))
                .with_output(OutputSpec::new("out", ValueType::Double)),
        );
        let y = passthrough(&mut net, "y");
        let leaf = passthrough(&mut net, "leaf");
        net.connect(OutputId::new(shared, 0), InputId::new(x, 0), Mask::all_ones(1));
        net.connect(OutputId::new(only, 0), InputId::new(x, 1), Mask::all_ones(1));
        link(&mut net, shared, y);
        link(&mut net, x, leaf);

        let isolated = net.create_isolated_subnetwork([x], |_| false);
        assert_eq!(isolated.nodes(), &[only, x]);
        assert_eq!(isolated.severed_inputs(), &[InputId::new(leaf, 0)]);
        assert!(net.is_live(shared));
        assert_eq!(net.state(x), NodeState::Isolated);
        assert!(net.node(x).is_none());
        assert_eq!(net.downstream_nodes(shared).as_slice(), &[y]);

        let live_before = net.node_count();
        assert_eq!(net.free_isolated_subnetwork(isolated), 2);
        assert_eq!(net.state(only), NodeState::Freed);
        assert_eq!(net.node_count(), live_before);

        // Ids are never reused.
        let fresh = passthrough(&mut net, "fresh");
        assert!(fresh > leaf);
    }

    #[test]
    fn protected_nodes_are_not_pulled_in() {
        let mut net = Network::new();
        let a = passthrough(&mut net, "a");
        let b = passthrough(&mut net, "b");
        link(&mut net, a, b);
        let isolated = net.create_isolated_subnetwork([b], |id| id == a);
        assert_eq!(isolated.nodes(), &[b]);
        assert!(net.is_live(a));
    }

    #[test]
    fn closures() {
        let mut net = Network::new();
        let a = passthrough(&mut net, "a");
        let b = passthrough(&mut net, "b");
        let c = passthrough(&mut net, "c");
        link(&mut net, a, b);
        link(&mut net, b, c);
        assert_eq!(net.downstream_closure([a]), vec![a, b, c]);
        assert_eq!(net.upstream_closure([c]).len(), 3);
        assert_eq!(net.upstream_closure([a]).len(), 1);
    }

    #[test]
    fn clear_retires_every_id() {
        let mut net = Network::new();
        let a = passthrough(&mut net, "a");
        let b = passthrough(&mut net, "b");
        link(&mut net, a, b);
        let before = net.version();

        net.clear();
        assert!(net.version() > before);
        assert_eq!(net.node_count(), 0);
        assert_eq!(net.connection_count(), 0);
        assert!(!net.is_live(a));
        let c = passthrough(&mut net, "c");
        assert_ne!(c, a);
        assert_ne!(c, b);
        assert_eq!(net.slot_count(), 1);
        assert_eq!(net.node(c).map(|n| n.name()), Some("c"));
    }

    #[test]
    fn freed_head_is_compacted_without_reusing_ids() {
        let mut net = Network::new();
        let a = passthrough(&mut net, "a");
        let b = passthrough(&mut net, "b");
        let c = passthrough(&mut net, "c");
        link(&mut net, a, b);
        link(&mut net, b, c);

        let region = net.create_isolated_subnetwork([a, b], |_| false);
        assert_eq!(region.severed_inputs(), &[InputId::new(c, 0)]);
        assert_eq!(net.free_isolated_subnetwork(region), 2);
        assert_eq!(net.slot_count(), 1);
        assert_eq!(net.node_capacity(), 3);
        assert_eq!(net.state(a), NodeState::Freed);
        assert!(net.is_live(c));

        let d = passthrough(&mut net, "d");
        assert_eq!(d.index(), 3);
        link(&mut net, c, d);
        assert_eq!(net.upstream_nodes(d).as_slice(), &[c]);
        assert_eq!(net.nodes().map(|n| n.id()).collect::<Vec<_>>(), vec![c, d]);
    }
}
