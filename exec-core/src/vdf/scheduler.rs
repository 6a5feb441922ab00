//! Scheduler
//!
//! The scheduler turns a set of requested outputs into a [`Schedule`].
//!
//! # Algorithm
//!
//! 1. Walk upstream from every requested output. Each connection requests
//!    its own mask of the output it reads from, and the masks requested of
//!    one output by different consumers are unioned.
//! 2. Condense the visited subgraph into strongly connected components.
//!    Acyclic nodes become single-task units; every cycle becomes a
//!    [`CycleGroup`] evaluated by the speculation executor.
//! 3. Sort the units topologically. Ties are broken by the smallest node id
//!    in the unit, so the same network and request always yield the same
//!    order.
//! 4. Assign every unit a layer: one more than the deepest unit it depends
//!    on. Units within a layer are independent of each other.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::debug;

use super::mask::Mask;
use super::network::Network;
use super::node::{MaskedOutput, NodeId, OutputId};
use super::schedule::{CycleGroup, Schedule, ScheduleTask, ScheduleUnit};
use crate::error::{report, ExecError};

type OutputMasks = SmallVec<[(u16, Mask); 1]>;

/// Build the schedule computing `requested` over `network`.
///
/// Requested outputs on dead nodes are ignored.
pub fn schedule(network: &Network, requested: &[MaskedOutput]) -> Schedule {
    let masks = collect_requested_masks(network, requested);

    let mut nodes: Vec<NodeId> = masks.keys().copied().collect();
    nodes.sort_unstable();
    let local: HashMap<NodeId, usize> = nodes.iter().enumerate().map(|(i, n)| (*n, i)).collect();

    let mut succ: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (v, id) in nodes.iter().enumerate() {
        for upstream in network.upstream_nodes(*id) {
            if let Some(&u) = local.get(&upstream) {
                succ[u].push(v);
            }
        }
    }

    let components = strongly_connected_components(&succ);
    let mut component_of = vec![0usize; nodes.len()];
    for (c, members) in components.iter().enumerate() {
        for &m in members {
            component_of[m] = c;
        }
    }

    // Dependencies between components.
    let mut deps: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); components.len()];
    for (u, targets) in succ.iter().enumerate() {
        for &v in targets {
            let (cu, cv) = (component_of[u], component_of[v]);
            if cu != cv && !deps[cv].contains(&cu) {
                deps[cv].push(cu);
            }
        }
    }
    let mut dependents: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); components.len()];
    for (c, ds) in deps.iter().enumerate() {
        for &d in ds {
            dependents[d].push(c);
        }
    }

    // Kahn's algorithm over components, smallest node id first.
    let min_node = |c: usize| components[c].iter().map(|&m| nodes[m]).min();
    let mut in_degree: Vec<usize> = deps.iter().map(|d| d.len()).collect();
    let mut ready: BinaryHeap<Reverse<(Option<NodeId>, usize)>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(c, _)| Reverse((min_node(c), c)))
        .collect();
    let mut order = Vec::with_capacity(components.len());
    while let Some(Reverse((_, c))) = ready.pop() {
        order.push(c);
        for &d in &dependents[c] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.push(Reverse((min_node(d), d)));
            }
        }
    }
    debug_assert_eq!(order.len(), components.len(), "condensation must be acyclic");

    let mut unit_of_component = vec![0usize; components.len()];
    for (unit, &c) in order.iter().enumerate() {
        unit_of_component[c] = unit;
    }

    let mut result = Schedule {
        requested: requested
            .iter()
            .filter(|r| network.is_live(r.node()))
            .cloned()
            .collect(),
        version: network.version(),
        ..Schedule::default()
    };

    let push_task = |result: &mut Schedule, member: usize| -> usize {
        let node = nodes[member];
        let index = result.tasks.len();
        result.tasks.push(ScheduleTask {
            node,
            outputs: masks.get(&node).cloned().unwrap_or_default(),
        });
        result.task_index.insert(node, index);
        index
    };

    for &c in &order {
        let members = &components[c];
        let cyclic = members.len() > 1 || succ[members[0]].contains(&members[0]);
        let unit = if cyclic {
            let ordered = order_cycle(network, &nodes, members, &succ);
            let tasks: Vec<usize> = ordered.iter().map(|&m| push_task(&mut result, m)).collect();
            let speculation: SmallVec<[usize; 1]> = tasks
                .iter()
                .copied()
                .filter(|&t| {
                    network
                        .node(result.tasks[t].node)
                        .is_some_and(|n| n.is_speculation())
                })
                .collect();
            if speculation.is_empty() {
                report(ExecError::UnbrokenCycle(tasks.len()));
            }
            ScheduleUnit::Cycle(CycleGroup { tasks, speculation })
        } else {
            ScheduleUnit::Task(push_task(&mut result, members[0]))
        };
        result.units.push(unit);
    }

    result.unit_dependencies = order
        .iter()
        .map(|&c| deps[c].iter().map(|&d| unit_of_component[d]).collect())
        .collect();
    result.unit_dependents = order
        .iter()
        .map(|&c| dependents[c].iter().map(|&d| unit_of_component[d]).collect())
        .collect();

    let mut depth = vec![0usize; result.units.len()];
    for unit in 0..result.units.len() {
        depth[unit] = result.unit_dependencies[unit]
            .iter()
            .map(|&d| depth[d] + 1)
            .max()
            .unwrap_or(0);
    }
    let layer_count = depth.iter().max().map_or(0, |d| d + 1);
    result.layers = vec![Vec::new(); layer_count];
    for (unit, &d) in depth.iter().enumerate() {
        result.layers[d].push(unit);
    }

    debug!(
        tasks = result.tasks.len(),
        units = result.units.len(),
        layers = result.layers.len(),
        "built schedule"
    );
    result
}

/// Backward traversal unioning the masks requested of every output.
fn collect_requested_masks(
    network: &Network,
    requested: &[MaskedOutput],
) -> IndexMap<NodeId, OutputMasks> {
    fn add(masks: &mut IndexMap<NodeId, OutputMasks>, output: OutputId, mask: &Mask) {
        let entry = masks.entry(output.node).or_default();
        match entry.iter_mut().find(|(i, _)| *i == output.index) {
            Some((_, existing)) => *existing = existing.or(mask),
            None => entry.push((output.index, mask.clone())),
        }
    }

    let mut masks = IndexMap::new();
    let mut visited = HashSet::new();
    let mut stack = Vec::new();
    for r in requested {
        if network.node(r.node()).is_some() {
            add(&mut masks, r.output, &r.mask);
            stack.push(r.node());
        }
    }
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = network.node(id) else { continue };
        for input in node.inputs() {
            for c in input.connections() {
                if let Some(conn) = network.connection(*c) {
                    add(&mut masks, conn.source, &conn.mask);
                    stack.push(conn.source.node);
                }
            }
        }
    }
    masks
}

/// Order the members of a cycle, ignoring the edges that feed speculation
/// nodes. Members left over when no speculation node breaks the cycle are
/// appended in id order.
fn order_cycle(network: &Network, nodes: &[NodeId], members: &[usize], succ: &[Vec<usize>]) -> Vec<usize> {
    let in_group: HashSet<usize> = members.iter().copied().collect();
    let is_speculation = |m: usize| network.node(nodes[m]).is_some_and(|n| n.is_speculation());

    let mut in_degree: HashMap<usize, usize> = members.iter().map(|&m| (m, 0)).collect();
    for &u in members {
        for &v in &succ[u] {
            if in_group.contains(&v) && !is_speculation(v) {
                *in_degree.entry(v).or_default() += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<(NodeId, usize)>> = members
        .iter()
        .filter(|m| in_degree[*m] == 0)
        .map(|&m| Reverse((nodes[m], m)))
        .collect();
    let mut ordered = Vec::with_capacity(members.len());
    while let Some(Reverse((_, u))) = ready.pop() {
        ordered.push(u);
        for &v in &succ[u] {
            if in_group.contains(&v) && !is_speculation(v) {
                let d = in_degree.entry(v).or_default();
                *d -= 1;
                if *d == 0 {
                    ready.push(Reverse((nodes[v], v)));
                }
            }
        }
    }

    if ordered.len() < members.len() {
        let placed: HashSet<usize> = ordered.iter().copied().collect();
        let mut rest: Vec<usize> = members.iter().copied().filter(|m| !placed.contains(m)).collect();
        rest.sort_unstable_by_key(|&m| nodes[m]);
        ordered.extend(rest);
    }
    ordered
}

/// Tarjan's algorithm, iterative. Components come out in reverse
/// topological order; each component's members are in discovery order.
pub(crate) fn strongly_connected_components(succ: &[Vec<usize>]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;
    let n = succ.len();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut next = 0usize;
    let mut components = Vec::new();

    for root in 0..n {
        if index[root] != UNVISITED {
            continue;
        }
        index[root] = next;
        low[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;
        let mut call: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(frame) = call.last_mut() {
            let v = frame.0;
            if frame.1 < succ[v].len() {
                let w = succ[v][frame.1];
                frame.1 += 1;
                if index[w] == UNVISITED {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
            } else {
                call.pop();
                if let Some(&(parent, _)) = call.last() {
                    low[parent] = low[parent].min(low[v]);
                }
                if low[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }
            }
        }
    }
    components
}
