//! Schedules
//!
//! A [`Schedule`] is the ordered evaluation plan for one set of requested
//! outputs. It is produced by [`schedule`](super::scheduler::schedule) and
//! is only valid for the network version it was built from.

use std::collections::HashMap;

use smallvec::SmallVec;

use super::mask::Mask;
use super::network::Network;
use super::node::{MaskedOutput, NodeId, OutputId};

/// One node to run, with the elements needed of each of its outputs.
#[derive(Debug, Clone)]
pub struct ScheduleTask {
    pub node: NodeId,
    /// `(output index, requested mask)` pairs.
    pub outputs: SmallVec<[(u16, Mask); 1]>,
}

impl ScheduleTask {
    pub fn requested_mask(&self, index: u16) -> Option<&Mask> {
        self.outputs
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, mask)| mask)
    }
}

/// A strongly connected set of tasks evaluated together.
#[derive(Debug, Clone)]
pub struct CycleGroup {
    /// Task indices in evaluation order, with edges into speculation nodes
    /// ignored.
    pub tasks: Vec<usize>,
    /// The tasks (a subset of `tasks`) that are speculation nodes.
    pub speculation: SmallVec<[usize; 1]>,
}

impl CycleGroup {
    /// A cycle without a speculation node cannot be evaluated.
    pub fn is_breakable(&self) -> bool {
        !self.speculation.is_empty()
    }
}

/// A unit of scheduling.
#[derive(Debug, Clone)]
pub enum ScheduleUnit {
    /// A single acyclic task.
    Task(usize),
    /// A cycle, run by the speculation executor.
    Cycle(CycleGroup),
}

impl ScheduleUnit {
    pub fn tasks(&self) -> &[usize] {
        match self {
            ScheduleUnit::Task(task) => std::slice::from_ref(task),
            ScheduleUnit::Cycle(group) => &group.tasks,
        }
    }
}

/// The evaluation plan.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    pub(crate) tasks: Vec<ScheduleTask>,
    pub(crate) task_index: HashMap<NodeId, usize>,
    pub(crate) units: Vec<ScheduleUnit>,
    /// For each unit, the units it depends on.
    pub(crate) unit_dependencies: Vec<SmallVec<[usize; 4]>>,
    /// For each unit, the units depending on it.
    pub(crate) unit_dependents: Vec<SmallVec<[usize; 4]>>,
    /// Units grouped by depth; every unit depends only on earlier layers.
    pub(crate) layers: Vec<Vec<usize>>,
    pub(crate) requested: Vec<MaskedOutput>,
    pub(crate) version: u64,
}

impl Schedule {
    pub fn tasks(&self) -> &[ScheduleTask] {
        &self.tasks
    }

    pub fn units(&self) -> &[ScheduleUnit] {
        &self.units
    }

    pub fn layers(&self) -> &[Vec<usize>] {
        &self.layers
    }

    pub fn unit_dependencies(&self, unit: usize) -> &[usize] {
        self.unit_dependencies
            .get(unit)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }

    pub fn unit_dependents(&self, unit: usize) -> &[usize] {
        self.unit_dependents
            .get(unit)
            .map(|d| d.as_slice())
            .unwrap_or(&[])
    }

    /// The outputs this schedule was built for.
    pub fn requested(&self) -> &[MaskedOutput] {
        &self.requested
    }

    pub fn task_for(&self, node: NodeId) -> Option<&ScheduleTask> {
        self.task_index.get(&node).map(|&i| &self.tasks[i])
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.task_index.contains_key(&node)
    }

    pub fn requested_mask(&self, output: OutputId) -> Option<&Mask> {
        self.task_for(output.node)?.requested_mask(output.index)
    }

    /// Node order of every task, as evaluated serially.
    pub fn node_order(&self) -> Vec<NodeId> {
        self.units
            .iter()
            .flat_map(|u| u.tasks().iter().map(|&t| self.tasks[t].node))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether the network has not changed since this schedule was built.
    pub fn is_valid_for(&self, network: &Network) -> bool {
        self.version == network.version()
    }
}
