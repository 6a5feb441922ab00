//! Executors
//!
//! An executor runs a [`Schedule`] over a [`Network`], reading and writing
//! output data through a [`DataManager`].
//!
//! # Executors
//!
//! - [`SimpleExecutor`] runs every unit on the calling thread.
//! - [`ParallelExecutor`] runs independent units on a rayon pool and
//!   guarantees that a node shared by concurrent executions is computed at
//!   most once.
//! - [`SpeculationExecutor`] evaluates cycle groups by iterating speculation
//!   estimates to a fixed point. Both executors above delegate to it.
//!
//! A node is computed only for the elements of its outputs that are not
//! already valid in the cache. Cached data is never recomputed until it is
//! invalidated.

mod data_manager;
mod parallel;
mod simple;
mod speculation;
mod task_sync;

use std::ops::AddAssign;

use serde::Serialize;
use smallvec::SmallVec;

pub use data_manager::{DataManager, HashDataManager, OutputData, VectorDataManager};
pub use parallel::ParallelExecutor;
pub use simple::SimpleExecutor;
pub use speculation::{SpeculationExecutor, SpeculationOutcome};
pub use task_sync::{ClaimGuard, ClaimResult, TaskSync};

use super::context::{Context, EvalState, GatheredInputs, InputView};
use super::mask::Mask;
use super::network::Network;
use super::node::{Node, NodeId, NodeKind, OutputId};
use super::schedule::{Schedule, ScheduleTask};
use super::vector::Vector;
use crate::error::{report, ExecError};

/// Counters describing one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    /// Nodes whose callbacks ran.
    pub computed: usize,
    /// Nodes skipped because the cache already held their outputs.
    pub cached: usize,
    /// Total iterations across all speculation groups.
    pub speculation_iterations: usize,
    /// Speculation groups that hit the iteration cap.
    pub unconverged_groups: usize,
}

impl AddAssign for ExecutionStats {
    fn add_assign(&mut self, rhs: Self) {
        self.computed += rhs.computed;
        self.cached += rhs.cached;
        self.speculation_iterations += rhs.speculation_iterations;
        self.unconverged_groups += rhs.unconverged_groups;
    }
}

/// Common interface of the executors.
pub trait Executor: Send + Sync {
    /// Run `schedule`, leaving every requested output valid in the cache.
    fn execute(&self, network: &Network, schedule: &Schedule, eval: &EvalState) -> ExecutionStats;

    fn data_manager(&self) -> &dyn DataManager;

    /// Cached data of `output`.
    fn output_data(&self, output: OutputId) -> Option<OutputData> {
        self.data_manager().get(output)
    }

    /// Invalidate every output of `nodes`. Returns how many outputs held
    /// valid data.
    fn invalidate_nodes(&self, network: &Network, nodes: &[NodeId]) -> usize {
        let data = self.data_manager();
        let mut cleared = 0;
        for &id in nodes {
            let Some(node) = network.node(id) else { continue };
            for (index, output) in node.outputs().iter().enumerate() {
                let all = Mask::all_ones(output.spec().size);
                if data.invalidate(OutputId::new(id, index as u16), &all) {
                    cleared += 1;
                }
            }
        }
        cleared
    }
}

/// What happened to one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Computed,
    Cached,
    Skipped,
}

impl TaskOutcome {
    pub(crate) fn stats(self) -> ExecutionStats {
        match self {
            TaskOutcome::Computed => ExecutionStats {
                computed: 1,
                ..Default::default()
            },
            TaskOutcome::Cached => ExecutionStats {
                cached: 1,
                ..Default::default()
            },
            TaskOutcome::Skipped => ExecutionStats::default(),
        }
    }
}

pub(crate) fn is_cached(data: &dyn DataManager, node: NodeId, task: &ScheduleTask) -> bool {
    task.outputs.iter().all(|(index, mask)| {
        data.computed_mask(OutputId::new(node, *index))
            .is_some_and(|computed| mask.is_subset_of(&computed))
    })
}

/// Run `task` unless the cache already covers it.
pub(crate) fn run_task(
    network: &Network,
    data: &dyn DataManager,
    task: &ScheduleTask,
    eval: &EvalState,
) -> TaskOutcome {
    let Some(node) = network.node(task.node) else {
        return TaskOutcome::Skipped;
    };
    if is_cached(data, task.node, task) {
        return TaskOutcome::Cached;
    }
    compute_node(network, data, node, &task.outputs, eval);
    TaskOutcome::Computed
}

/// Run `task` at most once across threads sharing `sync`.
pub(crate) fn run_task_synced(
    network: &Network,
    data: &dyn DataManager,
    sync: &TaskSync,
    task: &ScheduleTask,
    eval: &EvalState,
) -> TaskOutcome {
    loop {
        if is_cached(data, task.node, task) {
            return TaskOutcome::Cached;
        }
        match sync.claim(task.node) {
            ClaimResult::Claimed(_guard) => return run_task(network, data, task, eval),
            ClaimResult::Released => continue,
        }
    }
}

/// Gather the data arriving on every input of `node`.
pub(crate) fn gather_inputs(network: &Network, data: &dyn DataManager, node: &Node) -> GatheredInputs {
    node.inputs()
        .iter()
        .map(|input| {
            input
                .connections()
                .iter()
                .filter_map(|c| network.connection(*c))
                .filter_map(|conn| {
                    let upstream = data.get(conn.source)?;
                    let mask = conn.mask.and(&upstream.computed);
                    mask.is_any_set().then_some(InputView {
                        vector: upstream.vector,
                        mask,
                    })
                })
                .collect()
        })
        .collect()
}

/// Compute `node` for `requested` and store the results.
///
/// A required input without a value leaves every requested output empty
/// and reports the omission.
pub(crate) fn compute_node(
    network: &Network,
    data: &dyn DataManager,
    node: &Node,
    requested: &[(u16, Mask)],
    eval: &EvalState,
) {
    let inputs = gather_inputs(network, data, node);

    let missing = node
        .inputs()
        .iter()
        .zip(inputs.iter())
        .find(|(input, views)| {
            !input.spec().optional && views.iter().all(|v| v.first_value().is_none())
        });
    if let Some((input, _)) = missing {
        report(ExecError::MissingRequiredInput {
            node: node.name().to_string(),
            input: input.spec().name.to_string(),
        });
        store_empty(data, node, requested);
        return;
    }

    let mut outputs: SmallVec<[Option<Vector>; 1]> = match node.kind() {
        NodeKind::Constant(value) => node
            .outputs()
            .iter()
            .map(|o| Vector::splat(value.clone(), o.spec().size))
            .collect(),
        NodeKind::Callback(compute) => {
            let mut ctx = Context::new(node, &inputs, requested, eval);
            compute(&mut ctx);
            ctx.into_outputs()
        }
        NodeKind::Speculation => {
            let mut out = SmallVec::new();
            out.push(inputs.first().and_then(|v| v.first()).map(|v| v.vector.clone()));
            out
        }
    };

    for (index, mask) in requested {
        let Some(spec) = node.output(*index).map(|o| o.spec()) else {
            continue;
        };
        let vector = outputs
            .get_mut(*index as usize)
            .and_then(Option::take)
            .unwrap_or_else(|| Vector::empty(spec.value_type, spec.size));
        data.store(OutputId::new(node.id(), *index), vector, mask);
    }
}

/// Mark `requested` valid with no data, so consumers see an empty value.
pub(crate) fn store_empty(data: &dyn DataManager, node: &Node, requested: &[(u16, Mask)]) {
    for (index, mask) in requested {
        if let Some(output) = node.output(*index) {
            let spec = output.spec();
            data.store(
                OutputId::new(node.id(), *index),
                Vector::empty(spec.value_type, spec.size),
                mask,
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Small networks shared by the executor tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::value::{TypeRegistry, Time, Value, ValueType};
    use crate::vdf::node::{InputId, InputSpec, MaskedOutput, NodeSpec, OutputSpec};

    pub fn eval() -> EvalState {
        EvalState::new(Time::default_time(), Arc::new(TypeRegistry::with_builtin_types()))
    }

    pub fn constant(net: &mut Network, value: f64) -> NodeId {
        net.create_node(NodeSpec::constant("const", Value::Double(value), ValueType::Double))
    }

    /// A node summing every double on its `in` input, counting its runs.
    pub fn sum(net: &mut Network, runs: &Arc<AtomicUsize>) -> NodeId {
        let runs = runs.clone();
        net.create_node(
            NodeSpec::callback(
                "sum",
                Arc::new(move |ctx: &mut Context<'_>| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    let total: f64 = ctx
                        .input_values("in")
                        .iter()
                        .filter_map(|v| v.get::<f64>())
                        .sum();
                    ctx.set_output(total);
                }),
            )
            .with_input(InputSpec::new("in", ValueType::Double))
            .with_output(OutputSpec::new("out", ValueType::Double)),
        )
    }

    pub fn link(net: &mut Network, from: NodeId, to: NodeId) {
        net.connect(OutputId::new(from, 0), InputId::new(to, 0), Mask::all_ones(1))
            .expect("valid connection");
    }

    pub fn request(node: NodeId) -> MaskedOutput {
        MaskedOutput::new(OutputId::new(node, 0), Mask::all_ones(1))
    }

    pub fn value_of(data: &dyn DataManager, node: NodeId) -> Option<Value> {
        data.get(OutputId::new(node, 0))?.vector.get(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::test_support::*;
    use super::*;
    use crate::error::{DiagnosticScope, ErrorSink};
    use crate::value::{Value, ValueType};
    use crate::vdf::node::{InputSpec, NodeSpec, OutputSpec};
    use crate::vdf::scheduler::schedule;

    #[test]
    fn run_task_skips_cached_outputs() {
        let mut net = Network::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let a = constant(&mut net, 2.0);
        let s = sum(&mut net, &runs);
        link(&mut net, a, s);
        let plan = schedule(&net, &[request(s)]);
        let data = VectorDataManager::new();
        let eval = eval();

        for task in plan.tasks() {
            run_task(&net, &data, task, &eval);
        }
        assert_eq!(value_of(&data, s), Some(Value::Double(2.0)));
        let second: Vec<TaskOutcome> = plan
            .tasks()
            .iter()
            .map(|t| run_task(&net, &data, t, &eval))
            .collect();
        assert_eq!(second, vec![TaskOutcome::Cached, TaskOutcome::Cached]);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_required_input_leaves_output_empty() {
        let mut net = Network::new();
        let node = net.create_node(
            NodeSpec::callback(
                "needs",
                Arc::new(|ctx: &mut Context<'_>| ctx.set_output(1.0f64)),
            )
            .with_input(InputSpec::new("x", ValueType::Double).required())
            .with_output(OutputSpec::new("out", ValueType::Double)),
        );
        let plan = schedule(&net, &[request(node)]);
        let data = HashDataManager::new();
        let sink = ErrorSink::new();
        {
            let _scope = DiagnosticScope::enter(sink.clone());
            run_task(&net, &data, &plan.tasks()[0], &eval());
        }
        assert_eq!(value_of(&data, node), None);
        assert!(data.computed_mask(OutputId::new(node, 0)).is_some());
        assert!(matches!(
            sink.take().as_slice(),
            [ExecError::MissingRequiredInput { .. }]
        ));
    }

    #[test]
    fn invalidate_nodes_clears_outputs() {
        let mut net = Network::new();
        let a = constant(&mut net, 1.0);
        let executor = SimpleExecutor::new();
        executor.execute(&net, &schedule(&net, &[request(a)]), &eval());
        assert_eq!(executor.invalidate_nodes(&net, &[a]), 1);
        assert!(executor.output_data(OutputId::new(a, 0)).is_none());
    }
}
