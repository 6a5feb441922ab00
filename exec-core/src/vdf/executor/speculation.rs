//! Speculation
//!
//! A cycle group contains at least one speculation node. Each speculation
//! node stands in for a value the cycle depends on before it has been
//! computed. Evaluation proceeds as:
//!
//! 1. Seed every speculation output with its cached value, or with the
//!    fallback value of its type.
//! 2. Compute the other members of the group in order.
//! 3. Compare each speculation node's estimate with the value now arriving
//!    on its `source` input. If they all agree, the group has converged.
//!    Otherwise adopt the new values as estimates and repeat from 2.
//!
//! Groups that do not converge within the iteration cap keep their last
//! estimate. This is a best-effort result and is logged, not reported.

use tracing::{trace, warn};

use super::{compute_node, store_empty, DataManager, ExecutionStats};
use crate::vdf::context::EvalState;
use crate::vdf::network::Network;
use crate::vdf::node::{InputId, OutputId};
use crate::vdf::schedule::{CycleGroup, Schedule};
use crate::vdf::vector::Vector;

/// Result of evaluating one cycle group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeculationOutcome {
    pub iterations: usize,
    pub converged: bool,
}

impl SpeculationOutcome {
    pub(crate) fn stats(self, computed: usize) -> ExecutionStats {
        ExecutionStats {
            computed,
            speculation_iterations: self.iterations,
            unconverged_groups: usize::from(!self.converged),
            ..Default::default()
        }
    }
}

/// Evaluates cycle groups.
#[derive(Debug, Clone, Copy)]
pub struct SpeculationExecutor {
    iteration_cap: usize,
}

impl Default for SpeculationExecutor {
    fn default() -> Self {
        Self::new(32)
    }
}

impl SpeculationExecutor {
    pub fn new(iteration_cap: usize) -> Self {
        Self {
            iteration_cap: iteration_cap.max(1),
        }
    }

    pub fn iteration_cap(&self) -> usize {
        self.iteration_cap
    }

    /// Evaluate `group`, a cycle unit of `schedule`.
    pub fn run_group(
        &self,
        network: &Network,
        data: &dyn DataManager,
        schedule: &Schedule,
        group: &CycleGroup,
        eval: &EvalState,
    ) -> SpeculationOutcome {
        let tasks = schedule.tasks();
        if group
            .tasks
            .iter()
            .all(|&t| super::is_cached(data, tasks[t].node, &tasks[t]))
        {
            return SpeculationOutcome {
                iterations: 0,
                converged: true,
            };
        }

        if !group.is_breakable() {
            for &t in &group.tasks {
                if let Some(node) = network.node(tasks[t].node) {
                    store_empty(data, node, &tasks[t].outputs);
                }
            }
            return SpeculationOutcome {
                iterations: 0,
                converged: false,
            };
        }

        for &s in &group.speculation {
            let task = &tasks[s];
            let Some(node) = network.node(task.node) else { continue };
            for (index, mask) in &task.outputs {
                let output = OutputId::new(task.node, *index);
                let seeded = data
                    .computed_mask(output)
                    .is_some_and(|computed| mask.is_subset_of(&computed));
                if seeded {
                    continue;
                }
                let Some(spec) = node.output(*index).map(|o| o.spec()) else {
                    continue;
                };
                let seed = eval
                    .types()
                    .fallback_vector(spec.value_type, spec.size)
                    .unwrap_or_else(|| Vector::empty(spec.value_type, spec.size));
                data.store(output, seed, mask);
            }
        }

        for iteration in 1..=self.iteration_cap {
            for &t in &group.tasks {
                if group.speculation.contains(&t) {
                    continue;
                }
                if let Some(node) = network.node(tasks[t].node) {
                    compute_node(network, data, node, &tasks[t].outputs, eval);
                }
            }

            let mut changed = false;
            for &s in &group.speculation {
                let task = &tasks[s];
                let Some(source) = network
                    .input_connections(InputId::new(task.node, 0))
                    .next()
                    .map(|c| c.source)
                else {
                    continue;
                };
                let Some((_, mask)) = task.outputs.first() else { continue };
                let output = OutputId::new(task.node, 0);
                let estimate = data.get(output).map(|d| d.vector);
                let actual = data.get(source).map(|d| d.vector);
                let agrees = match (&estimate, &actual) {
                    (Some(e), Some(a)) => e.equal_under(a, mask),
                    (None, None) => true,
                    _ => false,
                };
                if !agrees {
                    changed = true;
                    if let Some(actual) = actual {
                        data.store(output, actual, mask);
                    }
                }
            }

            trace!(iteration, changed, "speculation iteration");
            if !changed {
                return SpeculationOutcome {
                    iterations: iteration,
                    converged: true,
                };
            }
        }

        warn!(
            cap = self.iteration_cap,
            members = group.tasks.len(),
            "speculation did not converge; keeping last estimate"
        );
        SpeculationOutcome {
            iterations: self.iteration_cap,
            converged: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::value::{Value, ValueType};
    use crate::vdf::context::Context;
    use crate::vdf::executor::test_support::{eval, request, value_of};
    use crate::vdf::executor::VectorDataManager;
    use crate::vdf::mask::Mask;
    use crate::vdf::node::{InputId, InputSpec, NodeId, NodeSpec, OutputSpec};
    use crate::vdf::schedule::ScheduleUnit;
    use crate::vdf::scheduler::schedule;

    /// `x = min(estimate + 1, limit)` fed back through a speculation node.
    fn counter_cycle(net: &mut Network, limit: f64) -> (NodeId, NodeId) {
        let step = net.create_node(
            NodeSpec::callback(
                "step",
                Arc::new(move |ctx: &mut Context<'_>| {
                    let previous = ctx.input_double("previous");
                    ctx.set_output((previous + 1.0).min(limit));
                }),
            )
            .with_input(InputSpec::new("previous", ValueType::Double))
            .with_output(OutputSpec::new("out", ValueType::Double)),
        );
        let spec = net.create_node(NodeSpec::speculation("spec", ValueType::Double, 1));
        net.connect(OutputId::new(step, 0), InputId::new(spec, 0), Mask::all_ones(1));
        net.connect(OutputId::new(spec, 0), InputId::new(step, 0), Mask::all_ones(1));
        (step, spec)
    }

    fn group_of(plan: &Schedule) -> CycleGroup {
        match &plan.units()[0] {
            ScheduleUnit::Cycle(group) => group.clone(),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn converges_to_fixed_point() {
        let mut net = Network::new();
        let (step, _) = counter_cycle(&mut net, 3.0);
        let plan = schedule(&net, &[request(step)]);
        let data = VectorDataManager::new();

        let outcome = SpeculationExecutor::new(32).run_group(&net, &data, &plan, &group_of(&plan), &eval());
        assert!(outcome.converged);
        // 0 -> 1 -> 2 -> 3 -> 3
        assert_eq!(outcome.iterations, 4);
        assert_eq!(value_of(&data, step), Some(Value::Double(3.0)));
    }

    #[test]
    fn cap_yields_best_effort() {
        let mut net = Network::new();
        let (step, _) = counter_cycle(&mut net, 100.0);
        let plan = schedule(&net, &[request(step)]);
        let data = VectorDataManager::new();

        let outcome = SpeculationExecutor::new(5).run_group(&net, &data, &plan, &group_of(&plan), &eval());
        assert_eq!(
            outcome,
            SpeculationOutcome {
                iterations: 5,
                converged: false
            }
        );
        assert_eq!(value_of(&data, step), Some(Value::Double(5.0)));
    }

    #[test]
    fn cached_groups_do_not_iterate() {
        let mut net = Network::new();
        let (step, _) = counter_cycle(&mut net, 2.0);
        let plan = schedule(&net, &[request(step)]);
        let data = VectorDataManager::new();
        let executor = SpeculationExecutor::default();
        executor.run_group(&net, &data, &plan, &group_of(&plan), &eval());
        let again = executor.run_group(&net, &data, &plan, &group_of(&plan), &eval());
        assert_eq!(again.iterations, 0);
    }
}
