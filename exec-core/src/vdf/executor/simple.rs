//! Single-threaded executor.

use tracing::debug;

use super::{run_task, DataManager, ExecutionStats, Executor, OutputData, SpeculationExecutor, VectorDataManager};
use crate::vdf::context::EvalState;
use crate::vdf::network::Network;
use crate::vdf::node::MaskedOutput;
use crate::vdf::schedule::{Schedule, ScheduleUnit};
use crate::vdf::scheduler::schedule;

/// Runs every unit of a schedule in order on the calling thread.
pub struct SimpleExecutor {
    data: Box<dyn DataManager>,
    speculation: SpeculationExecutor,
}

impl Default for SimpleExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleExecutor {
    pub fn new() -> Self {
        Self::with_data_manager(Box::new(VectorDataManager::new()))
    }

    pub fn with_data_manager(data: Box<dyn DataManager>) -> Self {
        Self {
            data,
            speculation: SpeculationExecutor::default(),
        }
    }

    pub fn with_speculation(mut self, speculation: SpeculationExecutor) -> Self {
        self.speculation = speculation;
        self
    }

    /// Compute a single output on demand, scheduling just what it needs.
    pub fn pull(&self, network: &Network, output: &MaskedOutput, eval: &EvalState) -> Option<OutputData> {
        let plan = schedule(network, std::slice::from_ref(output));
        self.execute(network, &plan, eval);
        self.data.get(output.output)
    }
}

impl Executor for SimpleExecutor {
    fn execute(&self, network: &Network, schedule: &Schedule, eval: &EvalState) -> ExecutionStats {
        let mut stats = ExecutionStats::default();
        for unit in schedule.units() {
            match unit {
                ScheduleUnit::Task(t) => {
                    stats += run_task(network, self.data.as_ref(), &schedule.tasks()[*t], eval).stats();
                }
                ScheduleUnit::Cycle(group) => {
                    let outcome = self
                        .speculation
                        .run_group(network, self.data.as_ref(), schedule, group, eval);
                    stats += outcome.stats(group.tasks.len());
                }
            }
        }
        debug!(?stats, "serial execution finished");
        stats
    }

    fn data_manager(&self) -> &dyn DataManager {
        self.data.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::value::Value;
    use crate::vdf::executor::test_support::*;
    use crate::vdf::node::OutputId;

    #[test]
    fn executes_in_dependency_order() {
        let mut net = Network::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let a = constant(&mut net, 1.5);
        let b = constant(&mut net, 2.5);
        let total = sum(&mut net, &runs);
        link(&mut net, a, total);
        link(&mut net, b, total);

        let executor = SimpleExecutor::new();
        let plan = schedule(&net, &[request(total)]);
        let stats = executor.execute(&net, &plan, &eval());
        assert_eq!(stats.computed, 3);
        assert_eq!(value_of(executor.data_manager(), total), Some(Value::Double(4.0)));

        let again = executor.execute(&net, &plan, &eval());
        assert_eq!(again.computed, 0);
        assert_eq!(again.cached, 3);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pull_computes_only_what_is_needed() {
        let mut net = Network::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let a = constant(&mut net, 1.0);
        let left = sum(&mut net, &runs);
        let right = sum(&mut net, &runs);
        link(&mut net, a, left);
        link(&mut net, a, right);

        let executor = SimpleExecutor::new();
        let data = executor.pull(&net, &request(left), &eval()).unwrap();
        assert_eq!(data.vector.get(0), Some(Value::Double(1.0)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(executor.output_data(OutputId::new(right, 0)).is_none());
    }

    #[test]
    fn invalidation_forces_recompute() {
        let mut net = Network::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let a = constant(&mut net, 1.0);
        let s = sum(&mut net, &runs);
        link(&mut net, a, s);
        let executor = SimpleExecutor::new();
        let plan = schedule(&net, &[request(s)]);
        executor.execute(&net, &plan, &eval());
        executor.invalidate_nodes(&net, &[s]);
        let stats = executor.execute(&net, &plan, &eval());
        assert_eq!((stats.computed, stats.cached), (1, 1));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
