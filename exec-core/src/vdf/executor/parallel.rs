//! Parallel executor
//!
//! # Algorithm
//!
//! Every schedule unit carries a counter of unfinished dependencies. Units
//! whose counter starts at zero are spawned onto the pool. When a unit
//! finishes it decrements its dependents, and the worker that takes a
//! counter to zero spawns that dependent. Cycle groups run as one unit.
//!
//! Small schedules skip the pool entirely.
//!
//! Nodes are claimed through a [`TaskSync`] shared by every execution on
//! this executor, so two requests executing concurrently never compute
//! the same node twice.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::{Scope, ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use super::{run_task_synced, DataManager, ExecutionStats, Executor, SpeculationExecutor, TaskSync, VectorDataManager};
use crate::config::ExecConfig;
use crate::error::{DiagnosticScope, ErrorSink, ExecError, Result};
use crate::vdf::context::EvalState;
use crate::vdf::network::Network;
use crate::vdf::schedule::{Schedule, ScheduleUnit};

/// Executes independent schedule units concurrently on a rayon pool.
pub struct ParallelExecutor {
    pool: Arc<ThreadPool>,
    data: Box<dyn DataManager>,
    sync: TaskSync,
    speculation: SpeculationExecutor,
    parallel_threshold: usize,
}

impl ParallelExecutor {
    /// Build an executor with its own pool of `threads` workers, or one per
    /// core when `None`.
    pub fn new(threads: Option<usize>) -> Result<Self> {
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("exec-worker-{i}"));
        if let Some(threads) = threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|err| ExecError::InvalidConfig(format!("thread pool: {err}")))?;
        Ok(Self::with_pool(Arc::new(pool), Box::new(VectorDataManager::new())))
    }

    /// Share an existing pool.
    pub fn with_pool(pool: Arc<ThreadPool>, data: Box<dyn DataManager>) -> Self {
        Self {
            pool,
            data,
            sync: TaskSync::new(),
            speculation: SpeculationExecutor::default(),
            parallel_threshold: ExecConfig::default().parallel_threshold,
        }
    }

    /// Apply the execution tunables of `config`.
    pub fn configured(mut self, config: &ExecConfig) -> Self {
        self.speculation = SpeculationExecutor::new(config.speculation_iteration_cap);
        self.parallel_threshold = config.parallel_threshold;
        self
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn run_unit(&self, network: &Network, schedule: &Schedule, unit: usize, eval: &EvalState) -> ExecutionStats {
        match &schedule.units()[unit] {
            ScheduleUnit::Task(t) => {
                run_task_synced(network, self.data.as_ref(), &self.sync, &schedule.tasks()[*t], eval).stats()
            }
            ScheduleUnit::Cycle(group) => {
                // The whole group is claimed through its first member.
                let first = schedule.tasks()[group.tasks[0]].node;
                let _claim = self.sync.claim(first);
                self.speculation
                    .run_group(network, self.data.as_ref(), schedule, group, eval)
                    .stats(group.tasks.len())
            }
        }
    }

    fn execute_serial(&self, network: &Network, schedule: &Schedule, eval: &EvalState) -> ExecutionStats {
        let mut stats = ExecutionStats::default();
        for unit in 0..schedule.units().len() {
            stats += self.run_unit(network, schedule, unit, eval);
        }
        stats
    }
}

/// Shared state of one parallel execution.
struct RunState<'a> {
    executor: &'a ParallelExecutor,
    network: &'a Network,
    schedule: &'a Schedule,
    eval: &'a EvalState,
    remaining: Vec<AtomicUsize>,
    stats: Mutex<ExecutionStats>,
    sink: Option<ErrorSink>,
}

fn spawn_unit<'s>(scope: &Scope<'s>, state: &'s RunState<'s>, unit: usize) {
    scope.spawn(move |scope| {
        let _diagnostics = state.sink.clone().map(DiagnosticScope::enter);
        let stats = state
            .executor
            .run_unit(state.network, state.schedule, unit, state.eval);
        *state.stats.lock() += stats;

        for &dependent in state.schedule.unit_dependents(unit) {
            if state.remaining[dependent].fetch_sub(1, Ordering::AcqRel) == 1 {
                spawn_unit(scope, state, dependent);
            }
        }
    });
}

impl Executor for ParallelExecutor {
    fn execute(&self, network: &Network, schedule: &Schedule, eval: &EvalState) -> ExecutionStats {
        let units = schedule.units().len();
        if units < self.parallel_threshold || self.threads() <= 1 {
            return self.execute_serial(network, schedule, eval);
        }

        let state = RunState {
            executor: self,
            network,
            schedule,
            eval,
            remaining: (0..units)
                .map(|u| AtomicUsize::new(schedule.unit_dependencies(u).len()))
                .collect(),
            stats: Mutex::new(ExecutionStats::default()),
            sink: DiagnosticScope::current(),
        };
        self.pool.scope(|scope| {
            for unit in 0..units {
                if schedule.unit_dependencies(unit).is_empty() {
                    spawn_unit(scope, &state, unit);
                }
            }
        });

        let stats = state.stats.into_inner();
        debug!(units, threads = self.threads(), ?stats, "parallel execution finished");
        stats
    }

    fn data_manager(&self) -> &dyn DataManager {
        self.data.as_ref()
    }
}
