//! System
//!
//! The host-facing facade. A [`System`] owns the compiled program, the
//! executor and its cache, and the evaluation time. Hosts build
//! [`Request`]s of value keys and compute them into [`CacheView`]s, and
//! forward scene edits and time changes so cached values stay correct.
//!
//! # Concurrency
//!
//! Compilation, scene edits and time changes are serialized by one lock.
//! Execution is not: any number of threads may compute requests at once,
//! and nodes they share are computed once.
//!
//! Compilation and execution share the worker pool. Compilation tasks take
//! the network lock for writing, so a compilation round waits at the
//! execution gate until running executions finish, and executions wait
//! for the round. Otherwise compilation tasks could occupy every worker
//! while an execution holding the network needs one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, debug_span, warn};

use super::cache_view::CacheView;
use super::compiler::{CompileStats, Compiler};
use super::diagnostics::Diagnostics;
use super::program::Program;
use super::registry::DefinitionRegistry;
use super::request::{Request, RequestShared, TimeChangeCallback, ValueInvalidationCallback};
use super::value_key::ValueKey;
use crate::config::{DataManagerKind, ExecConfig};
use crate::error::{DiagnosticScope, ErrorSink, ExecError, Result};
use crate::esf::{SceneEdit, StageInterface};
use crate::value::{Time, TypeRegistry};
use crate::vdf::{
    schedule, DataManager, EvalState, ExecutionStats, Executor, HashDataManager, MaskedOutput,
    NodeId, ParallelExecutor, VectorDataManager,
};

pub(crate) struct SystemInner {
    pub(crate) stage: Arc<dyn StageInterface>,
    pub(crate) registry: Arc<DefinitionRegistry>,
    pub(crate) types: Arc<TypeRegistry>,
    pub(crate) config: ExecConfig,
    pub(crate) pool: Arc<ThreadPool>,
    pub(crate) program: Program,
    pub(crate) executor: ParallelExecutor,
    pub(crate) time: RwLock<Time>,
    pub(crate) requests: Mutex<IndexMap<u64, Weak<RequestShared>>>,
    next_request: AtomicU64,
    /// Bumped by every batch of scene edits.
    pub(crate) generation: AtomicU64,
    /// Serializes everything that changes the program.
    pub(crate) compile_lock: Mutex<()>,
    /// Held shared by executions, exclusively by compilation rounds.
    execution_gate: RwLock<()>,
    pub(crate) errors: ErrorSink,
}

impl SystemInner {
    /// Every live request.
    pub(crate) fn live_requests(&self) -> Vec<Arc<RequestShared>> {
        self.requests.lock().values().filter_map(Weak::upgrade).collect()
    }

    /// Output nodes of every live request except `except`.
    pub(crate) fn request_roots(&self, except: Option<u64>) -> Vec<NodeId> {
        self.live_requests()
            .iter()
            .filter(|r| Some(r.id) != except)
            .flat_map(|r| r.roots())
            .collect()
    }

    /// Compile and schedule `request` if it is stale. Must be called with
    /// the compile lock held.
    pub(crate) fn prepare_locked(&self, request: &RequestShared) -> Option<CompileStats> {
        let generation = self.generation.load(Ordering::Acquire);
        let stale = {
            let state = request.state.lock();
            let network = self.program.network();
            !state.prepared
                || self.program.inputs_requiring_recompilation() > 0
                || state
                    .outputs
                    .iter()
                    .any(|o| o.as_ref().is_some_and(|o| !network.is_live(o.node())))
                || (state.generation != generation && state.outputs.iter().any(Option::is_none))
        };

        let mut compiled = None;
        if stale {
            let roots = self.request_roots(Some(request.id));
            let _gate = self.execution_gate.write();
            let mut compiler =
                Compiler::new(self.stage.as_ref(), &self.registry, &self.program, &self.pool);
            if self.config.uncompile_unreachable {
                compiler = compiler.retaining(roots, self.executor.data_manager());
            }
            let (outputs, stats) = compiler.compile(&request.keys);
            let mut state = request.state.lock();
            state.outputs = outputs;
            state.prepared = true;
            state.generation = generation;
            state.schedule = None;
            compiled = Some(stats);
        }

        let mut state = request.state.lock();
        let network = self.program.network();
        let current = state
            .schedule
            .as_ref()
            .is_some_and(|s| s.is_valid_for(&network));
        if !current {
            let _span = debug_span!("schedule", request = request.id).entered();
            let requested: Vec<MaskedOutput> = state.outputs.iter().flatten().cloned().collect();
            state.schedule = Some(Arc::new(schedule(&network, &requested)));
        }
        compiled
    }
}

/// The execution system for one scene.
pub struct System {
    inner: Arc<SystemInner>,
}

impl System {
    /// Create a system computing over `stage` with the computations in
    /// `registry`.
    pub fn new(
        stage: Arc<dyn StageInterface>,
        registry: DefinitionRegistry,
        config: ExecConfig,
    ) -> Result<Self> {
        Self::with_types(stage, registry, TypeRegistry::with_builtin_types(), config)
    }

    pub fn with_types(
        stage: Arc<dyn StageInterface>,
        registry: DefinitionRegistry,
        types: TypeRegistry,
        config: ExecConfig,
    ) -> Result<Self> {
        config.validate()?;
        let mut builder = ThreadPoolBuilder::new().thread_name(|i| format!("exec-worker-{i}"));
        if let Some(threads) = config.worker_threads {
            builder = builder.num_threads(threads);
        }
        let pool = Arc::new(
            builder
                .build()
                .map_err(|e| ExecError::InvalidConfig(e.to_string()))?,
        );
        let data: Box<dyn DataManager> = match config.data_manager {
            DataManagerKind::Vector => Box::new(VectorDataManager::new()),
            DataManagerKind::Hash => Box::new(HashDataManager::new()),
        };
        let executor = ParallelExecutor::with_pool(pool.clone(), data).configured(&config);
        debug!(threads = pool.current_num_threads(), "created system");

        Ok(Self {
            inner: Arc::new(SystemInner {
                stage,
                registry: Arc::new(registry),
                types: Arc::new(types),
                config,
                pool,
                program: Program::new(),
                executor,
                time: RwLock::new(Time::default_time()),
                requests: Mutex::new(IndexMap::new()),
                next_request: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                compile_lock: Mutex::new(()),
                execution_gate: RwLock::new(()),
                errors: ErrorSink::new(),
            }),
        })
    }

    pub fn config(&self) -> &ExecConfig {
        &self.inner.config
    }

    pub fn program(&self) -> &Program {
        &self.inner.program
    }

    pub fn time(&self) -> Time {
        *self.inner.time.read()
    }

    pub fn build_request(&self, keys: Vec<ValueKey>) -> Request {
        self.register(keys, None, None)
    }

    /// Build a request whose callbacks fire when its computed values are
    /// invalidated by scene edits or by time changes. Each callback fires
    /// at most once per computation.
    pub fn build_request_with_callbacks(
        &self,
        keys: Vec<ValueKey>,
        on_value_invalidation: ValueInvalidationCallback,
        on_time_change: TimeChangeCallback,
    ) -> Request {
        self.register(keys, Some(on_value_invalidation), Some(on_time_change))
    }

    fn register(
        &self,
        keys: Vec<ValueKey>,
        on_value_invalidation: Option<ValueInvalidationCallback>,
        on_time_change: Option<TimeChangeCallback>,
    ) -> Request {
        let id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(RequestShared::new(id, keys, on_value_invalidation, on_time_change));
        if !shared.valid {
            warn!(request = id, "request contains invalid value keys");
        }
        self.inner.requests.lock().insert(id, Arc::downgrade(&shared));
        Request {
            shared,
            system: Arc::downgrade(&self.inner),
        }
    }

    fn owns(&self, request: &Request) -> bool {
        request
            .system
            .upgrade()
            .is_some_and(|system| Arc::ptr_eq(&system, &self.inner))
    }

    /// Compile and schedule `request` ahead of computing it.
    pub fn prepare_request(&self, request: &Request) -> Option<CompileStats> {
        let _scope = DiagnosticScope::enter(self.inner.errors.clone());
        if !request.is_valid() || !self.owns(request) {
            warn!(?request, "cannot prepare request");
            return None;
        }
        let _lock = self.inner.compile_lock.lock();
        self.inner.prepare_locked(&request.shared)
    }

    /// Compute every value of `request`.
    pub fn compute<'a>(&'a self, request: &'a Request) -> CacheView<'a> {
        self.compute_with_stats(request).0
    }

    pub fn compute_with_stats<'a>(&'a self, request: &'a Request) -> (CacheView<'a>, ExecutionStats) {
        let _scope = DiagnosticScope::enter(self.inner.errors.clone());
        let empty = || CacheView::new(request, &self.inner.types, vec![None; request.len()]);
        if !request.is_valid() || !self.owns(request) {
            warn!(?request, "cannot compute request");
            return (empty(), ExecutionStats::default());
        }

        loop {
            {
                let _lock = self.inner.compile_lock.lock();
                self.inner.prepare_locked(&request.shared);
            }
            let (outputs, plan) = {
                let mut state = request.shared.state.lock();
                state.notify_values = true;
                state.notify_time = true;
                (state.outputs.clone(), state.schedule.clone())
            };
            let Some(plan) = plan else {
                return (empty(), ExecutionStats::default());
            };
            let _gate = self.inner.execution_gate.read();
            let network = self.inner.program.network();
            if !plan.is_valid_for(&network) {
                // Another thread changed the program in between.
                continue;
            }

            let span = debug_span!("execute", request = request.shared.id, tasks = plan.len());
            let _enter = span.enter();
            let eval = EvalState::new(self.time(), self.inner.types.clone());
            let stats = self.inner.executor.execute(&network, &plan, &eval);
            let data = outputs
                .iter()
                .map(|output| {
                    let output = output.as_ref()?;
                    let data = self.inner.executor.output_data(output.output)?;
                    Some((data, output.mask.clone()))
                })
                .collect();
            debug!(computed = stats.computed, cached = stats.cached, "executed request");
            return (CacheView::new(request, &self.inner.types, data), stats);
        }
    }

    /// Change the evaluation time. See [`invalidation`](super::invalidation).
    pub fn change_time(&self, time: Time) {
        let _scope = DiagnosticScope::enter(self.inner.errors.clone());
        self.inner.change_time(time);
    }

    /// Process scene edits. See [`invalidation`](super::invalidation).
    pub fn did_change_objects(&self, edits: &[SceneEdit]) {
        let _scope = DiagnosticScope::enter(self.inner.errors.clone());
        self.inner.did_change_objects(edits);
    }

    /// Drain every coding error reported since the last call.
    pub fn take_errors(&self) -> Vec<ExecError> {
        self.inner.errors.take()
    }

    pub fn diagnostics(&self) -> Diagnostics<'_> {
        Diagnostics::new(&self.inner)
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("nodes", &self.inner.program.node_count())
            .field("requests", &self.inner.requests.lock().len())
            .field("time", &self.time())
            .finish()
    }
}
