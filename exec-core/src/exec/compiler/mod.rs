//! Compiler
//!
//! Turns value keys into network outputs.
//!
//! # Algorithm
//!
//! A compilation round runs on the rayon pool inside one `scope`:
//!
//! 1. A leaf task is spawned for every requested key not already compiled,
//!    and an input recompilation task for every input that uncompilation
//!    left without its connections.
//! 2. Tasks share a [`CompilationState`](state::CompilationState) that
//!    deduplicates keys, so a key requested by many consumers is compiled
//!    once. A consumer waits for a source by leaving a waiter on its entry,
//!    never by blocking a worker.
//! 3. When the scope returns every task has run. A task publishes its node
//!    before requesting inputs, so no task waits on one that waits on it
//!    and the scope always returns. The recorded connections are applied
//!    by this thread alone.
//! 4. Dependency cycles among keys show up as cycles in the network. Each
//!    cycle without a speculation node has one connection replaced by a
//!    path through a new speculation node. The connection chosen is the
//!    one into the smallest consumer key, so the choice does not depend on
//!    the order tasks happened to run in.
//! 5. Outputs are published, and nodes unreachable from the retained roots
//!    are uncompiled.
//!
//! Failures are reported through the caller's diagnostic scope and only
//! affect the key that failed.

mod state;
mod task;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::ThreadPool;
use tracing::{debug, info, info_span, warn};

use state::CompilationState;

use super::program::Program;
use super::registry::DefinitionRegistry;
use super::value_key::ValueKey;
use crate::error::{report, DiagnosticScope, ErrorSink, ExecError};
use crate::esf::StageInterface;
use crate::vdf::{strongly_connected_components, DataManager, MaskedOutput, NodeId};

/// Everything the tasks of one round share.
pub(crate) struct Round<'a> {
    stage: &'a dyn StageInterface,
    registry: &'a DefinitionRegistry,
    program: &'a Program,
    state: CompilationState,
    /// Tasks started this round.
    tasks: AtomicUsize,
    sink: Option<ErrorSink>,
}

/// Counters from one compilation round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileStats {
    pub tasks: usize,
    pub keys: usize,
    pub connections: usize,
    pub speculation_nodes: usize,
    pub uncompiled: usize,
}

pub(crate) struct Compiler<'a> {
    stage: &'a dyn StageInterface,
    registry: &'a DefinitionRegistry,
    program: &'a Program,
    pool: &'a ThreadPool,
    retain: Option<(Vec<NodeId>, &'a dyn DataManager)>,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(
        stage: &'a dyn StageInterface,
        registry: &'a DefinitionRegistry,
        program: &'a Program,
        pool: &'a ThreadPool,
    ) -> Self {
        Self {
            stage,
            registry,
            program,
            pool,
            retain: None,
        }
    }

    /// After compiling, uncompile every node that neither `roots` nor the
    /// compiled outputs reach, purging its data from `data`.
    pub(crate) fn retaining(mut self, roots: Vec<NodeId>, data: &'a dyn DataManager) -> Self {
        self.retain = Some((roots, data));
        self
    }

    /// Compile `keys`. Entry `i` of the result is the output computing
    /// `keys[i]`, or `None` if it could not be compiled.
    pub(crate) fn compile(&self, keys: &[ValueKey]) -> (Vec<Option<MaskedOutput>>, CompileStats) {
        let span = info_span!("compile", keys = keys.len());
        let _enter = span.enter();

        let round = Round {
            stage: self.stage,
            registry: self.registry,
            program: self.program,
            state: CompilationState::new(),
            tasks: AtomicUsize::new(0),
            sink: DiagnosticScope::current(),
        };

        let mut requested = Vec::with_capacity(keys.len());
        let mut leaves = Vec::new();
        for key in keys {
            if !key.is_valid() {
                report(ExecError::InvalidValueKey(key.to_string()));
                requested.push(None);
                continue;
            }
            let (entry, is_new) = round.state.request(key, self.program);
            if is_new {
                leaves.push(entry.clone());
            }
            requested.push(Some(entry));
        }
        let recompile = self.program.take_inputs_requiring_recompilation();

        if !leaves.is_empty() || !recompile.is_empty() {
            let round = &round;
            self.pool.scope(|scope| {
                for entry in leaves {
                    scope.spawn(move |scope| task::compile_leaf(scope, round, entry));
                }
                for input in recompile {
                    scope.spawn(move |scope| task::recompile_input(scope, round, input));
                }
            });
        }
        let unresolved = round.state.unresolved();
        if !unresolved.is_empty() {
            warn!(count = unresolved.len(), "compilation round left keys unresolved");
        }

        let mut stats = CompileStats {
            tasks: round.tasks.load(Ordering::Relaxed),
            keys: round.state.len(),
            ..CompileStats::default()
        };
        stats.connections = self.program.apply_connections(round.state.take_connections());
        stats.speculation_nodes = break_cycles(self.program);
        for (key, output) in round.state.resolved_outputs() {
            self.program.publish(key, output);
        }

        let outputs: Vec<Option<MaskedOutput>> = requested
            .iter()
            .map(|entry| entry.as_ref().and_then(|e| e.output()))
            .collect();

        if let Some((roots, data)) = &self.retain {
            let mut roots = roots.clone();
            roots.extend(outputs.iter().flatten().map(MaskedOutput::node));
            stats.uncompiled = self.program.uncompile_unreachable(&roots, *data);
        }

        info!(
            tasks = stats.tasks,
            keys = stats.keys,
            connections = stats.connections,
            speculation_nodes = stats.speculation_nodes,
            uncompiled = stats.uncompiled,
            "compiled"
        );
        (outputs, stats)
    }
}

/// Insert a speculation node into every network cycle that lacks one.
/// Returns how many were inserted.
fn break_cycles(program: &Program) -> usize {
    let mut inserted = 0;
    loop {
        let broken = {
            let network = program.network();
            let ids: Vec<NodeId> = network.nodes().map(|n| n.id()).collect();
            let index: HashMap<NodeId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
            let is_speculation = |id: NodeId| network.node(id).is_some_and(|n| n.is_speculation());

            let mut succ = vec![Vec::new(); ids.len()];
            for connection in network.connections() {
                if is_speculation(connection.target.node) {
                    continue;
                }
                if let (Some(&s), Some(&t)) = (
                    index.get(&connection.source.node),
                    index.get(&connection.target.node),
                ) {
                    succ[s].push(t);
                }
            }

            let mut broken = Vec::new();
            for component in strongly_connected_components(&succ) {
                let cyclic = component.len() > 1 || succ[component[0]].contains(&component[0]);
                if !cyclic {
                    continue;
                }
                let members: Vec<NodeId> = component.iter().map(|&i| ids[i]).collect();
                let edge = network
                    .connections()
                    .filter(|c| members.contains(&c.source.node) && members.contains(&c.target.node))
                    .filter(|c| !is_speculation(c.target.node))
                    .min_by_key(|c| {
                        (
                            program.key_of(c.target.node),
                            c.target.index,
                            program.key_of(c.source.node),
                            c.source.index,
                        )
                    })
                    .map(|c| (c.source, c.target));
                broken.extend(edge);
            }
            broken
        };
        if broken.is_empty() {
            return inserted;
        }
        for (source, target) in broken {
            if let Some(node) = program.splice_speculation(source, target) {
                debug!(speculation = %node, target = %target.node, "broke compiled cycle");
                inserted += 1;
            }
        }
    }
}
