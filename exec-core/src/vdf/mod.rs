//! Vectorized Dataflow
//!
//! The low-level evaluation layer. It knows nothing about scenes: it deals
//! in nodes with typed inputs and outputs, connections carrying masked
//! subsets of output elements, schedules, and executors.
//!
//! # Overview
//!
//! - [`Mask`] and [`Vector`] are the data model. Every output holds a vector
//!   of `size` elements; masks name the elements of interest.
//! - [`Network`] owns nodes and connections and supports isolating and
//!   freeing regions.
//! - [`schedule`] turns a set of requested outputs into a [`Schedule`]:
//!   the upstream closure in dependency order, with cycles grouped.
//! - Executors ([`SimpleExecutor`], [`ParallelExecutor`]) run a schedule,
//!   caching results in a [`DataManager`].
//!
//! # Design Decisions
//!
//! 1. Nodes are addressed by dense [`NodeId`]s and never move. Freed ids are
//!    not reused, so a stale id is detected rather than aliased.
//!
//! 2. Cycles are allowed only through speculation nodes. The scheduler
//!    reports any cycle without one and its members compute nothing.
//!
//! 3. Executors only ever compute the masked elements that are missing from
//!    the cache.

mod context;
mod executor;
mod mask;
mod network;
mod node;
mod schedule;
mod scheduler;
mod vector;

pub use context::{Context, EvalState, InputView};
pub use executor::{
    ClaimGuard, ClaimResult, DataManager, ExecutionStats, Executor, HashDataManager, OutputData,
    ParallelExecutor, SimpleExecutor, SpeculationExecutor, SpeculationOutcome, TaskSync,
    VectorDataManager,
};
pub use mask::Mask;
pub use network::{Connection, IsolatedSubnetwork, Network};
pub use node::{
    ComputeFn, ConnectionId, Input, InputId, InputSpec, MaskedOutput, Node, NodeId, NodeKind,
    NodeSpec, NodeState, Output, OutputId, OutputSpec, SPECULATION_SOURCE, SPECULATION_VALUE,
};
pub use schedule::{CycleGroup, Schedule, ScheduleTask, ScheduleUnit};
pub use scheduler::schedule;
pub(crate) use scheduler::strongly_connected_components;
pub use vector::{StorageKind, Vector};
