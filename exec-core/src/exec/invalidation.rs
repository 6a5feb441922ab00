//! Invalidation
//!
//! Keeps cached values and the compiled network consistent with the scene.
//!
//! A batch of scene edits is matched against the journal of every compiled
//! node. Nodes whose value may have changed are invalidated together with
//! everything downstream of them. Nodes whose compiled structure may have
//! changed are also uncompiled; the inputs they fed are marked and rebuilt
//! when a request next needs them.
//!
//! A time change invalidates only the nodes whose value actually differs
//! between the old and the new time, and their downstream closure.
//!
//! Request callbacks fire after every lock is released, so a callback may
//! call back into the system.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, info_span, trace};

use super::request::{RequestShared, RequestState};
use super::system::SystemInner;
use crate::esf::SceneEdit;
use crate::value::{InvalidationTimeInterval, Time};
use crate::vdf::{Executor, NodeId};

impl SystemInner {
    pub(crate) fn did_change_objects(&self, edits: &[SceneEdit]) {
        if edits.is_empty() {
            return;
        }
        let span = info_span!("did_change_objects", edits = edits.len());
        let _enter = span.enter();

        let notifications = {
            let _lock = self.compile_lock.lock();
            self.generation.fetch_add(1, Ordering::AcqRel);

            let matches = self.program.match_edits(edits);
            if matches.value.is_empty() && matches.structural.is_empty() {
                trace!("no compiled node depends on the edits");
                return;
            }

            let invalid = self.invalidate_downstream(
                matches.value.iter().chain(&matches.structural).copied(),
            );

            let mut uncompiled = 0;
            if !matches.structural.is_empty() {
                let protected: HashSet<NodeId> = self.request_roots(None).into_iter().collect();
                uncompiled = self
                    .program
                    .uncompile(matches.structural, &protected, self.executor.data_manager())
                    .len();
            }
            info!(invalidated = invalid.len(), uncompiled, "processed scene edits");

            self.collect_notifications(
                &invalid,
                |request| request.on_value_invalidation.is_some(),
                |state| std::mem::replace(&mut state.notify_values, false),
            )
        };

        let interval = InvalidationTimeInterval::full();
        for (request, indices) in notifications {
            if let Some(callback) = &request.on_value_invalidation {
                callback(&indices, &interval);
            }
        }
    }

    pub(crate) fn change_time(&self, time: Time) {
        let notifications = {
            let _lock = self.compile_lock.lock();
            let old = std::mem::replace(&mut *self.time.write(), time);
            if old == time {
                return;
            }
            let _span = info_span!("change_time", from = ?old, to = ?time).entered();

            let changed = self.program.time_dependent_nodes(old, time);
            if changed.is_empty() {
                trace!("no compiled node depends on time");
                return;
            }
            let invalid = self.invalidate_downstream(changed.into_iter());
            debug!(invalidated = invalid.len(), "time change invalidated nodes");

            self.collect_notifications(
                &invalid,
                |request| request.on_time_change.is_some(),
                |state| std::mem::replace(&mut state.notify_time, false),
            )
        };

        for (request, indices) in notifications {
            if let Some(callback) = &request.on_time_change {
                callback(&indices);
            }
        }
    }

    /// Discard the whole program and every cached value. Requests are
    /// recompiled on their next use.
    pub(crate) fn invalidate_all(&self) {
        let notifications = {
            let _lock = self.compile_lock.lock();
            self.generation.fetch_add(1, Ordering::AcqRel);
            self.program.reset();
            self.executor.data_manager().clear();

            let mut notifications = Vec::new();
            for request in self.live_requests() {
                let mut state = request.state.lock();
                let indices: Vec<usize> = state
                    .outputs
                    .iter()
                    .enumerate()
                    .filter(|(_, output)| output.is_some())
                    .map(|(i, _)| i)
                    .collect();
                state.outputs.clear();
                state.prepared = false;
                state.schedule = None;
                let notify = std::mem::replace(&mut state.notify_values, false);
                drop(state);
                if notify && !indices.is_empty() && request.on_value_invalidation.is_some() {
                    notifications.push((request, indices));
                }
            }
            info!("invalidated everything");
            notifications
        };

        let interval = InvalidationTimeInterval::full();
        for (request, indices) in notifications {
            if let Some(callback) = &request.on_value_invalidation {
                callback(&indices, &interval);
            }
        }
    }

    /// Invalidate `nodes` and everything downstream. Returns the nodes
    /// that were invalidated.
    ///
    /// Holds the network exclusively so no execution stores values
    /// computed from the old state after they were invalidated.
    fn invalidate_downstream(&self, nodes: impl Iterator<Item = NodeId>) -> HashSet<NodeId> {
        let network = self.program.network_exclusive();
        let closure = network.downstream_closure(nodes);
        let cleared = self.executor.invalidate_nodes(&network, &closure);
        trace!(nodes = closure.len(), cleared, "invalidated downstream closure");
        closure.into_iter().collect()
    }

    /// Requests with a callback that have an output in `invalid`, with the
    /// affected indices. `take_interest` clears and returns the request's
    /// notify flag, so each callback fires at most once per computation.
    fn collect_notifications(
        &self,
        invalid: &HashSet<NodeId>,
        has_callback: impl Fn(&RequestShared) -> bool,
        take_interest: impl Fn(&mut RequestState) -> bool,
    ) -> Vec<(Arc<RequestShared>, Vec<usize>)> {
        let mut notifications = Vec::new();
        for request in self.live_requests() {
            if !has_callback(&*request) {
                continue;
            }
            let mut state = request.state.lock();
            let indices = state.indices_in(invalid);
            if indices.is_empty() || !take_interest(&mut *state) {
                continue;
            }
            drop(state);
            notifications.push((request, indices));
        }
        notifications
    }
}
