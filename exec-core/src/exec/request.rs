//! Requests
//!
//! A [`Request`] is a list of value keys a host wants computed together.
//! The system compiles and schedules it on first use and keeps the result
//! until scene edits or topology changes make it stale.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use super::system::SystemInner;
use super::value_key::ValueKey;
use crate::value::InvalidationTimeInterval;
use crate::vdf::{MaskedOutput, NodeId, Schedule};

/// Called with the indices of a request whose values were invalidated by a
/// scene edit, and the time interval over which they are invalid.
pub type ValueInvalidationCallback = Box<dyn Fn(&[usize], &InvalidationTimeInterval) + Send + Sync>;

/// Called with the indices of a request whose values changed with time.
pub type TimeChangeCallback = Box<dyn Fn(&[usize]) + Send + Sync>;

#[derive(Default)]
pub(crate) struct RequestState {
    pub(crate) outputs: Vec<Option<MaskedOutput>>,
    pub(crate) schedule: Option<Arc<Schedule>>,
    pub(crate) prepared: bool,
    /// Scene edit generation the outputs were compiled against.
    pub(crate) generation: u64,
    /// Computed since the value invalidation callback last fired.
    pub(crate) notify_values: bool,
    /// Computed since the time change callback last fired.
    pub(crate) notify_time: bool,
}

impl RequestState {
    /// Indices whose output node is in `nodes`.
    pub(crate) fn indices_in(&self, nodes: &HashSet<NodeId>) -> Vec<usize> {
        self.outputs
            .iter()
            .enumerate()
            .filter(|(_, output)| output.as_ref().is_some_and(|o| nodes.contains(&o.node())))
            .map(|(i, _)| i)
            .collect()
    }
}

pub(crate) struct RequestShared {
    pub(crate) id: u64,
    pub(crate) keys: Vec<ValueKey>,
    pub(crate) valid: bool,
    pub(crate) on_value_invalidation: Option<ValueInvalidationCallback>,
    pub(crate) on_time_change: Option<TimeChangeCallback>,
    pub(crate) state: Mutex<RequestState>,
}

impl RequestShared {
    pub(crate) fn new(
        id: u64,
        keys: Vec<ValueKey>,
        on_value_invalidation: Option<ValueInvalidationCallback>,
        on_time_change: Option<TimeChangeCallback>,
    ) -> Self {
        let valid = keys.iter().all(ValueKey::is_valid);
        Self {
            id,
            keys,
            valid,
            on_value_invalidation,
            on_time_change,
            state: Mutex::new(RequestState::default()),
        }
    }

    /// Live output nodes of this request.
    pub(crate) fn roots(&self) -> Vec<NodeId> {
        self.state
            .lock()
            .outputs
            .iter()
            .flatten()
            .map(MaskedOutput::node)
            .collect()
    }
}

/// A set of value keys computed together. Dropping the request releases
/// its interest in the compiled network.
pub struct Request {
    pub(crate) shared: Arc<RequestShared>,
    pub(crate) system: Weak<SystemInner>,
}

impl Request {
    /// Whether every key is well formed.
    pub fn is_valid(&self) -> bool {
        self.shared.valid
    }

    pub fn keys(&self) -> &[ValueKey] {
        &self.shared.keys
    }

    pub fn len(&self) -> usize {
        self.shared.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.keys.is_empty()
    }

    /// Whether the request's compiled outputs and schedule are current.
    pub fn is_prepared(&self) -> bool {
        self.shared.state.lock().prepared
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.shared.id)
            .field("keys", &self.shared.keys.len())
            .field("valid", &self.shared.valid)
            .finish()
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        if let Some(system) = self.system.upgrade() {
            system.requests.lock().shift_remove(&self.shared.id);
            trace!(request = self.shared.id, "released request");
        }
    }
}
