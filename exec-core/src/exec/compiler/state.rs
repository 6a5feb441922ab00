//! Compilation state
//!
//! The deduplicating table shared by the tasks of one compilation round.
//! Each distinct [`ValueKey`] gets exactly one [`Entry`]. The first task to
//! request a key creates its entry and is told to spawn the task that
//! compiles it; every later request shares the entry.
//!
//! A consumer that needs an entry's output before it is known does not
//! block. It leaves its input as a waiter on the entry, and resolving the
//! entry turns every waiter into a pending connection.

use std::sync::Arc;

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::exec::program::{PendingConnection, Program};
use crate::exec::value_key::ValueKey;
use crate::vdf::{InputId, MaskedOutput};

#[derive(Debug)]
enum EntryState {
    Pending(Vec<InputId>),
    Resolved(Option<MaskedOutput>),
}

#[derive(Debug)]
pub(crate) struct Entry {
    key: ValueKey,
    state: Mutex<EntryState>,
}

impl Entry {
    fn new(key: ValueKey, compiled: Option<MaskedOutput>) -> Self {
        let state = match compiled {
            Some(output) => EntryState::Resolved(Some(output)),
            None => EntryState::Pending(Vec::new()),
        };
        Self {
            key,
            state: Mutex::new(state),
        }
    }

    pub(crate) fn key(&self) -> &ValueKey {
        &self.key
    }

    /// The output once resolved. `None` while pending or after failure.
    pub(crate) fn output(&self) -> Option<MaskedOutput> {
        match &*self.state.lock() {
            EntryState::Resolved(output) => output.clone(),
            EntryState::Pending(_) => None,
        }
    }

    pub(crate) fn is_resolved(&self) -> bool {
        matches!(&*self.state.lock(), EntryState::Resolved(_))
    }
}

#[derive(Debug, Default)]
pub(crate) struct CompilationState {
    entries: DashMap<ValueKey, Arc<Entry>>,
    connections: Mutex<Vec<PendingConnection>>,
}

impl CompilationState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The entry for `key`, and whether the caller must compile it. Keys
    /// compiled by an earlier round start out resolved.
    pub(crate) fn request(&self, key: &ValueKey, program: &Program) -> (Arc<Entry>, bool) {
        if let Some(entry) = self.entries.get(key) {
            return (entry.clone(), false);
        }
        let compiled = program.compiled_output(key);
        let needs_compile = compiled.is_none();
        match self.entries.entry(key.clone()) {
            MapEntry::Occupied(existing) => (existing.get().clone(), false),
            MapEntry::Vacant(vacant) => {
                let entry = Arc::new(Entry::new(key.clone(), compiled));
                vacant.insert(entry.clone());
                (entry, needs_compile)
            }
        }
    }

    /// Connect `target` to the output of `entry` once it is known.
    pub(crate) fn connect_when_resolved(&self, entry: &Entry, target: InputId) {
        let source = match &mut *entry.state.lock() {
            EntryState::Pending(waiters) => {
                waiters.push(target);
                return;
            }
            EntryState::Resolved(output) => output.clone(),
        };
        if let Some(source) = source {
            self.connections.lock().push(PendingConnection { source, target });
        }
    }

    /// Settle `entry`, releasing its waiters.
    pub(crate) fn resolve(&self, entry: &Entry, output: Option<MaskedOutput>) {
        let waiters = {
            let mut state = entry.state.lock();
            match std::mem::replace(&mut *state, EntryState::Resolved(output.clone())) {
                EntryState::Pending(waiters) => waiters,
                EntryState::Resolved(_) => Vec::new(),
            }
        };
        let Some(source) = output else { return };
        if waiters.is_empty() {
            return;
        }
        self.connections.lock().extend(waiters.into_iter().map(|target| PendingConnection {
            source: source.clone(),
            target,
        }));
    }

    /// Entries still pending. Empty once every task of the round has run.
    pub(crate) fn unresolved(&self) -> Vec<ValueKey> {
        let mut keys: Vec<ValueKey> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_resolved())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    pub(crate) fn take_connections(&self) -> Vec<PendingConnection> {
        std::mem::take(&mut *self.connections.lock())
    }

    /// Every key this round resolved to an output.
    pub(crate) fn resolved_outputs(&self) -> Vec<(ValueKey, MaskedOutput)> {
        self.entries
            .iter()
            .filter_map(|e| e.value().output().map(|o| (e.key().clone(), o)))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
