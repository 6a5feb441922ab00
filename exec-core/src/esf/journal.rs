//! Journals
//!
//! A [`Journal`] records which parts of the scene a compilation step read,
//! and why. Every journaled accessor on the scene interfaces adds the path
//! it touched together with the [`EditReasons`] that would change its answer.
//! After a scene edit, a node is affected exactly when its journal
//! [matches](Journal::matches) one of the [`SceneEdit`]s.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use indexmap::IndexMap;
use serde::Serialize;

use super::path::ScenePath;

/// A set of edit categories.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct EditReasons(u8);

impl EditReasons {
    pub const NONE: Self = Self(0);
    /// The object was created, removed, or changed so much that anything
    /// read from it is stale. Matches the path and everything beneath it.
    pub const RESYNCED_OBJECT: Self = Self(1 << 0);
    pub const CHANGED_PROPERTY_LIST: Self = Self(1 << 1);
    pub const CHANGED_TARGET_PATHS: Self = Self(1 << 2);
    pub const CHANGED_CONNECTION_PATHS: Self = Self(1 << 3);
    pub const CHANGED_METADATA: Self = Self(1 << 4);
    /// An authored attribute value changed: default or time samples.
    pub const CHANGED_PROPERTY_VALUE: Self = Self(1 << 5);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::RESYNCED_OBJECT, "ResyncedObject"),
        (Self::CHANGED_PROPERTY_LIST, "ChangedPropertyList"),
        (Self::CHANGED_TARGET_PATHS, "ChangedTargetPaths"),
        (Self::CHANGED_CONNECTION_PATHS, "ChangedConnectionPaths"),
        (Self::CHANGED_METADATA, "ChangedMetadata"),
        (Self::CHANGED_PROPERTY_VALUE, "ChangedPropertyValue"),
    ];

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether any reason requires the affected nodes to be rebuilt, as
    /// opposed to recomputed.
    pub fn is_structural(self) -> bool {
        !(self & Self(!Self::CHANGED_PROPERTY_VALUE.0)).is_empty()
    }
}

impl BitOr for EditReasons {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for EditReasons {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for EditReasons {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Debug for EditReasons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("None");
        }
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(reason, _)| self.contains(*reason))
            .map(|(_, name)| *name)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// One scene change, as reported by the scene layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SceneEdit {
    pub path: ScenePath,
    pub reasons: EditReasons,
}

impl SceneEdit {
    pub fn new(path: ScenePath, reasons: EditReasons) -> Self {
        Self { path, reasons }
    }

    pub fn resync(path: ScenePath) -> Self {
        Self::new(path, EditReasons::RESYNCED_OBJECT)
    }
}

/// Paths and reasons a compilation step depended on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Journal {
    entries: IndexMap<ScenePath, EditReasons>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, path: ScenePath, reasons: EditReasons) {
        *self.entries.entry(path).or_default() |= reasons;
    }

    /// Add every entry of `other`.
    pub fn merge(&mut self, other: &Journal) {
        for (path, reasons) in &other.entries {
            self.add(path.clone(), *reasons);
        }
    }

    pub fn reasons(&self, path: &ScenePath) -> EditReasons {
        self.entries.get(path).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ScenePath, EditReasons)> {
        self.entries.iter().map(|(p, r)| (p, *r))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The reasons of `edit` that affect what this journal recorded.
    ///
    /// A resync invalidates every recorded read at or beneath its path and
    /// is returned as [`EditReasons::RESYNCED_OBJECT`]. Other reasons match
    /// only the exact path they were recorded for.
    pub fn matches(&self, edit: &SceneEdit) -> EditReasons {
        let mut matched = EditReasons::NONE;
        if edit.reasons.contains(EditReasons::RESYNCED_OBJECT)
            && self.entries.keys().any(|path| path.has_prefix(&edit.path))
        {
            matched |= EditReasons::RESYNCED_OBJECT;
        }
        matched |= self.reasons(&edit.path) & edit.reasons;
        matched
    }
}

/// Record `reasons` for `path` if a journal is present.
pub(crate) fn record(journal: Option<&mut Journal>, path: &ScenePath, reasons: EditReasons) {
    if let Some(journal) = journal {
        journal.add(path.clone(), reasons);
    }
}
