//! Data Managers
//!
//! A data manager is the executor's cache: for every output it holds the
//! computed vector and the mask of elements known to be valid. Two layouts
//! are provided behind the [`DataManager`] trait.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::vdf::mask::Mask;
use crate::vdf::node::{NodeId, OutputId};
use crate::vdf::vector::Vector;

/// Cached data for one output.
#[derive(Debug, Clone)]
pub struct OutputData {
    pub vector: Vector,
    /// Elements that are valid in `vector`.
    pub computed: Mask,
}

/// Storage for executor output data.
///
/// Implementations are shared between worker threads; every method takes
/// `&self`.
pub trait DataManager: Send + Sync {
    /// A copy of the cached data of `output`. Copies share element storage.
    fn get(&self, output: OutputId) -> Option<OutputData>;

    /// Merge `vector` into the cache for `output` and mark `mask` valid.
    fn store(&self, output: OutputId, vector: Vector, mask: &Mask);

    /// Mark `mask` invalid. Returns whether any valid element was cleared.
    fn invalidate(&self, output: OutputId, mask: &Mask) -> bool;

    /// Drop all data held for `node`.
    fn clear_node(&self, node: NodeId);

    /// Drop everything.
    fn clear(&self);

    /// Number of outputs with a non-empty valid mask.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The mask of valid elements of `output`.
    fn computed_mask(&self, output: OutputId) -> Option<Mask> {
        self.get(output).map(|d| d.computed)
    }
}

fn merge_into(slot: &mut Option<OutputData>, vector: Vector, mask: &Mask) {
    match slot {
        Some(existing) => merge_data(existing, vector, mask),
        None => {
            *slot = Some(OutputData {
                vector,
                computed: mask.clone(),
            });
        }
    }
}

fn merge_data(existing: &mut OutputData, vector: Vector, mask: &Mask) {
    if existing.computed.is_all_zeros() || mask.is_all_ones() {
        existing.vector = vector;
        existing.computed = mask.clone();
    } else {
        existing.vector.merge(&vector, mask);
        existing.computed = existing.computed.or(mask);
    }
}

fn invalidate_in(slot: &mut Option<OutputData>, mask: &Mask) -> bool {
    let Some(data) = slot else { return false };
    if !data.computed.overlaps(mask) {
        return false;
    }
    data.computed = data.computed.subtract(mask);
    if data.computed.is_all_zeros() {
        *slot = None;
    }
    true
}

#[derive(Debug, Default)]
struct NodeData {
    outputs: SmallVec<[Option<OutputData>; 1]>,
}

impl NodeData {
    fn slot(&mut self, index: u16) -> &mut Option<OutputData> {
        let index = index as usize;
        if self.outputs.len() <= index {
            self.outputs.resize(index + 1, None);
        }
        &mut self.outputs[index]
    }
}

/// Dense storage indexed by node index.
///
/// The table only grows under its write lock; each node's data sits behind
/// its own mutex so workers touching different nodes do not contend.
/// Clearing a node releases its entry, leaving an empty slot; since node
/// ids are never reused the table spans every id stored so far, until
/// [`DataManager::clear`]. [`HashDataManager`] holds only stored nodes.
#[derive(Debug, Default)]
pub struct VectorDataManager {
    nodes: RwLock<Vec<Option<Arc<Mutex<NodeData>>>>>,
}

impl VectorDataManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, node: NodeId) -> Arc<Mutex<NodeData>> {
        if let Some(entry) = self.existing(node) {
            return entry;
        }
        let mut nodes = self.nodes.write();
        if nodes.len() <= node.index() {
            nodes.resize(node.index() + 1, None);
        }
        nodes[node.index()].get_or_insert_with(Arc::default).clone()
    }

    fn existing(&self, node: NodeId) -> Option<Arc<Mutex<NodeData>>> {
        self.nodes.read().get(node.index())?.clone()
    }

    /// Number of nodes holding an entry.
    pub fn entry_count(&self) -> usize {
        self.nodes.read().iter().filter(|n| n.is_some()).count()
    }
}

impl DataManager for VectorDataManager {
    fn get(&self, output: OutputId) -> Option<OutputData> {
        let entry = self.existing(output.node)?;
        let data = entry.lock();
        data.outputs.get(output.index as usize)?.clone()
    }

    fn store(&self, output: OutputId, vector: Vector, mask: &Mask) {
        let entry = self.entry(output.node);
        let mut data = entry.lock();
        merge_into(data.slot(output.index), vector, mask);
    }

    fn invalidate(&self, output: OutputId, mask: &Mask) -> bool {
        let Some(entry) = self.existing(output.node) else {
            return false;
        };
        let mut data = entry.lock();
        invalidate_in(data.slot(output.index), mask)
    }

    fn clear_node(&self, node: NodeId) {
        if let Some(slot) = self.nodes.write().get_mut(node.index()) {
            *slot = None;
        }
    }

    fn clear(&self) {
        self.nodes.write().clear();
    }

    fn len(&self) -> usize {
        self.nodes
            .read()
            .iter()
            .flatten()
            .map(|n| n.lock().outputs.iter().filter(|o| o.is_some()).count())
            .sum()
    }
}

/// Sparse storage in a concurrent hash map.
#[derive(Debug, Default)]
pub struct HashDataManager {
    outputs: DashMap<OutputId, OutputData>,
}

impl HashDataManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataManager for HashDataManager {
    fn get(&self, output: OutputId) -> Option<OutputData> {
        self.outputs.get(&output).map(|d| d.clone())
    }

    fn store(&self, output: OutputId, vector: Vector, mask: &Mask) {
        match self.outputs.entry(output) {
            Entry::Occupied(mut entry) => merge_data(entry.get_mut(), vector, mask),
            Entry::Vacant(entry) => {
                entry.insert(OutputData {
                    vector,
                    computed: mask.clone(),
                });
            }
        }
    }

    fn invalidate(&self, output: OutputId, mask: &Mask) -> bool {
        let Some(mut data) = self.outputs.get_mut(&output) else {
            return false;
        };
        if !data.computed.overlaps(mask) {
            return false;
        }
        data.computed = data.computed.subtract(mask);
        let emptied = data.computed.is_all_zeros();
        drop(data);
        if emptied {
            self.outputs.remove_if(&output, |_, d| d.computed.is_all_zeros());
        }
        true
    }

    fn clear_node(&self, node: NodeId) {
        self.outputs.retain(|output, _| output.node != node);
    }

    fn clear(&self) {
        self.outputs.clear();
    }

    fn len(&self) -> usize {
        self.outputs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, ValueType};

    fn managers() -> Vec<Box<dyn DataManager>> {
        vec![
            Box::new(VectorDataManager::new()),
            Box::new(HashDataManager::new()),
        ]
    }

    fn out(node: usize) -> OutputId {
        OutputId::new(NodeId::from_index(node), 0)
    }

    #[test]
    fn store_and_get() {
        for dm in managers() {
            assert!(dm.get(out(3)).is_none());
            dm.store(out(3), Vector::splat(Value::Double(1.5), 1).unwrap(), &Mask::all_ones(1));
            let data = dm.get(out(3)).unwrap();
            assert_eq!(data.vector.get(0), Some(Value::Double(1.5)));
            assert!(data.computed.is_all_ones());
            assert_eq!(dm.len(), 1);
        }
    }

    #[test]
    fn partial_stores_merge() {
        for dm in managers() {
            let mut first = Vector::allocate(ValueType::Int, 4, &Mask::from_indices(4, [0]));
            first.set(0, Value::Int(10));
            dm.store(out(0), first, &Mask::from_indices(4, [0]));

            let mut second = Vector::allocate(ValueType::Int, 4, &Mask::from_indices(4, [3]));
            second.set(3, Value::Int(13));
            dm.store(out(0), second, &Mask::from_indices(4, [3]));

            let data = dm.get(out(0)).unwrap();
            assert_eq!(data.computed, Mask::from_indices(4, [0, 3]));
            assert_eq!(data.vector.get(0), Some(Value::Int(10)));
            assert_eq!(data.vector.get(3), Some(Value::Int(13)));
        }
    }

    #[test]
    fn invalidate_subtracts_mask() {
        for dm in managers() {
            dm.store(out(1), Vector::splat(Value::Int(1), 3).unwrap(), &Mask::all_ones(3));
            assert!(dm.invalidate(out(1), &Mask::from_indices(3, [1])));
            assert_eq!(dm.computed_mask(out(1)), Some(Mask::from_indices(3, [0, 2])));
            assert!(!dm.invalidate(out(1), &Mask::from_indices(3, [1])));
            assert!(dm.invalidate(out(1), &Mask::all_ones(3)));
            assert!(dm.get(out(1)).is_none());
            assert!(!dm.invalidate(out(9), &Mask::all_ones(1)));
        }
    }

    #[test]
    fn clear_node_and_clear() {
        for dm in managers() {
            dm.store(out(0), Vector::splat(Value::Int(1), 1).unwrap(), &Mask::all_ones(1));
            dm.store(out(1), Vector::splat(Value::Int(2), 1).unwrap(), &Mask::all_ones(1));
            dm.clear_node(NodeId::from_index(0));
            assert!(dm.get(out(0)).is_none());
            assert!(dm.get(out(1)).is_some());
            dm.clear();
            assert!(dm.is_empty());
        }
    }

    #[test]
    fn cleared_nodes_release_their_entries() {
        let dm = VectorDataManager::new();
        dm.store(out(0), Vector::splat(Value::Int(1), 1).unwrap(), &Mask::all_ones(1));
        dm.store(out(5), Vector::splat(Value::Int(2), 1).unwrap(), &Mask::all_ones(1));
        assert_eq!(dm.entry_count(), 2);

        dm.clear_node(NodeId::from_index(0));
        assert_eq!(dm.entry_count(), 1);
        assert!(!dm.invalidate(out(0), &Mask::all_ones(1)));
        assert_eq!(dm.get(out(5)).map(|d| d.computed), Some(Mask::all_ones(1)));
    }
}
