use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::{Arc, RwLock};

use lattice_query::{CompareOp, Comparator, Value, ValueExtractor};

use crate::event::{EventKind, MapEvent};
use crate::{Data, Key};

/// What a caller registers: the extracted attribute, whether the index keeps
/// it ordered, and an optional comparator over extracted values.
pub struct IndexDescriptor<V> {
    pub extractor: Arc<dyn ValueExtractor<V>>,
    pub ordered: bool,
    pub comparator: Option<Arc<dyn Comparator<Value>>>,
}

impl<V> Clone for IndexDescriptor<V> {
    fn clone(&self) -> Self {
        Self { extractor: self.extractor.clone(), ordered: self.ordered, comparator: self.comparator.clone() }
    }
}

impl<V> std::fmt::Debug for IndexDescriptor<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDescriptor").field("extractor", &self.extractor).field("ordered", &self.ordered).finish()
    }
}

struct Index<K, V> {
    descriptor: IndexDescriptor<V>,
    /// extracted value -> keys currently carrying it
    entries: BTreeMap<Value, BTreeSet<K>>,
}

/// The indexes a view maintains over its locally cached values, keyed by
/// extractor id. Kept current by replaying the view's own event stream
/// (a synchronous registry subscription), so index content always agrees
/// with the store on the mutating thread.
///
/// This is a naive per-attribute map; it answers single-comparison filters
/// without a scan and is rebuilt from the store when an index is added after
/// population.
pub struct IndexRegistry<K: Key, V: Data> {
    indexes: RwLock<HashMap<String, Index<K, V>>>,
}

impl<K: Key, V: Data> IndexRegistry<K, V> {
    pub fn new() -> Self { Self { indexes: RwLock::new(HashMap::new()) } }

    /// Register an index and build it from the given entries. Replaces any
    /// previous index on the same extractor id.
    pub fn add(&self, descriptor: IndexDescriptor<V>, entries: &[(K, V)]) {
        let id = descriptor.extractor.id();
        let mut index = Index { descriptor, entries: BTreeMap::new() };
        for (key, value) in entries {
            if let Some(extracted) = index.descriptor.extractor.extract(value) {
                index.entries.entry(extracted).or_default().insert(key.clone());
            }
        }
        self.indexes.write().unwrap().insert(id, index);
    }

    pub fn remove(&self, extractor_id: &str) -> Option<IndexDescriptor<V>> {
        self.indexes.write().unwrap().remove(extractor_id).map(|ix| ix.descriptor)
    }

    pub fn contains(&self, extractor_id: &str) -> bool { self.indexes.read().unwrap().contains_key(extractor_id) }

    pub fn descriptors(&self) -> Vec<IndexDescriptor<V>> {
        self.indexes.read().unwrap().values().map(|ix| ix.descriptor.clone()).collect()
    }

    /// Drop all registered indexes.
    pub fn clear(&self) { self.indexes.write().unwrap().clear(); }

    /// Drop index content but keep registrations; used when the store is
    /// emptied without per-entry events.
    pub fn reset_entries(&self) {
        for index in self.indexes.write().unwrap().values_mut() {
            index.entries.clear();
        }
    }

    /// Apply one view event to every index.
    pub fn apply_event(&self, event: &MapEvent<K, V>) {
        let mut indexes = self.indexes.write().unwrap();
        if indexes.is_empty() {
            return;
        }
        for index in indexes.values_mut() {
            if event.kind != EventKind::Inserted {
                if let Some(old) = event.old_value.as_ref().and_then(|v| index.descriptor.extractor.extract(v)) {
                    if let Some(keys) = index.entries.get_mut(&old) {
                        keys.remove(&event.key);
                        if keys.is_empty() {
                            index.entries.remove(&old);
                        }
                    }
                }
            }
            if event.kind != EventKind::Deleted {
                if let Some(new) = event.new_value.as_ref().and_then(|v| index.descriptor.extractor.extract(v)) {
                    index.entries.entry(new).or_default().insert(event.key.clone());
                }
            }
        }
    }

    /// Keys satisfying `extracted(value) <op> operand`, if an index exists
    /// for the extractor id. `None` means the caller must scan.
    pub fn lookup(&self, extractor_id: &str, op: CompareOp, operand: &Value) -> Option<Vec<K>> {
        let indexes = self.indexes.read().unwrap();
        let index = indexes.get(extractor_id)?;
        let mut out = Vec::new();
        match op {
            CompareOp::Eq => {
                if let Some(keys) = index.entries.get(operand) {
                    out.extend(keys.iter().cloned());
                }
            }
            CompareOp::Ne => {
                for (value, keys) in index.entries.iter() {
                    if value != operand {
                        out.extend(keys.iter().cloned());
                    }
                }
            }
            CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
                let range: (Bound<&Value>, Bound<&Value>) = match op {
                    CompareOp::Gt => (Bound::Excluded(operand), Bound::Unbounded),
                    CompareOp::Ge => (Bound::Included(operand), Bound::Unbounded),
                    CompareOp::Lt => (Bound::Unbounded, Bound::Excluded(operand)),
                    _ => (Bound::Unbounded, Bound::Included(operand)),
                };
                for (_, keys) in index.entries.range::<Value, _>(range) {
                    out.extend(keys.iter().cloned());
                }
            }
        }
        Some(out)
    }
}

impl<K: Key, V: Data> Default for IndexRegistry<K, V> {
    fn default() -> Self { Self::new() }
}
