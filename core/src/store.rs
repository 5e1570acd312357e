use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::cache::CacheName;
use crate::error::CacheError;
use crate::event::MapEvent;
use crate::registry::ListenerRegistry;
use crate::{Data, Key};

/// What a view keeps locally for each entry it contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Only membership; a present key maps to a sentinel and reads go to the
    /// remote cache.
    Keys,
    /// Membership and the current (possibly transformed) value.
    Values,
}

/// The materialized content of a view: an ordered key to value mapping with
/// an observation side-channel. In `Keys` mode the mapping stores a
/// present-without-value sentinel instead of the value.
///
/// Mutations emit events into the subscribed registry synchronously on the
/// mutating thread. Only the view engine mutates the store.
pub struct LocalStore<K: Key, V: Data> {
    name: CacheName,
    mode: RwLock<StoreMode>,
    map: RwLock<BTreeMap<K, Option<V>>>,
    /// Bumped by every mutation; cursors use it to detect concurrent change.
    version: AtomicU64,
    sink: RwLock<Option<Weak<ListenerRegistry<K, V>>>>,
}

impl<K: Key, V: Data> LocalStore<K, V> {
    pub fn new(name: CacheName, mode: StoreMode) -> Self {
        Self {
            name,
            mode: RwLock::new(mode),
            map: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
            sink: RwLock::new(None),
        }
    }

    pub fn mode(&self) -> StoreMode { *self.mode.read().unwrap() }

    /// Switch between key-only and cached-values representation. Drops all
    /// content silently; the caller resynchronizes afterwards.
    pub fn set_mode(&self, mode: StoreMode) {
        let mut guard = self.mode.write().unwrap();
        if *guard != mode {
            *guard = mode;
            self.map.write().unwrap().clear();
            self.version.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn subscribe(&self, registry: &Arc<ListenerRegistry<K, V>>) {
        *self.sink.write().unwrap() = Some(Arc::downgrade(registry));
    }

    pub fn unsubscribe(&self) { *self.sink.write().unwrap() = None; }

    fn emit(&self, event: MapEvent<K, V>) {
        let sink = self.sink.read().unwrap().clone();
        if let Some(registry) = sink.and_then(|weak| weak.upgrade()) {
            registry.publish(&event);
        }
    }

    pub fn version(&self) -> u64 { self.version.load(Ordering::Acquire) }

    // ----- reads ---------------------------------------------------------

    pub fn get(&self, key: &K) -> Option<V> { self.map.read().unwrap().get(key).and_then(|slot| slot.clone()) }

    pub fn contains_key(&self, key: &K) -> bool { self.map.read().unwrap().contains_key(key) }

    pub fn len(&self) -> usize { self.map.read().unwrap().len() }

    pub fn is_empty(&self) -> bool { self.map.read().unwrap().is_empty() }

    pub fn keys(&self) -> Vec<K> { self.map.read().unwrap().keys().cloned().collect() }

    /// Ordered snapshot of keys and stored slots (sentinels included).
    pub fn snapshot(&self) -> Vec<(K, Option<V>)> {
        self.map.read().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Ordered snapshot of entries that carry values.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.map.read().unwrap().iter().filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v))).collect()
    }

    // ----- mutations -----------------------------------------------------

    /// Insert or update an entry. In `Keys` mode the value is discarded and a
    /// sentinel is stored; emitted events then carry no values. Returns the
    /// previously stored value, if any.
    pub fn put(&self, key: K, value: Option<V>) -> Option<V> {
        let stored = match self.mode() {
            StoreMode::Values => value,
            StoreMode::Keys => None,
        };
        let (old, existed) = {
            let mut map = self.map.write().unwrap();
            let old = map.insert(key.clone(), stored.clone());
            self.version.fetch_add(1, Ordering::AcqRel);
            match old {
                Some(slot) => (slot, true),
                None => (None, false),
            }
        };
        let event = if existed {
            MapEvent::updated(self.name.clone(), key, old.clone(), stored)
        } else {
            MapEvent::inserted(self.name.clone(), key, stored)
        };
        self.emit(event);
        old
    }

    /// Remove an entry if present, emitting a deletion. Returns the stored
    /// value, if any.
    pub fn remove(&self, key: &K) -> Option<V> {
        let removed = {
            let mut map = self.map.write().unwrap();
            let removed = map.remove(key);
            if removed.is_some() {
                self.version.fetch_add(1, Ordering::AcqRel);
            }
            removed
        };
        match removed {
            Some(old) => {
                self.emit(MapEvent::deleted(self.name.clone(), key.clone(), old.clone()));
                old
            }
            None => None,
        }
    }

    /// Drop every entry, emitting one deletion per entry in key order.
    pub fn clear(&self) {
        let drained: Vec<(K, Option<V>)> = {
            let mut map = self.map.write().unwrap();
            self.version.fetch_add(1, Ordering::AcqRel);
            std::mem::take(&mut *map).into_iter().collect()
        };
        for (key, old) in drained {
            self.emit(MapEvent::deleted(self.name.clone(), key, old));
        }
    }

    /// Drop every entry without emitting anything.
    pub fn truncate(&self) {
        let mut map = self.map.write().unwrap();
        map.clear();
        self.version.fetch_add(1, Ordering::AcqRel);
    }

    /// Cursor over a snapshot of the key set. The cursor is invalidated by
    /// any store mutation it did not apply itself; removal goes through the
    /// store (and therefore through the registry), never through an alias.
    pub fn cursor(&self) -> StoreCursor<'_, K, V> {
        StoreCursor { store: self, keys: self.keys(), pos: 0, version: self.version(), current: None }
    }
}

impl<K: Key, V: Data> std::fmt::Debug for LocalStore<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LocalStore({}, {:?}, {} entries)", self.name, self.mode(), self.len())
    }
}

pub struct StoreCursor<'a, K: Key, V: Data> {
    store: &'a LocalStore<K, V>,
    keys: Vec<K>,
    pos: usize,
    version: u64,
    current: Option<K>,
}

impl<K: Key, V: Data> StoreCursor<'_, K, V> {
    fn check_version(&self) -> Result<(), CacheError> {
        if self.store.version() != self.version {
            return Err(CacheError::ConcurrentModification);
        }
        Ok(())
    }

    /// Advance to the next entry.
    pub fn next(&mut self) -> Result<Option<(K, Option<V>)>, CacheError> {
        self.check_version()?;
        match self.keys.get(self.pos) {
            None => {
                self.current = None;
                Ok(None)
            }
            Some(key) => {
                self.pos += 1;
                self.current = Some(key.clone());
                let slot = self.store.map.read().unwrap().get(key).cloned();
                Ok(slot.map(|v| (key.clone(), v)))
            }
        }
    }

    /// Remove the entry the cursor is positioned on. The removal is applied
    /// by the store and observed by the registry; the cursor stays valid.
    pub fn remove(&mut self) -> Result<Option<V>, CacheError> {
        self.check_version()?;
        let key = self.current.clone().ok_or_else(|| CacheError::invalid_state("cursor is not positioned on an entry"))?;
        let old = self.store.remove(&key);
        self.version = self.store.version();
        Ok(old)
    }
}
