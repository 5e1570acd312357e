use serde::{Deserialize, Serialize};

use crate::cache::CacheName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Inserted,
    Updated,
    Deleted,
}

/// An observed change to a single cache entry. Events are value objects; they
/// live for the duration of one dispatch and compare by content.
///
/// A "lite" event is one whose `old_value`/`new_value` have been elided
/// because no standard subscriber needs them.
#[derive(Debug, Clone, PartialEq)]
pub struct MapEvent<K, V> {
    pub kind: EventKind,
    pub key: K,
    pub old_value: Option<V>,
    pub new_value: Option<V>,
    pub source: CacheName,
}

impl<K, V> MapEvent<K, V> {
    pub fn inserted(source: CacheName, key: K, new_value: Option<V>) -> Self {
        Self { kind: EventKind::Inserted, key, old_value: None, new_value, source }
    }

    pub fn updated(source: CacheName, key: K, old_value: Option<V>, new_value: Option<V>) -> Self {
        Self { kind: EventKind::Updated, key, old_value, new_value, source }
    }

    pub fn deleted(source: CacheName, key: K, old_value: Option<V>) -> Self {
        Self { kind: EventKind::Deleted, key, old_value, new_value: None, source }
    }
}

impl<K: Clone, V: Clone> MapEvent<K, V> {
    /// Copy of this event with both values elided.
    pub fn to_lite(&self) -> Self {
        Self { kind: self.kind, key: self.key.clone(), old_value: None, new_value: None, source: self.source.clone() }
    }
}

impl<K: std::fmt::Debug, V> std::fmt::Display for MapEvent<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}[{:?}] on {}", self.kind, self.key, self.source)
    }
}
