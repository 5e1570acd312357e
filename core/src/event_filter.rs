use std::fmt;
use std::sync::Arc;

use lattice_query::{Filter, Transformer};

use crate::event::{EventKind, MapEvent};

/// Selects change events by kind and by evaluating an optional entry filter
/// against the event's values. These are the descriptors a view registers
/// with the remote cache; the bit values are part of the wire contract and
/// must not change.
pub const INSERTED: u32 = 0x0001;
pub const UPDATED: u32 = 0x0002;
pub const DELETED: u32 = 0x0004;
/// Update whose old value failed the filter and whose new value passes.
pub const UPDATED_ENTERED: u32 = 0x0008;
/// Update whose old value passed the filter and whose new value fails.
pub const UPDATED_LEFT: u32 = 0x0010;
/// Update whose old and new values both pass the filter.
pub const UPDATED_WITHIN: u32 = 0x0020;
pub const ALL: u32 = INSERTED | UPDATED | DELETED;
/// Events that change the result of a key-set query for the filter.
pub const KEY_SET: u32 = INSERTED | DELETED | UPDATED_ENTERED | UPDATED_LEFT;

/// A predicate over events rather than entries.
pub trait EventFilter<K, V>: Send + Sync + fmt::Debug {
    fn evaluate_event(&self, event: &MapEvent<K, V>) -> bool;
}

pub struct MapEventFilter<K, V> {
    mask: u32,
    filter: Option<Arc<dyn Filter<K, V>>>,
}

impl<K, V> MapEventFilter<K, V> {
    pub fn new(mask: u32, filter: Option<Arc<dyn Filter<K, V>>>) -> Self { Self { mask, filter } }

    /// Events that insert an entry into the result of `filter`, or update one
    /// without moving it out. The add stream of a continuous view.
    pub fn added(filter: Arc<dyn Filter<K, V>>) -> Self {
        Self::new(INSERTED | UPDATED_ENTERED | UPDATED_WITHIN, Some(filter))
    }

    /// Events that move an entry out of the result of `filter`, including
    /// deletion. The remove stream of a continuous view.
    pub fn removed(filter: Arc<dyn Filter<K, V>>) -> Self { Self::new(UPDATED_LEFT | DELETED, Some(filter)) }

    /// Every event kind, gated by the filter on either side of the change.
    pub fn all(filter: Arc<dyn Filter<K, V>>) -> Self { Self::new(ALL, Some(filter)) }

    /// Events that would change a key-set query result for the filter.
    pub fn key_set(filter: Arc<dyn Filter<K, V>>) -> Self { Self::new(KEY_SET, Some(filter)) }

    pub fn mask(&self) -> u32 { self.mask }

    pub fn filter(&self) -> Option<&Arc<dyn Filter<K, V>>> { self.filter.as_ref() }

    fn test(&self, key: &K, value: Option<&V>) -> bool {
        match &self.filter {
            None => true,
            Some(f) => value.map(|v| f.evaluate(key, v)).unwrap_or(false),
        }
    }
}

impl<K, V> EventFilter<K, V> for MapEventFilter<K, V>
where
    K: Send + Sync + fmt::Debug,
    V: Send + Sync,
{
    fn evaluate_event(&self, event: &MapEvent<K, V>) -> bool {
        let key = &event.key;
        match event.kind {
            EventKind::Inserted => self.mask & INSERTED != 0 && self.test(key, event.new_value.as_ref()),
            EventKind::Deleted => self.mask & DELETED != 0 && self.test(key, event.old_value.as_ref()),
            EventKind::Updated => {
                let old_ok = self.test(key, event.old_value.as_ref());
                let new_ok = self.test(key, event.new_value.as_ref());
                (self.mask & UPDATED != 0 && (old_ok || new_ok))
                    || (self.mask & UPDATED_ENTERED != 0 && !old_ok && new_ok)
                    || (self.mask & UPDATED_LEFT != 0 && old_ok && !new_ok)
                    || (self.mask & UPDATED_WITHIN != 0 && old_ok && new_ok)
            }
        }
    }
}

impl<K, V> fmt::Debug for MapEventFilter<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapEventFilter").field("mask", &format_args!("{:#04x}", self.mask)).field("filter", &self.filter).finish()
    }
}

/// Wraps the add stream together with the transformation applied before local
/// storage. With no transformer the descriptor marks the semi-lite form,
/// which tells the server to strip old values from the events it sends.
pub struct TransformerEventFilter<K, V> {
    inner: MapEventFilter<K, V>,
    transformer: Option<Arc<dyn Transformer<V>>>,
}

impl<K, V> TransformerEventFilter<K, V> {
    pub fn new(inner: MapEventFilter<K, V>, transformer: Option<Arc<dyn Transformer<V>>>) -> Self { Self { inner, transformer } }

    pub fn transformer(&self) -> Option<&Arc<dyn Transformer<V>>> { self.transformer.as_ref() }

    pub fn inner(&self) -> &MapEventFilter<K, V> { &self.inner }
}

impl<K, V> EventFilter<K, V> for TransformerEventFilter<K, V>
where
    K: Send + Sync + fmt::Debug,
    V: Send + Sync,
{
    fn evaluate_event(&self, event: &MapEvent<K, V>) -> bool { self.inner.evaluate_event(event) }
}

impl<K, V> fmt::Debug for TransformerEventFilter<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerEventFilter").field("mask", &self.inner.mask).field("semi_lite", &self.transformer.is_none()).finish()
    }
}
