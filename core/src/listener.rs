use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::event::{EventKind, MapEvent};

/// Receives change events for a cache or a view of one. Hooks are invoked on
/// the dispatcher task for asynchronous subscriptions, or on the publishing
/// thread for engine-internal synchronous ones; implementations must not
/// assume any particular caller thread.
pub trait MapListener<K, V>: Send + Sync {
    fn entry_inserted(&self, event: &MapEvent<K, V>);
    fn entry_updated(&self, event: &MapEvent<K, V>);
    fn entry_deleted(&self, event: &MapEvent<K, V>);

    /// Route an event to the hook matching its kind.
    fn dispatch(&self, event: &MapEvent<K, V>) {
        match event.kind {
            EventKind::Inserted => self.entry_inserted(event),
            EventKind::Updated => self.entry_updated(event),
            EventKind::Deleted => self.entry_deleted(event),
        }
    }
}

/// Identity wrapper for listener registration and removal. Two handles are
/// equal iff they wrap the same allocation, so registering the same `Arc`
/// twice creates two subscriptions of one listener.
pub struct ListenerHandle<K, V>(Arc<dyn MapListener<K, V>>);

impl<K, V> ListenerHandle<K, V> {
    pub fn new(listener: Arc<dyn MapListener<K, V>>) -> Self { Self(listener) }

    pub fn listener(&self) -> &Arc<dyn MapListener<K, V>> { &self.0 }

    pub fn dispatch(&self, event: &MapEvent<K, V>) { self.0.dispatch(event) }
}

impl<K, V> Clone for ListenerHandle<K, V> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<K, V> PartialEq for ListenerHandle<K, V> {
    fn eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}
impl<K, V> Eq for ListenerHandle<K, V> {}

impl<K, V> Hash for ListenerHandle<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) { (Arc::as_ptr(&self.0) as *const () as usize).hash(state) }
}

impl<K, V> fmt::Debug for ListenerHandle<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ListenerHandle({:p})", Arc::as_ptr(&self.0))
    }
}

struct FnListener<K, V, F: Fn(&MapEvent<K, V>)> {
    f: F,
    _marker: std::marker::PhantomData<fn(&K, &V)>,
}

impl<K, V, F> MapListener<K, V> for FnListener<K, V, F>
where F: Fn(&MapEvent<K, V>) + Send + Sync
{
    fn entry_inserted(&self, event: &MapEvent<K, V>) { (self.f)(event) }
    fn entry_updated(&self, event: &MapEvent<K, V>) { (self.f)(event) }
    fn entry_deleted(&self, event: &MapEvent<K, V>) { (self.f)(event) }
}

/// Wrap a closure as a listener that receives every event kind.
pub fn event_fn<K, V, F>(f: F) -> Arc<dyn MapListener<K, V>>
where
    K: 'static,
    V: 'static,
    F: Fn(&MapEvent<K, V>) + Send + Sync + 'static,
{
    Arc::new(FnListener { f, _marker: std::marker::PhantomData })
}
