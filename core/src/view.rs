mod builder;
mod listeners;
mod sync;

pub use builder::ViewBuilder;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::debug;

use lattice_query::filter::merge;
use lattice_query::{Comparator, Filter, Transformer, Value, ValueExtractor};

use crate::cache::{CacheName, DeactivationListener, EntryAggregator, EntryProcessor, MemberListener, NamedCache, NamedCacheSupplier};
use crate::dispatcher::EventDispatcher;
use crate::error::CacheError;
use crate::event::MapEvent;
use crate::index::{IndexDescriptor, IndexRegistry};
use crate::listener::{event_fn, ListenerHandle, MapListener};
use crate::registry::ListenerRegistry;
use crate::state::{StateCell, ViewState};
use crate::store::{LocalStore, StoreMode};
use crate::{Data, Key};

/// Observes the lifecycle of a view itself, as opposed to its entries:
/// release and destroy of the view, and truncation of the backing cache
/// (which empties the view without per-entry events).
pub trait ViewLifecycleListener: Send + Sync {
    fn view_released(&self) {}
    fn view_destroyed(&self) {}
    fn view_truncated(&self) {}
}

pub(crate) struct ServerListeners<K: Key, V: Data> {
    pub(crate) add: Option<Arc<dyn MapListener<K, V>>>,
    pub(crate) remove: Option<Arc<dyn MapListener<K, V>>>,
    pub(crate) deactivation: Option<Arc<dyn DeactivationListener>>,
    pub(crate) member: Option<Arc<dyn MemberListener>>,
}

impl<K: Key, V: Data> ServerListeners<K, V> {
    fn empty() -> Self { Self { add: None, remove: None, deactivation: None, member: None } }
}

pub(crate) struct ViewInner<K: Key, V: Data> {
    pub(crate) supplier: Arc<dyn NamedCacheSupplier<K, V>>,
    pub(crate) cache: Mutex<Option<Arc<dyn NamedCache<K, V>>>>,
    pub(crate) name: CacheName,
    pub(crate) name_supplier: Mutex<Option<Arc<dyn Fn() -> String + Send + Sync>>>,
    pub(crate) filter: Arc<dyn Filter<K, V>>,
    pub(crate) transformer: Option<Arc<dyn Transformer<V>>>,
    pub(crate) cache_values: AtomicBool,
    pub(crate) read_only: AtomicBool,
    /// Milliseconds a disconnected view keeps serving stale local reads
    /// before an access triggers resynchronization. Zero or less means the
    /// view cannot be used while disconnected.
    pub(crate) reconnect_interval: AtomicI64,
    pub(crate) last_sync_millis: AtomicI64,
    pub(crate) state: StateCell,
    pub(crate) active: AtomicBool,
    pub(crate) destroyed: AtomicBool,
    pub(crate) store: LocalStore<K, V>,
    pub(crate) registry: Arc<ListenerRegistry<K, V>>,
    pub(crate) dispatcher: Arc<EventDispatcher<K, V>>,
    pub(crate) indexes: Arc<IndexRegistry<K, V>>,
    /// Keys of events that arrived while a synchronization was fetching
    /// initial content. `Some` only for the duration of one sync cycle.
    pub(crate) sync_log: Mutex<Option<HashSet<K>>>,
    /// Serializes synchronization against itself and queues user operations
    /// behind an in-flight sync.
    pub(crate) monitor: tokio::sync::Mutex<()>,
    pub(crate) lifecycle: Mutex<Vec<Arc<dyn ViewLifecycleListener>>>,
    pub(crate) server_listeners: Mutex<ServerListeners<K, V>>,
}

/// A client-resident materialized view of the subset of a remote cache
/// selected by a filter, kept coherent by server event subscriptions and
/// exposing the full cache surface. Reads are served from local memory;
/// writes are validated against the view's filter and delegated to the
/// remote cache, coming back through the event stream.
pub struct CacheView<K: Key, V: Data>(pub(crate) Arc<ViewInner<K, V>>);

impl<K: Key, V: Data> Clone for CacheView<K, V> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

/// Weak handle used by the engine's server-side listeners, so that a view
/// can be dropped while subscriptions are still registered remotely.
pub(crate) struct WeakCacheView<K: Key, V: Data>(Weak<ViewInner<K, V>>);

impl<K: Key, V: Data> WeakCacheView<K, V> {
    pub(crate) fn upgrade(&self) -> Option<CacheView<K, V>> { self.0.upgrade().map(CacheView) }
}

impl<K: Key, V: Data> Clone for WeakCacheView<K, V> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

pub(crate) fn now_millis() -> i64 { chrono::Utc::now().timestamp_millis() }

impl<K: Key, V: Data> CacheView<K, V> {
    pub(crate) fn materialize(
        supplier: Arc<dyn NamedCacheSupplier<K, V>>,
        filter: Arc<dyn Filter<K, V>>,
        transformer: Option<Arc<dyn Transformer<V>>>,
        cache_values: bool,
        read_only: bool,
        reconnect_interval_ms: i64,
    ) -> Self {
        let cache = supplier.get();
        let name = cache.cache_name();
        let dispatcher = Arc::new(EventDispatcher::new());
        let registry = Arc::new(ListenerRegistry::new(dispatcher.clone()));
        let indexes = Arc::new(IndexRegistry::new());
        let mode = if cache_values { StoreMode::Values } else { StoreMode::Keys };

        // local indexes follow the view's own event stream synchronously
        let weak_indexes = Arc::downgrade(&indexes);
        registry.add_internal(ListenerHandle::new(event_fn(move |event: &MapEvent<K, V>| {
            if let Some(indexes) = weak_indexes.upgrade() {
                indexes.apply_event(event);
            }
        })));

        Self(Arc::new(ViewInner {
            supplier,
            cache: Mutex::new(Some(cache)),
            name: name.clone(),
            name_supplier: Mutex::new(None),
            filter,
            transformer,
            cache_values: AtomicBool::new(cache_values),
            read_only: AtomicBool::new(read_only),
            reconnect_interval: AtomicI64::new(reconnect_interval_ms),
            last_sync_millis: AtomicI64::new(0),
            state: StateCell::new(),
            active: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            store: LocalStore::new(name, mode),
            registry,
            dispatcher,
            indexes,
            sync_log: Mutex::new(None),
            monitor: tokio::sync::Mutex::new(()),
            lifecycle: Mutex::new(Vec::new()),
            server_listeners: Mutex::new(ServerListeners::empty()),
        }))
    }

    pub(crate) fn weak(&self) -> WeakCacheView<K, V> { WeakCacheView(Arc::downgrade(&self.0)) }

    // ----- accessors -----------------------------------------------------

    pub fn state(&self) -> ViewState { self.0.state.get() }

    pub fn is_active(&self) -> bool { self.0.active.load(Ordering::Acquire) && !self.0.destroyed.load(Ordering::Acquire) }

    pub fn is_read_only(&self) -> bool { self.0.read_only.load(Ordering::Acquire) }

    pub fn is_cache_values(&self) -> bool { self.0.cache_values.load(Ordering::Acquire) }

    pub fn filter(&self) -> &Arc<dyn Filter<K, V>> { &self.0.filter }

    pub fn transformer(&self) -> Option<&Arc<dyn Transformer<V>>> { self.0.transformer.as_ref() }

    pub fn reconnect_interval(&self) -> i64 { self.0.reconnect_interval.load(Ordering::Acquire) }

    pub fn set_reconnect_interval(&self, millis: i64) { self.0.reconnect_interval.store(millis, Ordering::Release); }

    pub fn cache_name(&self) -> String {
        match &*self.0.name_supplier.lock().unwrap() {
            Some(supplier) => supplier(),
            None => self.0.name.to_string(),
        }
    }

    pub fn set_cache_name_supplier(&self, supplier: Option<Arc<dyn Fn() -> String + Send + Sync>>) {
        *self.0.name_supplier.lock().unwrap() = supplier;
    }

    /// The remote cache this view sits on, re-obtained from the supplier if
    /// the previous handle was discarded by a release.
    pub fn cache(&self) -> Arc<dyn NamedCache<K, V>> {
        let mut guard = self.0.cache.lock().unwrap();
        match &*guard {
            Some(cache) => cache.clone(),
            None => {
                let cache = self.0.supplier.get();
                *guard = Some(cache.clone());
                cache
            }
        }
    }

    /// Make the view read-only. The latch is one-way: clearing it again is
    /// an invalid-state error.
    pub fn set_read_only(&self, read_only: bool) -> Result<(), CacheError> {
        if read_only {
            self.0.read_only.store(true, Ordering::Release);
            Ok(())
        } else if self.is_read_only() {
            Err(CacheError::invalid_state("read-only view cannot be made writable"))
        } else {
            Ok(())
        }
    }

    /// Switch between key-only and cached-values mode. Promotion triggers a
    /// resynchronization that fetches values; demotion discards local values
    /// and is rejected while any subscription requires them.
    pub async fn set_cache_values(&self, cache_values: bool) -> Result<(), CacheError> {
        if cache_values == self.is_cache_values() {
            return Ok(());
        }
        if !cache_values {
            if self.0.transformer.is_some() {
                return Err(CacheError::invalid_state("transforming view must cache values"));
            }
            if self.0.registry.is_observed() {
                return Err(CacheError::invalid_state("observed view must cache values"));
            }
        }
        debug!("switching cache_values to {}", cache_values);
        self.0.cache_values.store(cache_values, Ordering::Release);
        self.0.store.set_mode(if cache_values { StoreMode::Values } else { StoreMode::Keys });
        self.0.indexes.reset_entries();
        self.configure_synchronization(true).await
    }

    // ----- map surface ---------------------------------------------------

    pub async fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        self.ensure_synchronized().await?;
        if self.is_cache_values() {
            Ok(self.0.store.get(key))
        } else if !self.0.store.contains_key(key) {
            // the key set is authoritative for the view
            Ok(None)
        } else {
            // membership is local, values live remotely
            self.cache().get(key).await
        }
    }

    pub async fn get_all(&self, keys: &[K]) -> Result<Vec<(K, V)>, CacheError> {
        self.ensure_synchronized().await?;
        if self.is_cache_values() {
            Ok(keys.iter().filter_map(|k| self.0.store.get(k).map(|v| (k.clone(), v))).collect())
        } else {
            let present: Vec<K> = keys.iter().filter(|k| self.0.store.contains_key(k)).cloned().collect();
            self.cache().get_all(&present).await
        }
    }

    pub async fn contains_key(&self, key: &K) -> Result<bool, CacheError> {
        self.ensure_synchronized().await?;
        Ok(self.0.store.contains_key(key))
    }

    pub async fn len(&self) -> Result<usize, CacheError> {
        self.ensure_synchronized().await?;
        Ok(self.0.store.len())
    }

    pub async fn is_empty(&self) -> Result<bool, CacheError> { Ok(self.len().await? == 0) }

    pub async fn keys(&self) -> Result<Vec<K>, CacheError> {
        self.ensure_synchronized().await?;
        Ok(self.0.store.keys())
    }

    pub async fn entries(&self) -> Result<Vec<(K, V)>, CacheError> {
        self.ensure_synchronized().await?;
        if self.is_cache_values() {
            Ok(self.0.store.entries())
        } else {
            let keys = self.0.store.keys();
            self.cache().get_all(&keys).await
        }
    }

    pub async fn put(&self, key: K, value: V) -> Result<Option<V>, CacheError> {
        self.check_read_only()?;
        self.check_entry(&key, &value)?;
        self.ensure_synchronized().await?;
        self.cache().put(key, value).await
    }

    pub async fn put_with_ttl(&self, key: K, value: V, ttl: Duration) -> Result<Option<V>, CacheError> {
        self.check_read_only()?;
        self.check_entry(&key, &value)?;
        self.ensure_synchronized().await?;
        self.cache().put_with_ttl(key, value, ttl).await
    }

    pub async fn put_all(&self, entries: Vec<(K, V)>) -> Result<(), CacheError> {
        self.check_read_only()?;
        for (key, value) in &entries {
            self.check_entry(key, value)?;
        }
        self.ensure_synchronized().await?;
        self.cache().put_all(entries).await
    }

    pub async fn remove(&self, key: &K) -> Result<Option<V>, CacheError> {
        self.check_read_only()?;
        self.ensure_synchronized().await?;
        self.cache().remove(key).await
    }

    pub async fn remove_if_equal(&self, key: &K, expected: V) -> Result<bool, CacheError> {
        self.check_read_only()?;
        self.ensure_synchronized().await?;
        self.cache().remove_if_equal(key, expected).await
    }

    pub async fn replace(&self, key: K, value: V) -> Result<Option<V>, CacheError> {
        self.check_read_only()?;
        self.check_entry(&key, &value)?;
        self.ensure_synchronized().await?;
        self.cache().replace(key, value).await
    }

    pub async fn replace_if_equal(&self, key: K, expected: V, value: V) -> Result<bool, CacheError> {
        self.check_read_only()?;
        self.check_entry(&key, &value)?;
        self.ensure_synchronized().await?;
        self.cache().replace_if_equal(key, expected, value).await
    }

    /// Remove every entry of the view from the backing cache. Only entries
    /// the view contains are touched.
    pub async fn clear(&self) -> Result<(), CacheError> {
        self.check_read_only()?;
        self.ensure_synchronized().await?;
        let cache = self.cache();
        for key in self.0.store.keys() {
            cache.remove(&key).await?;
        }
        Ok(())
    }

    /// Truncate the backing cache. The local emptying arrives through the
    /// deactivation channel, without per-entry events.
    pub async fn truncate(&self) -> Result<(), CacheError> {
        self.check_read_only()?;
        self.ensure_synchronized().await?;
        self.cache().truncate().await
    }

    // ----- queries -------------------------------------------------------

    pub async fn key_set(&self, filter: Arc<dyn Filter<K, V>>) -> Result<Vec<K>, CacheError> {
        self.ensure_synchronized().await?;
        let merged = merge(&self.0.filter, filter);
        if self.is_cache_values() {
            Ok(self.local_query(&merged).into_iter().map(|(k, _)| k).collect())
        } else {
            self.cache().key_set(merged).await
        }
    }

    pub async fn entry_set(
        &self,
        filter: Arc<dyn Filter<K, V>>,
        comparator: Option<Arc<dyn Comparator<V>>>,
    ) -> Result<Vec<(K, V)>, CacheError> {
        self.ensure_synchronized().await?;
        let merged = merge(&self.0.filter, filter);
        if self.is_cache_values() {
            let mut entries = self.local_query(&merged);
            if let Some(comparator) = comparator {
                entries.sort_by(|(_, a), (_, b)| comparator.compare(a, b));
            }
            Ok(entries)
        } else {
            self.cache().entry_set(merged, comparator).await
        }
    }

    /// Evaluate a filter against the local store, via a local index when the
    /// filter is a single comparison over an indexed attribute.
    fn local_query(&self, filter: &Arc<dyn Filter<K, V>>) -> Vec<(K, V)> {
        if let Some((extractor_id, op, operand)) = filter.comparison_parts() {
            if let Some(mut keys) = self.0.indexes.lookup(&extractor_id, op, &operand) {
                keys.sort();
                return keys.into_iter().filter_map(|k| self.0.store.get(&k).map(|v| (k, v))).collect();
            }
        }
        self.0.store.entries().into_iter().filter(|(k, v)| filter.evaluate(k, v)).collect()
    }

    // ----- invocation ----------------------------------------------------

    pub async fn invoke(&self, key: &K, processor: Arc<dyn EntryProcessor<K, V>>) -> Result<Value, CacheError> {
        self.ensure_synchronized().await?;
        self.cache().invoke(key, processor).await
    }

    pub async fn invoke_all_keys(&self, keys: &[K], processor: Arc<dyn EntryProcessor<K, V>>) -> Result<Vec<(K, Value)>, CacheError> {
        self.ensure_synchronized().await?;
        self.cache().invoke_all_keys(keys, processor).await
    }

    pub async fn invoke_all_filter(
        &self,
        filter: Arc<dyn Filter<K, V>>,
        processor: Arc<dyn EntryProcessor<K, V>>,
    ) -> Result<Vec<(K, Value)>, CacheError> {
        self.ensure_synchronized().await?;
        let merged = merge(&self.0.filter, filter);
        self.cache().invoke_all_filter(merged, processor).await
    }

    pub async fn aggregate_keys(&self, keys: &[K], aggregator: Arc<dyn EntryAggregator<K, V>>) -> Result<Value, CacheError> {
        self.ensure_synchronized().await?;
        self.cache().aggregate_keys(keys, aggregator).await
    }

    pub async fn aggregate_filter(
        &self,
        filter: Arc<dyn Filter<K, V>>,
        aggregator: Arc<dyn EntryAggregator<K, V>>,
    ) -> Result<Value, CacheError> {
        self.ensure_synchronized().await?;
        let merged = merge(&self.0.filter, filter);
        self.cache().aggregate_filter(merged, aggregator).await
    }

    // ----- concurrency ---------------------------------------------------

    pub async fn lock(&self, key: &K, wait: Duration) -> Result<bool, CacheError> {
        self.ensure_synchronized().await?;
        self.cache().lock(key, wait).await
    }

    pub async fn unlock(&self, key: &K) -> Result<bool, CacheError> {
        self.ensure_synchronized().await?;
        self.cache().unlock(key).await
    }

    // ----- indexes -------------------------------------------------------

    /// Register an index with the backing cache and, when values are cached,
    /// locally as well.
    pub async fn add_index(
        &self,
        extractor: Arc<dyn ValueExtractor<V>>,
        ordered: bool,
        comparator: Option<Arc<dyn Comparator<Value>>>,
    ) -> Result<(), CacheError> {
        self.ensure_synchronized().await?;
        if self.is_cache_values() {
            let descriptor = IndexDescriptor { extractor: extractor.clone(), ordered, comparator: comparator.clone() };
            self.0.indexes.add(descriptor, &self.0.store.entries());
        }
        self.cache().add_index(extractor, ordered, comparator).await
    }

    /// Remove a local index. The index on the backing cache is only removed
    /// when values are cached locally; a key-only view leaves it in place for
    /// the caller to manage.
    pub async fn remove_index(&self, extractor: Arc<dyn ValueExtractor<V>>) -> Result<(), CacheError> {
        self.ensure_synchronized().await?;
        if self.is_cache_values() {
            self.0.indexes.remove(&extractor.id());
            self.cache().remove_index(extractor).await
        } else {
            Ok(())
        }
    }

    // ----- event subscription --------------------------------------------

    /// Subscribe to every event of the view.
    pub async fn add_map_listener(&self, listener: Arc<dyn MapListener<K, V>>) -> Result<(), CacheError> {
        self.add_filter_listener(listener, None, false).await
    }

    pub fn remove_map_listener(&self, listener: &Arc<dyn MapListener<K, V>>) { self.0.registry.remove_filter_listener(listener, None); }

    /// Subscribe to events whose values match a filter; `None` matches all.
    /// A standard or filtered subscription forces cached-values mode.
    pub async fn add_filter_listener(
        &self,
        listener: Arc<dyn MapListener<K, V>>,
        filter: Option<Arc<dyn Filter<K, V>>>,
        lite: bool,
    ) -> Result<(), CacheError> {
        self.ensure_synchronized().await?;
        self.0.registry.add_filter_listener(listener, filter, lite);
        self.ensure_observed().await
    }

    pub fn remove_filter_listener(&self, listener: &Arc<dyn MapListener<K, V>>, filter: Option<&Arc<dyn Filter<K, V>>>) {
        self.0.registry.remove_filter_listener(listener, filter);
    }

    pub async fn add_key_listener(&self, listener: Arc<dyn MapListener<K, V>>, key: K, lite: bool) -> Result<(), CacheError> {
        self.ensure_synchronized().await?;
        self.0.registry.add_key_listener(listener, key, lite);
        self.ensure_observed().await
    }

    pub fn remove_key_listener(&self, listener: &Arc<dyn MapListener<K, V>>, key: &K) {
        self.0.registry.remove_key_listener(listener, key);
    }

    async fn ensure_observed(&self) -> Result<(), CacheError> {
        if self.0.registry.is_observed() && !self.is_cache_values() {
            self.set_cache_values(true).await
        } else {
            Ok(())
        }
    }

    pub fn add_lifecycle_listener(&self, listener: Arc<dyn ViewLifecycleListener>) {
        self.0.lifecycle.lock().unwrap().push(listener);
    }

    pub fn remove_lifecycle_listener(&self, listener: &Arc<dyn ViewLifecycleListener>) {
        self.0.lifecycle.lock().unwrap().retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn notify_lifecycle(&self, f: impl Fn(&dyn ViewLifecycleListener)) {
        let listeners: Vec<_> = self.0.lifecycle.lock().unwrap().clone();
        for listener in listeners {
            f(&*listener);
        }
    }

    // ----- lifecycle -----------------------------------------------------

    /// Detach from the backing cache: unregister server subscriptions, stop
    /// event delivery and drop the cache handle. Local user subscriptions end
    /// here as well. The next use resynchronizes, if the reconnect interval
    /// allows use at all.
    pub async fn release(&self) -> Result<(), CacheError> {
        let _guard = self.0.monitor.lock().await;
        self.shutdown().await;
        self.notify_lifecycle(|l| l.view_released());
        Ok(())
    }

    /// Release the view and destroy the backing cache.
    pub async fn destroy(&self) -> Result<(), CacheError> {
        let cache = self.cache();
        {
            let _guard = self.0.monitor.lock().await;
            self.shutdown().await;
            self.0.destroyed.store(true, Ordering::Release);
        }
        cache.destroy().await?;
        self.notify_lifecycle(|l| l.view_destroyed());
        Ok(())
    }

    // ----- internal helpers ----------------------------------------------

    fn check_read_only(&self) -> Result<(), CacheError> {
        if self.is_read_only() {
            Err(CacheError::invalid_state("view is read-only"))
        } else {
            Ok(())
        }
    }

    /// Reject values the view's own filter would exclude, so a write cannot
    /// create an entry the view could never contain.
    fn check_entry(&self, key: &K, value: &V) -> Result<(), CacheError> {
        if self.0.filter.evaluate(key, value) {
            Ok(())
        } else {
            Err(CacheError::invalid_argument(format!("entry {:?} does not satisfy the view filter", key)))
        }
    }

    /// While a sync cycle is collecting initial content, record the key of an
    /// incoming event for later reconciliation instead of applying it.
    pub(crate) fn defer_event(&self, key: &K) -> bool {
        let mut log = self.0.sync_log.lock().unwrap();
        match &mut *log {
            Some(keys) => {
                keys.insert(key.clone());
                true
            }
            None => false,
        }
    }

    pub(crate) fn transform(&self, value: V) -> V {
        match &self.0.transformer {
            Some(transformer) => transformer.transform(value),
            None => value,
        }
    }
}

impl<K: Key, V: Data> std::fmt::Debug for CacheView<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheView")
            .field("name", &self.cache_name())
            .field("state", &self.state())
            .field("cache_values", &self.is_cache_values())
            .field("read_only", &self.is_read_only())
            .field("entries", &self.0.store.len())
            .finish()
    }
}
