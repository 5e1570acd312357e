use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use lattice_core::{
    CacheError, CacheName, DeactivationListener, EntryAggregator, EntryProcessor, EventFilter, MapEvent, MapListener, MemberListener,
    NamedCache,
};
use lattice_query::{Comparator, Filter, Value, ValueExtractor};

/// In-process stand-in for a remote grid cache: an implementation of the
/// cache façade over a plain map that delivers events to registered
/// subscriptions synchronously in mutation order, exactly as the transport
/// would per key. Test-side controls simulate server-side mutations,
/// destruction, truncation and member departure.
pub struct MockGrid<K, V> {
    inner: Arc<GridInner<K, V>>,
}

impl<K, V> Clone for MockGrid<K, V> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

struct FilterSub<K, V> {
    listener: Arc<dyn MapListener<K, V>>,
    filter: Arc<dyn EventFilter<K, V>>,
    lite: bool,
}

struct KeySub<K, V> {
    listener: Arc<dyn MapListener<K, V>>,
    key: K,
    lite: bool,
}

struct GridInner<K, V> {
    name: CacheName,
    map: Mutex<BTreeMap<K, V>>,
    /// Serializes mutation + event emission so delivery order matches
    /// mutation order.
    publish_lock: Mutex<()>,
    filter_subs: Mutex<Vec<FilterSub<K, V>>>,
    key_subs: Mutex<Vec<KeySub<K, V>>>,
    member_listeners: Mutex<Vec<Arc<dyn MemberListener>>>,
    deactivation_listeners: Mutex<Vec<Arc<dyn DeactivationListener>>>,
    locks: Mutex<HashSet<K>>,
    indexes: Mutex<HashSet<String>>,
    active: AtomicBool,
    failing: AtomicBool,
    /// One-shot callback run inside the next key/entry query after its
    /// snapshot is taken, to race server mutations against an initial fetch.
    mid_fetch_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl<K: lattice_core::Key, V: lattice_core::Data> MockGrid<K, V> {
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(GridInner {
                name: CacheName::from(name),
                map: Mutex::new(BTreeMap::new()),
                publish_lock: Mutex::new(()),
                filter_subs: Mutex::new(Vec::new()),
                key_subs: Mutex::new(Vec::new()),
                member_listeners: Mutex::new(Vec::new()),
                deactivation_listeners: Mutex::new(Vec::new()),
                locks: Mutex::new(HashSet::new()),
                indexes: Mutex::new(HashSet::new()),
                active: AtomicBool::new(true),
                failing: AtomicBool::new(false),
                mid_fetch_hook: Mutex::new(None),
            }),
        }
    }

    pub fn handle(&self) -> Arc<dyn NamedCache<K, V>> { Arc::new(self.clone()) }

    // ----- server-side controls ------------------------------------------

    /// Apply a mutation as the cluster would, emitting the resulting event.
    pub fn server_put(&self, key: K, value: V) -> Option<V> {
        let _order = self.inner.publish_lock.lock().unwrap();
        let old = self.inner.map.lock().unwrap().insert(key.clone(), value.clone());
        let event = match &old {
            Some(old_value) => MapEvent::updated(self.inner.name.clone(), key, Some(old_value.clone()), Some(value)),
            None => MapEvent::inserted(self.inner.name.clone(), key, Some(value)),
        };
        self.emit(&event);
        old
    }

    pub fn server_remove(&self, key: &K) -> Option<V> {
        let _order = self.inner.publish_lock.lock().unwrap();
        let old = self.inner.map.lock().unwrap().remove(key);
        if let Some(old_value) = &old {
            self.emit(&MapEvent::deleted(self.inner.name.clone(), key.clone(), Some(old_value.clone())));
        }
        old
    }

    /// Remove everything, one deletion event per entry.
    pub fn server_clear(&self) {
        let _order = self.inner.publish_lock.lock().unwrap();
        let drained: Vec<(K, V)> = std::mem::take(&mut *self.inner.map.lock().unwrap()).into_iter().collect();
        for (key, old) in drained {
            self.emit(&MapEvent::deleted(self.inner.name.clone(), key, Some(old)));
        }
    }

    /// Truncate: drop all data without entry events, notify deactivation
    /// listeners.
    pub fn server_truncate(&self) {
        {
            let _order = self.inner.publish_lock.lock().unwrap();
            self.inner.map.lock().unwrap().clear();
        }
        for listener in self.inner.deactivation_listeners.lock().unwrap().clone() {
            listener.cache_truncated();
        }
    }

    /// Destroy the cache server side: data and subscriptions are gone, the
    /// deactivation channel fires. The handle itself stays usable, standing
    /// in for a cache of the same name re-created on the cluster.
    pub fn server_destroy(&self) {
        tracing::debug!("mock grid {} destroyed server side", self.inner.name);
        {
            let _order = self.inner.publish_lock.lock().unwrap();
            self.inner.map.lock().unwrap().clear();
            self.inner.filter_subs.lock().unwrap().clear();
            self.inner.key_subs.lock().unwrap().clear();
        }
        let listeners = std::mem::take(&mut *self.inner.deactivation_listeners.lock().unwrap());
        for listener in listeners {
            listener.cache_destroyed();
        }
    }

    /// Announce the departure of the service member serving this cache.
    pub fn server_member_left(&self) {
        for listener in self.inner.member_listeners.lock().unwrap().clone() {
            listener.member_left();
        }
    }

    /// Make every subsequent façade call fail with a transport error. A
    /// severed connection also drops the subscriptions registered over it.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::Release);
        if failing {
            self.inner.filter_subs.lock().unwrap().clear();
            self.inner.key_subs.lock().unwrap().clear();
        }
    }

    /// Run `hook` inside the next key/entry query, after its snapshot is
    /// taken and before it returns. The mutation's event is delivered, but
    /// the returned snapshot predates it.
    pub fn set_mid_fetch_hook(&self, hook: impl FnOnce() + Send + 'static) {
        *self.inner.mid_fetch_hook.lock().unwrap() = Some(Box::new(hook));
    }

    fn run_mid_fetch_hook(&self) {
        let hook = self.inner.mid_fetch_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn filter_subscription_count(&self) -> usize { self.inner.filter_subs.lock().unwrap().len() }

    pub fn has_index(&self, extractor_id: &str) -> bool { self.inner.indexes.lock().unwrap().contains(extractor_id) }

    pub fn contents(&self) -> Vec<(K, V)> { self.inner.map.lock().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect() }

    // ----- internals ------------------------------------------------------

    fn check_failing(&self) -> Result<(), CacheError> {
        if self.inner.failing.load(Ordering::Acquire) {
            Err(CacheError::remote("connection refused"))
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: &MapEvent<K, V>) {
        let filter_subs: Vec<(Arc<dyn MapListener<K, V>>, Arc<dyn EventFilter<K, V>>, bool)> =
            self.inner.filter_subs.lock().unwrap().iter().map(|s| (s.listener.clone(), s.filter.clone(), s.lite)).collect();
        for (listener, filter, lite) in filter_subs {
            if filter.evaluate_event(event) {
                if lite {
                    listener.dispatch(&event.to_lite());
                } else {
                    listener.dispatch(event);
                }
            }
        }
        let key_subs: Vec<(Arc<dyn MapListener<K, V>>, bool)> = self
            .inner
            .key_subs
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.key == event.key)
            .map(|s| (s.listener.clone(), s.lite))
            .collect();
        for (listener, lite) in key_subs {
            if lite {
                listener.dispatch(&event.to_lite());
            } else {
                listener.dispatch(event);
            }
        }
    }
}

#[async_trait]
impl<K: lattice_core::Key, V: lattice_core::Data> NamedCache<K, V> for MockGrid<K, V> {
    async fn get(&self, key: &K) -> Result<Option<V>, CacheError> {
        self.check_failing()?;
        Ok(self.inner.map.lock().unwrap().get(key).cloned())
    }

    async fn get_all(&self, keys: &[K]) -> Result<Vec<(K, V)>, CacheError> {
        self.check_failing()?;
        let map = self.inner.map.lock().unwrap();
        Ok(keys.iter().filter_map(|k| map.get(k).map(|v| (k.clone(), v.clone()))).collect())
    }

    async fn contains_key(&self, key: &K) -> Result<bool, CacheError> {
        self.check_failing()?;
        Ok(self.inner.map.lock().unwrap().contains_key(key))
    }

    async fn len(&self) -> Result<usize, CacheError> {
        self.check_failing()?;
        Ok(self.inner.map.lock().unwrap().len())
    }

    async fn put(&self, key: K, value: V) -> Result<Option<V>, CacheError> {
        self.check_failing()?;
        Ok(self.server_put(key, value))
    }

    async fn put_with_ttl(&self, key: K, value: V, _ttl: Duration) -> Result<Option<V>, CacheError> {
        // expiry is not modeled
        self.check_failing()?;
        Ok(self.server_put(key, value))
    }

    async fn put_all(&self, entries: Vec<(K, V)>) -> Result<(), CacheError> {
        self.check_failing()?;
        for (key, value) in entries {
            self.server_put(key, value);
        }
        Ok(())
    }

    async fn remove(&self, key: &K) -> Result<Option<V>, CacheError> {
        self.check_failing()?;
        Ok(self.server_remove(key))
    }

    async fn remove_if_equal(&self, key: &K, expected: V) -> Result<bool, CacheError> {
        self.check_failing()?;
        let matches = self.inner.map.lock().unwrap().get(key) == Some(&expected);
        if matches {
            self.server_remove(key);
        }
        Ok(matches)
    }

    async fn replace(&self, key: K, value: V) -> Result<Option<V>, CacheError> {
        self.check_failing()?;
        let exists = self.inner.map.lock().unwrap().contains_key(&key);
        if exists {
            Ok(self.server_put(key, value))
        } else {
            Ok(None)
        }
    }

    async fn replace_if_equal(&self, key: K, expected: V, value: V) -> Result<bool, CacheError> {
        self.check_failing()?;
        let matches = self.inner.map.lock().unwrap().get(&key) == Some(&expected);
        if matches {
            self.server_put(key, value);
        }
        Ok(matches)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.check_failing()?;
        self.server_clear();
        Ok(())
    }

    async fn truncate(&self) -> Result<(), CacheError> {
        self.check_failing()?;
        self.server_truncate();
        Ok(())
    }

    async fn key_set(&self, filter: Arc<dyn Filter<K, V>>) -> Result<Vec<K>, CacheError> {
        self.check_failing()?;
        let keys: Vec<K> = {
            let map = self.inner.map.lock().unwrap();
            map.iter().filter(|(k, v)| filter.evaluate(k, v)).map(|(k, _)| k.clone()).collect()
        };
        self.run_mid_fetch_hook();
        Ok(keys)
    }

    async fn entry_set(
        &self,
        filter: Arc<dyn Filter<K, V>>,
        comparator: Option<Arc<dyn Comparator<V>>>,
    ) -> Result<Vec<(K, V)>, CacheError> {
        self.check_failing()?;
        let mut entries: Vec<(K, V)> = {
            let map = self.inner.map.lock().unwrap();
            map.iter().filter(|(k, v)| filter.evaluate(k, v)).map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        if let Some(comparator) = comparator {
            entries.sort_by(|(_, a), (_, b)| comparator.compare(a, b));
        }
        self.run_mid_fetch_hook();
        Ok(entries)
    }

    async fn invoke(&self, key: &K, processor: Arc<dyn EntryProcessor<K, V>>) -> Result<Value, CacheError> {
        self.check_failing()?;
        let mut slot = self.inner.map.lock().unwrap().get(key).cloned();
        let existed = slot.is_some();
        let result = processor.process(key, &mut slot);
        match slot {
            Some(value) => {
                self.server_put(key.clone(), value);
            }
            None if existed => {
                self.server_remove(key);
            }
            None => {}
        }
        Ok(result)
    }

    async fn invoke_all_keys(&self, keys: &[K], processor: Arc<dyn EntryProcessor<K, V>>) -> Result<Vec<(K, Value)>, CacheError> {
        let mut results = Vec::new();
        for key in keys {
            results.push((key.clone(), self.invoke(key, processor.clone()).await?));
        }
        Ok(results)
    }

    async fn invoke_all_filter(
        &self,
        filter: Arc<dyn Filter<K, V>>,
        processor: Arc<dyn EntryProcessor<K, V>>,
    ) -> Result<Vec<(K, Value)>, CacheError> {
        let keys = self.key_set(filter).await?;
        self.invoke_all_keys(&keys, processor).await
    }

    async fn aggregate_keys(&self, keys: &[K], aggregator: Arc<dyn EntryAggregator<K, V>>) -> Result<Value, CacheError> {
        self.check_failing()?;
        let entries: Vec<(K, V)> = self.get_all(keys).await?;
        Ok(aggregator.aggregate(&mut entries.into_iter()))
    }

    async fn aggregate_filter(
        &self,
        filter: Arc<dyn Filter<K, V>>,
        aggregator: Arc<dyn EntryAggregator<K, V>>,
    ) -> Result<Value, CacheError> {
        let entries = self.entry_set(filter, None).await?;
        Ok(aggregator.aggregate(&mut entries.into_iter()))
    }

    async fn lock(&self, key: &K, _wait: Duration) -> Result<bool, CacheError> {
        self.check_failing()?;
        Ok(self.inner.locks.lock().unwrap().insert(key.clone()))
    }

    async fn unlock(&self, key: &K) -> Result<bool, CacheError> {
        self.check_failing()?;
        Ok(self.inner.locks.lock().unwrap().remove(key))
    }

    async fn add_index(
        &self,
        extractor: Arc<dyn ValueExtractor<V>>,
        _ordered: bool,
        _comparator: Option<Arc<dyn Comparator<Value>>>,
    ) -> Result<(), CacheError> {
        self.check_failing()?;
        self.inner.indexes.lock().unwrap().insert(extractor.id());
        Ok(())
    }

    async fn remove_index(&self, extractor: Arc<dyn ValueExtractor<V>>) -> Result<(), CacheError> {
        self.check_failing()?;
        self.inner.indexes.lock().unwrap().remove(&extractor.id());
        Ok(())
    }

    async fn add_filter_listener(
        &self,
        listener: Arc<dyn MapListener<K, V>>,
        filter: Arc<dyn EventFilter<K, V>>,
        lite: bool,
    ) -> Result<(), CacheError> {
        self.check_failing()?;
        self.inner.filter_subs.lock().unwrap().push(FilterSub { listener, filter, lite });
        Ok(())
    }

    async fn remove_filter_listener(&self, listener: Arc<dyn MapListener<K, V>>) -> Result<(), CacheError> {
        self.check_failing()?;
        self.inner.filter_subs.lock().unwrap().retain(|s| !Arc::ptr_eq(&s.listener, &listener));
        Ok(())
    }

    async fn add_key_listener(&self, listener: Arc<dyn MapListener<K, V>>, key: K, lite: bool) -> Result<(), CacheError> {
        self.check_failing()?;
        self.inner.key_subs.lock().unwrap().push(KeySub { listener, key, lite });
        Ok(())
    }

    async fn remove_key_listener(&self, listener: Arc<dyn MapListener<K, V>>, key: &K) -> Result<(), CacheError> {
        self.check_failing()?;
        self.inner.key_subs.lock().unwrap().retain(|s| !(s.key == *key && Arc::ptr_eq(&s.listener, &listener)));
        Ok(())
    }

    fn add_member_listener(&self, listener: Arc<dyn MemberListener>) {
        self.inner.member_listeners.lock().unwrap().push(listener);
    }

    fn remove_member_listener(&self, listener: Arc<dyn MemberListener>) {
        self.inner.member_listeners.lock().unwrap().retain(|l| !Arc::ptr_eq(l, &listener));
    }

    fn add_deactivation_listener(&self, listener: Arc<dyn DeactivationListener>) {
        self.inner.deactivation_listeners.lock().unwrap().push(listener);
    }

    fn remove_deactivation_listener(&self, listener: Arc<dyn DeactivationListener>) {
        self.inner.deactivation_listeners.lock().unwrap().retain(|l| !Arc::ptr_eq(l, &listener));
    }

    fn cache_name(&self) -> CacheName { self.inner.name.clone() }

    fn is_active(&self) -> bool { self.inner.active.load(Ordering::Acquire) }

    async fn release(&self) -> Result<(), CacheError> { Ok(()) }

    async fn destroy(&self) -> Result<(), CacheError> {
        self.server_destroy();
        self.inner.active.store(false, Ordering::Release);
        Ok(())
    }
}
