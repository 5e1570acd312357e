use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::event_filter::{EventFilter, MapEventFilter, TransformerEventFilter};
use crate::listener::MapListener;
use crate::state::ViewState;
use crate::view::listeners::{AddListener, RemoveListener, ViewDeactivationListener, ViewMemberListener};
use crate::view::{now_millis, CacheView};
use crate::{Data, Key};

impl<K: Key, V: Data> CacheView<K, V> {
    /// Gate every user operation on coherence with the backing cache.
    ///
    /// Synchronized is the fast path. A disconnected view serves stale local
    /// content while the reconnect interval has not elapsed since the last
    /// sync attempt; once it has, the access itself resynchronizes. With no
    /// reconnect interval a disconnected view cannot be used. Operations
    /// arriving while a sync is in flight queue on the view monitor.
    pub(crate) async fn ensure_synchronized(&self) -> Result<(), CacheError> {
        for _ in 0..2 {
            if self.0.destroyed.load(Ordering::Acquire) {
                return Err(CacheError::invalid_state("view has been destroyed"));
            }
            match self.state() {
                ViewState::Synchronized => return Ok(()),
                ViewState::Disconnected => {
                    let interval = self.reconnect_interval();
                    if interval > 0 {
                        let elapsed = now_millis() - self.0.last_sync_millis.load(Ordering::Acquire);
                        if elapsed < interval {
                            return Ok(()); // stale reads permitted inside the window
                        }
                    } else {
                        return Err(CacheError::invalid_state("view is disconnected and reconnect is disabled"));
                    }
                    return self.configure_synchronization(false).await;
                }
                ViewState::Configuring | ViewState::Configured => {
                    // queue behind the sync that is under way, then re-check
                    let _guard = self.0.monitor.lock().await;
                }
            }
        }
        Err(CacheError::invalid_state("synchronization did not settle"))
    }

    /// Run one synchronization cycle under the view monitor: attach the
    /// remove and add subscriptions, fetch initial content, reconcile the
    /// events that raced the fetch, then go Synchronized. Any failure
    /// releases partially attached listeners, transitions to Disconnected
    /// and propagates to the caller that triggered the sync.
    pub(crate) async fn configure_synchronization(&self, force: bool) -> Result<(), CacheError> {
        let _guard = self.0.monitor.lock().await;
        if self.0.destroyed.load(Ordering::Acquire) {
            return Err(CacheError::invalid_state("view has been destroyed"));
        }
        let state = self.state();
        if state == ViewState::Synchronized && !force {
            return Ok(());
        }
        if !matches!(state, ViewState::Disconnected | ViewState::Synchronized) {
            return Err(CacheError::unexpected_state(ViewState::Synchronized, state));
        }

        self.0.last_sync_millis.store(now_millis(), Ordering::Release);
        if state == ViewState::Synchronized {
            // a resync leaves steady state through the disconnect edge
            self.0.state.transition(ViewState::Disconnected)?;
        }
        self.0.state.transition(ViewState::Configuring)?;
        *self.0.sync_log.lock().unwrap() = Some(HashSet::new());
        debug!("synchronizing view {}", self.cache_name());

        match self.sync_body().await {
            Ok(()) => {
                self.0.last_sync_millis.store(now_millis(), Ordering::Release);
                self.0.active.store(true, Ordering::Release);
                debug!("view {} synchronized, {} entries", self.cache_name(), self.0.store.len());
                Ok(())
            }
            Err(e) => {
                warn!("synchronization of view {} failed: {}", self.cache_name(), e);
                self.release_server_listeners().await;
                *self.0.sync_log.lock().unwrap() = None;
                let _ = self.0.state.transition(ViewState::Disconnected);
                Err(e)
            }
        }
    }

    async fn sync_body(&self) -> Result<(), CacheError> {
        let cache = self.cache();
        let cache_values = self.is_cache_values();
        let filter = self.0.filter.clone();

        // a resync replaces the previous cycle's subscriptions
        self.release_server_listeners().await;

        self.0.dispatcher.start();
        self.0.store.subscribe(&self.0.registry);

        // the remove stream first, so nothing can leave the view unnoticed
        let remove_listener: Arc<dyn MapListener<K, V>> = Arc::new(RemoveListener::new(self.weak()));
        cache.add_filter_listener(remove_listener.clone(), Arc::new(MapEventFilter::removed(filter.clone())), true).await?;
        self.0.server_listeners.lock().unwrap().remove = Some(remove_listener);

        // the add stream; events may start arriving immediately and are
        // deferred into the sync log until the initial fetch is in place
        let add_listener: Arc<dyn MapListener<K, V>> = Arc::new(AddListener::new(self.weak()));
        let add_filter: Arc<dyn EventFilter<K, V>> = if cache_values {
            Arc::new(TransformerEventFilter::new(MapEventFilter::added(filter.clone()), self.0.transformer.clone()))
        } else {
            Arc::new(MapEventFilter::added(filter.clone()))
        };
        cache.add_filter_listener(add_listener.clone(), add_filter, !cache_values).await?;
        self.0.server_listeners.lock().unwrap().add = Some(add_listener);

        // invalidation channels
        let deactivation = Arc::new(ViewDeactivationListener::new(self.weak()));
        cache.add_deactivation_listener(deactivation.clone());
        self.0.server_listeners.lock().unwrap().deactivation = Some(deactivation);
        let member = Arc::new(ViewMemberListener::new(self.weak()));
        cache.add_member_listener(member.clone());
        self.0.server_listeners.lock().unwrap().member = Some(member);

        // initial contents, diffed against whatever survived the last cycle
        if cache_values {
            let mut entries = cache.entry_set(filter.clone(), None).await?;
            if let Some(transformer) = &self.0.transformer {
                entries = entries.into_iter().map(|(k, v)| (k, transformer.transform(v))).collect();
            }
            self.apply_value_snapshot(entries);
        } else {
            let keys = cache.key_set(filter.clone()).await?;
            self.apply_key_snapshot(keys);
        }

        self.0.state.transition(ViewState::Configured)?;

        // reconcile keys whose events raced the fetch; new arrivals keep
        // landing in the log until it drains
        loop {
            let pending: Vec<K> = {
                let mut log = self.0.sync_log.lock().unwrap();
                match &mut *log {
                    Some(keys) if !keys.is_empty() => keys.drain().collect(),
                    _ => break,
                }
            };
            debug!("reconciling {} deferred keys", pending.len());
            let authoritative: HashMap<K, V> = cache.get_all(&pending).await?.into_iter().collect();
            for key in pending {
                match authoritative.get(&key) {
                    Some(value) if self.0.filter.evaluate(&key, value) => {
                        self.reconcile_entry(key, self.transform(value.clone()));
                    }
                    _ => {
                        if self.0.store.contains_key(&key) {
                            self.0.store.remove(&key);
                        }
                    }
                }
            }
        }
        *self.0.sync_log.lock().unwrap() = None;

        self.0.state.transition(ViewState::Synchronized)?;
        Ok(())
    }

    /// Replace store content with a fetched entry snapshot, emitting events
    /// only for entries that actually change.
    fn apply_value_snapshot(&self, entries: Vec<(K, V)>) {
        let fresh: BTreeMap<K, V> = entries.into_iter().collect();
        for key in self.0.store.keys() {
            if !fresh.contains_key(&key) {
                self.0.store.remove(&key);
            }
        }
        for (key, value) in fresh {
            self.reconcile_entry(key, value);
        }
    }

    fn apply_key_snapshot(&self, keys: Vec<K>) {
        let fresh: HashSet<K> = keys.into_iter().collect();
        for key in self.0.store.keys() {
            if !fresh.contains(&key) {
                self.0.store.remove(&key);
            }
        }
        for key in fresh {
            if !self.0.store.contains_key(&key) {
                self.0.store.put(key, None);
            }
        }
    }

    /// Store an authoritative value unless the store already agrees with it,
    /// so exactly one event is emitted iff there is a disagreement.
    fn reconcile_entry(&self, key: K, value: V) {
        if self.is_cache_values() {
            match self.0.store.get(&key) {
                Some(current) if current == value => {}
                _ => {
                    self.0.store.put(key, Some(value));
                }
            }
        } else if !self.0.store.contains_key(&key) {
            self.0.store.put(key, None);
        }
    }

    /// Best-effort unregistration of the server-side subscriptions; failures
    /// are logged, never propagated.
    pub(crate) async fn release_server_listeners(&self) {
        let taken = {
            let mut listeners = self.0.server_listeners.lock().unwrap();
            (listeners.add.take(), listeners.remove.take(), listeners.deactivation.take(), listeners.member.take())
        };
        let cache = self.cache();
        let removals: Vec<_> = [taken.0, taken.1]
            .into_iter()
            .flatten()
            .map(|listener| {
                let cache = cache.clone();
                async move { cache.remove_filter_listener(listener).await }
            })
            .collect();
        for result in join_all(removals).await {
            if let Err(e) = result {
                warn!("failed to unregister view subscription: {}", e);
            }
        }
        if let Some(deactivation) = taken.2 {
            cache.remove_deactivation_listener(deactivation);
        }
        if let Some(member) = taken.3 {
            cache.remove_member_listener(member);
        }
    }

    /// The shared teardown of release and destroy. Caller holds the monitor.
    pub(crate) async fn shutdown(&self) {
        self.release_server_listeners().await;
        self.0.dispatcher.stop(crate::dispatcher::DrainMode::Abandon).await;
        self.0.store.unsubscribe();
        self.0.registry.clear();
        self.0.indexes.clear();
        *self.0.sync_log.lock().unwrap() = None;
        let _ = self.0.state.transition(ViewState::Disconnected);
        self.0.active.store(false, Ordering::Release);
        *self.0.cache.lock().unwrap() = None;
        debug!("view {} released", self.cache_name());
    }
}
