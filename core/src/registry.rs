use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use lattice_query::{Filter, FilterHandle};

use crate::dispatcher::EventDispatcher;
use crate::event::MapEvent;
use crate::event_filter::{EventFilter, MapEventFilter};
use crate::listener::{ListenerHandle, MapListener};
use crate::{Data, Key};

#[derive(Clone)]
struct Subscription<K: Key, V: Data> {
    listener: ListenerHandle<K, V>,
    lite: bool,
}

struct FilterEntry<K: Key, V: Data> {
    event_filter: Arc<dyn EventFilter<K, V>>,
    subs: Vec<Subscription<K, V>>,
}

/// Resolves, for each published event, which user subscriptions fire, and
/// hands the deliveries to the dispatcher. One registry exists per view.
///
/// Subscriptions target either a specific key or a filter; a filter given at
/// registration is wrapped in a [`MapEventFilter`] over every event kind, so
/// it is evaluated against the event's old and new values. Listeners
/// registered with no filter observe everything.
///
/// The `observed` flag latches as soon as any subscription needs entry values
/// (a standard subscription, or any filter-based one); the view uses it to
/// force cached-values mode.
pub struct ListenerRegistry<K: Key, V: Data> {
    dispatcher: Arc<EventDispatcher<K, V>>,
    key_subs: DashMap<K, Vec<Subscription<K, V>>>,
    filter_subs: DashMap<FilterHandle<K, V>, FilterEntry<K, V>>,
    global_subs: std::sync::RwLock<Vec<Subscription<K, V>>>,
    /// Engine-internal listeners, delivered synchronously on the publishing
    /// thread with full events. Not part of the public surface.
    internal_subs: std::sync::RwLock<Vec<ListenerHandle<K, V>>>,
    observed: AtomicBool,
}

impl<K: Key, V: Data> ListenerRegistry<K, V> {
    pub fn new(dispatcher: Arc<EventDispatcher<K, V>>) -> Self {
        Self {
            dispatcher,
            key_subs: DashMap::new(),
            filter_subs: DashMap::new(),
            global_subs: std::sync::RwLock::new(Vec::new()),
            internal_subs: std::sync::RwLock::new(Vec::new()),
            observed: AtomicBool::new(false),
        }
    }

    /// True iff some subscription cannot be served by lite events.
    pub fn is_observed(&self) -> bool { self.observed.load(Ordering::Acquire) }

    pub fn add_key_listener(&self, listener: Arc<dyn MapListener<K, V>>, key: K, lite: bool) {
        if !lite {
            self.observed.store(true, Ordering::Release);
        }
        self.key_subs.entry(key).or_default().push(Subscription { listener: ListenerHandle::new(listener), lite });
    }

    pub fn remove_key_listener(&self, listener: &Arc<dyn MapListener<K, V>>, key: &K) {
        let handle = ListenerHandle::new(listener.clone());
        if let Some(mut subs) = self.key_subs.get_mut(key) {
            subs.retain(|s| s.listener != handle);
        }
        self.key_subs.remove_if(key, |_, subs| subs.is_empty());
    }

    /// `filter = None` subscribes to every event of the view.
    pub fn add_filter_listener(&self, listener: Arc<dyn MapListener<K, V>>, filter: Option<Arc<dyn Filter<K, V>>>, lite: bool) {
        let sub = Subscription { listener: ListenerHandle::new(listener), lite };
        match filter {
            None => {
                if !lite {
                    self.observed.store(true, Ordering::Release);
                }
                self.global_subs.write().unwrap().push(sub);
            }
            Some(filter) => {
                // evaluating the filter locally requires values regardless of lite
                self.observed.store(true, Ordering::Release);
                let key = FilterHandle(filter.clone());
                self.filter_subs
                    .entry(key)
                    .or_insert_with(|| FilterEntry { event_filter: Arc::new(MapEventFilter::all(filter)), subs: Vec::new() })
                    .subs
                    .push(sub);
            }
        }
    }

    pub fn remove_filter_listener(&self, listener: &Arc<dyn MapListener<K, V>>, filter: Option<&Arc<dyn Filter<K, V>>>) {
        let handle = ListenerHandle::new(listener.clone());
        match filter {
            None => self.global_subs.write().unwrap().retain(|s| s.listener != handle),
            Some(filter) => {
                let key = FilterHandle(filter.clone());
                if let Some(mut entry) = self.filter_subs.get_mut(&key) {
                    entry.subs.retain(|s| s.listener != handle);
                }
                self.filter_subs.remove_if(&key, |_, entry| entry.subs.is_empty());
            }
        }
    }

    pub(crate) fn add_internal(&self, listener: ListenerHandle<K, V>) { self.internal_subs.write().unwrap().push(listener); }

    /// Remove every user subscription. Engine-internal listeners survive;
    /// they are owned by the view and live as long as it does.
    pub fn clear(&self) {
        self.key_subs.clear();
        self.filter_subs.clear();
        self.global_subs.write().unwrap().clear();
    }

    /// Fan an event out to everything that matches it. Internal listeners run
    /// on the publishing thread; user deliveries are queued on the dispatcher
    /// and never block on user code. Subscriptions registered lite receive
    /// the event with its values elided.
    pub fn publish(&self, event: &MapEvent<K, V>) {
        for internal in self.internal_subs.read().unwrap().iter() {
            internal.dispatch(event);
        }

        let mut matched: Vec<Subscription<K, V>> = Vec::new();
        if let Some(subs) = self.key_subs.get(&event.key) {
            matched.extend(subs.iter().cloned());
        }
        matched.extend(self.global_subs.read().unwrap().iter().cloned());

        // snapshot filter entries so user predicates run outside the map shards
        let entries: Vec<(Arc<dyn EventFilter<K, V>>, Vec<Subscription<K, V>>)> =
            self.filter_subs.iter().map(|e| (e.event_filter.clone(), e.subs.clone())).collect();
        for (event_filter, subs) in entries {
            if event_filter.evaluate_event(event) {
                matched.extend(subs);
            }
        }

        if matched.is_empty() {
            return;
        }
        debug!("publishing {} to {} subscriptions", event, matched.len());

        let lite_event = if matched.iter().any(|s| s.lite) { Some(event.to_lite()) } else { None };
        for sub in matched {
            let delivery = if sub.lite { lite_event.clone().expect("lite event prepared") } else { event.clone() };
            self.dispatcher.schedule(delivery, sub.listener);
        }
    }
}
