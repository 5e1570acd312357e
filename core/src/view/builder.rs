use std::sync::Arc;

use lattice_query::{AlwaysFilter, Filter, Transformer};

use crate::cache::{FixedCacheSupplier, NamedCache, NamedCacheSupplier};
use crate::error::CacheError;
use crate::listener::MapListener;
use crate::view::CacheView;
use crate::{Data, Key};

/// Fluent construction of a [`CacheView`]. The calls may come in any order;
/// `build` materializes and synchronizes the view.
///
/// ```ignore
/// let view = ViewBuilder::new(cache)
///     .filter(over_300)
///     .values()
///     .listener(audit)
///     .build()
///     .await?;
/// ```
pub struct ViewBuilder<K: Key, V: Data> {
    supplier: Arc<dyn NamedCacheSupplier<K, V>>,
    filter: Option<Arc<dyn Filter<K, V>>>,
    listener: Option<Arc<dyn MapListener<K, V>>>,
    transformer: Option<Arc<dyn Transformer<V>>>,
    cache_values: bool,
    read_only: bool,
    reconnect_interval_ms: i64,
}

impl<K: Key, V: Data> ViewBuilder<K, V> {
    pub fn new(cache: Arc<dyn NamedCache<K, V>>) -> Self { Self::from_supplier(Arc::new(FixedCacheSupplier::new(cache))) }

    pub fn from_supplier(supplier: Arc<dyn NamedCacheSupplier<K, V>>) -> Self {
        Self {
            supplier,
            filter: None,
            listener: None,
            transformer: None,
            cache_values: false,
            read_only: false,
            reconnect_interval_ms: 0,
        }
    }

    /// The predicate defining the view. Defaults to matching everything.
    pub fn filter(mut self, filter: Arc<dyn Filter<K, V>>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// An initial listener; it also receives the events of the initial
    /// population. In key-only mode the listener is subscribed lite.
    pub fn listener(mut self, listener: Arc<dyn MapListener<K, V>>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Transform values before they are stored locally. Implies `values()`
    /// and makes the view read-only.
    pub fn map(mut self, transformer: Arc<dyn Transformer<V>>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Cache only the keys locally; reads for keys in the view delegate to
    /// the backing cache. Mutually exclusive with `values()`, last call wins.
    pub fn keys(mut self) -> Self {
        self.cache_values = false;
        self
    }

    /// Cache keys and values locally.
    pub fn values(mut self) -> Self {
        self.cache_values = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// How long a disconnected view keeps serving stale local reads before
    /// an access resynchronizes it. Zero (the default) forbids use while
    /// disconnected.
    pub fn reconnect_interval(mut self, millis: i64) -> Self {
        self.reconnect_interval_ms = millis;
        self
    }

    /// Materialize the view and run its initial synchronization.
    pub async fn build(self) -> Result<CacheView<K, V>, CacheError> {
        let filter: Arc<dyn Filter<K, V>> = self.filter.unwrap_or_else(|| Arc::new(AlwaysFilter));
        let cache_values = self.cache_values || self.transformer.is_some();
        let read_only = self.read_only || self.transformer.is_some();

        let view = CacheView::materialize(self.supplier, filter, self.transformer, cache_values, read_only, self.reconnect_interval_ms);

        if let Some(listener) = self.listener {
            // subscribed before the initial fetch so population is observed;
            // without values a standard subscription would force them, so it
            // is inferred lite
            view.0.registry.add_filter_listener(listener, None, !cache_values);
        }

        view.configure_synchronization(true).await?;
        Ok(view)
    }
}
