use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use lattice_query::{Comparator, Filter, Value, ValueExtractor};

use crate::error::CacheError;
use crate::event_filter::EventFilter;
use crate::listener::MapListener;
use crate::{Data, Key};

/// Cheap cloneable identifier of a cache, also used as the `source` of the
/// events it emits.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheName(Arc<str>);

impl CacheName {
    pub fn as_str(&self) -> &str { &self.0 }
}

impl From<&str> for CacheName {
    fn from(s: &str) -> Self { Self(Arc::from(s)) }
}
impl From<String> for CacheName {
    fn from(s: String) -> Self { Self(Arc::from(s.as_str())) }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
impl fmt::Debug for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "CacheName({})", self.0) }
}

/// An agent executed against a single entry on the cluster side. The client
/// only carries these across the wire; `process` is what the server runs.
/// Setting the slot to `None` removes the entry, replacing it writes through.
pub trait EntryProcessor<K, V>: Send + Sync + fmt::Debug {
    fn process(&self, key: &K, value: &mut Option<V>) -> Value;
}

/// An aggregation executed over a set of entries on the cluster side.
pub trait EntryAggregator<K, V>: Send + Sync + fmt::Debug {
    fn aggregate(&self, entries: &mut dyn Iterator<Item = (K, V)>) -> Value;
}

/// Observes membership of the service a cache runs on.
pub trait MemberListener: Send + Sync {
    fn member_joined(&self) {}
    fn member_left(&self) {}
}

/// Observes destruction and truncation of a cache, server side included.
pub trait DeactivationListener: Send + Sync {
    fn cache_destroyed(&self);
    fn cache_truncated(&self);
}

/// The contract a continuous view consumes from the transport layer. The
/// implementation behind this trait owns request/response pairing, codec and
/// reconnection of the underlying channel; everything here may block on I/O
/// and surfaces wire failures as [`CacheError::Transport`].
#[async_trait]
pub trait NamedCache<K: Key, V: Data>: Send + Sync {
    // ----- reads ---------------------------------------------------------

    async fn get(&self, key: &K) -> Result<Option<V>, CacheError>;
    async fn get_all(&self, keys: &[K]) -> Result<Vec<(K, V)>, CacheError>;
    async fn contains_key(&self, key: &K) -> Result<bool, CacheError>;
    async fn len(&self) -> Result<usize, CacheError>;

    // ----- writes --------------------------------------------------------

    async fn put(&self, key: K, value: V) -> Result<Option<V>, CacheError>;
    async fn put_with_ttl(&self, key: K, value: V, ttl: Duration) -> Result<Option<V>, CacheError>;
    async fn put_all(&self, entries: Vec<(K, V)>) -> Result<(), CacheError>;
    async fn remove(&self, key: &K) -> Result<Option<V>, CacheError>;
    async fn remove_if_equal(&self, key: &K, expected: V) -> Result<bool, CacheError>;
    async fn replace(&self, key: K, value: V) -> Result<Option<V>, CacheError>;
    async fn replace_if_equal(&self, key: K, expected: V, value: V) -> Result<bool, CacheError>;
    async fn clear(&self) -> Result<(), CacheError>;
    async fn truncate(&self) -> Result<(), CacheError>;

    // ----- queries -------------------------------------------------------

    async fn key_set(&self, filter: Arc<dyn Filter<K, V>>) -> Result<Vec<K>, CacheError>;
    async fn entry_set(
        &self,
        filter: Arc<dyn Filter<K, V>>,
        comparator: Option<Arc<dyn Comparator<V>>>,
    ) -> Result<Vec<(K, V)>, CacheError>;

    // ----- invocation ----------------------------------------------------

    async fn invoke(&self, key: &K, processor: Arc<dyn EntryProcessor<K, V>>) -> Result<Value, CacheError>;
    async fn invoke_all_keys(&self, keys: &[K], processor: Arc<dyn EntryProcessor<K, V>>) -> Result<Vec<(K, Value)>, CacheError>;
    async fn invoke_all_filter(
        &self,
        filter: Arc<dyn Filter<K, V>>,
        processor: Arc<dyn EntryProcessor<K, V>>,
    ) -> Result<Vec<(K, Value)>, CacheError>;
    async fn aggregate_keys(&self, keys: &[K], aggregator: Arc<dyn EntryAggregator<K, V>>) -> Result<Value, CacheError>;
    async fn aggregate_filter(&self, filter: Arc<dyn Filter<K, V>>, aggregator: Arc<dyn EntryAggregator<K, V>>)
        -> Result<Value, CacheError>;

    // ----- concurrency ---------------------------------------------------

    async fn lock(&self, key: &K, wait: Duration) -> Result<bool, CacheError>;
    async fn unlock(&self, key: &K) -> Result<bool, CacheError>;

    // ----- indexes -------------------------------------------------------

    async fn add_index(
        &self,
        extractor: Arc<dyn ValueExtractor<V>>,
        ordered: bool,
        comparator: Option<Arc<dyn Comparator<Value>>>,
    ) -> Result<(), CacheError>;
    async fn remove_index(&self, extractor: Arc<dyn ValueExtractor<V>>) -> Result<(), CacheError>;

    // ----- event subscription --------------------------------------------

    async fn add_filter_listener(
        &self,
        listener: Arc<dyn MapListener<K, V>>,
        filter: Arc<dyn EventFilter<K, V>>,
        lite: bool,
    ) -> Result<(), CacheError>;
    async fn remove_filter_listener(&self, listener: Arc<dyn MapListener<K, V>>) -> Result<(), CacheError>;
    async fn add_key_listener(&self, listener: Arc<dyn MapListener<K, V>>, key: K, lite: bool) -> Result<(), CacheError>;
    async fn remove_key_listener(&self, listener: Arc<dyn MapListener<K, V>>, key: &K) -> Result<(), CacheError>;

    // ----- lifecycle -----------------------------------------------------

    fn add_member_listener(&self, listener: Arc<dyn MemberListener>);
    fn remove_member_listener(&self, listener: Arc<dyn MemberListener>);
    fn add_deactivation_listener(&self, listener: Arc<dyn DeactivationListener>);
    fn remove_deactivation_listener(&self, listener: Arc<dyn DeactivationListener>);

    fn cache_name(&self) -> CacheName;
    fn is_active(&self) -> bool;
    async fn release(&self) -> Result<(), CacheError>;
    async fn destroy(&self) -> Result<(), CacheError>;
}

/// Produces the cache a view is built over. A view discards its handle on
/// release and asks the supplier again on the next synchronization.
pub trait NamedCacheSupplier<K: Key, V: Data>: Send + Sync {
    fn get(&self) -> Arc<dyn NamedCache<K, V>>;
}

/// Supplier that always hands back the cache given at construction.
pub struct FixedCacheSupplier<K: Key, V: Data> {
    cache: Arc<dyn NamedCache<K, V>>,
}

impl<K: Key, V: Data> FixedCacheSupplier<K, V> {
    pub fn new(cache: Arc<dyn NamedCache<K, V>>) -> Self { Self { cache } }
}

impl<K: Key, V: Data> NamedCacheSupplier<K, V> for FixedCacheSupplier<K, V> {
    fn get(&self) -> Arc<dyn NamedCache<K, V>> { self.cache.clone() }
}
