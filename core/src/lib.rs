pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod event_filter;
pub mod index;
pub mod listener;
pub mod registry;
pub mod state;
pub mod store;
pub mod task;
pub mod view;

pub use cache::{
    CacheName, DeactivationListener, EntryAggregator, EntryProcessor, FixedCacheSupplier, MemberListener, NamedCache,
    NamedCacheSupplier,
};
pub use dispatcher::{DrainMode, EventDispatcher};
pub use error::CacheError;
pub use event::{EventKind, MapEvent};
pub use event_filter::{EventFilter, MapEventFilter, TransformerEventFilter};
pub use index::IndexDescriptor;
pub use listener::{event_fn, ListenerHandle, MapListener};
pub use registry::ListenerRegistry;
pub use state::ViewState;
pub use store::{LocalStore, StoreMode};
pub use view::{CacheView, ViewBuilder, ViewLifecycleListener};

pub use lattice_query as query;

use std::fmt::Debug;
use std::hash::Hash;

/// Bound alias for cache keys. Keys are ordered so the local store can keep
/// its entries sorted, and hashed so listener registries can key on them.
pub trait Key: Ord + Hash + Eq + Clone + Debug + Send + Sync + 'static {}
impl<T: Ord + Hash + Eq + Clone + Debug + Send + Sync + 'static> Key for T {}

/// Bound alias for cache values. Equality is what lets a resynchronization
/// emit events only for entries that actually changed.
pub trait Data: Clone + Debug + PartialEq + Send + Sync + 'static {}
impl<T: Clone + Debug + PartialEq + Send + Sync + 'static> Data for T {}
