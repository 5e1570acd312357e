pub mod grid;

pub use grid::MockGrid;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lattice_core::{event_fn, MapEvent, MapListener};

/// A listener that records every event it receives, and a handle to drain
/// what was recorded.
pub fn event_recorder<K, V>() -> (Arc<dyn MapListener<K, V>>, EventLog<K, V>)
where
    K: lattice_core::Key,
    V: lattice_core::Data,
{
    let log = EventLog(Arc::new(Mutex::new(Vec::new())));
    let sink = log.clone();
    (event_fn(move |event: &MapEvent<K, V>| sink.0.lock().unwrap().push(event.clone())), log)
}

pub struct EventLog<K, V>(Arc<Mutex<Vec<MapEvent<K, V>>>>);

impl<K, V> Clone for EventLog<K, V> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<K: Clone, V: Clone> EventLog<K, V> {
    pub fn drain(&self) -> Vec<MapEvent<K, V>> { self.0.lock().unwrap().drain(..).collect() }

    pub fn snapshot(&self) -> Vec<MapEvent<K, V>> { self.0.lock().unwrap().clone() }

    pub fn len(&self) -> usize { self.0.lock().unwrap().len() }

    pub fn is_empty(&self) -> bool { self.0.lock().unwrap().is_empty() }
}

/// Let queued dispatcher deliveries settle.
pub async fn settle() { tokio::time::sleep(Duration::from_millis(50)).await }

/// `value > threshold` over integer-valued caches with string keys.
pub fn over(threshold: i64) -> Arc<dyn lattice_query::Filter<String, i64>> {
    Arc::new(lattice_query::ComparisonFilter::greater(Arc::new(lattice_query::SelfExtractor), threshold))
}
