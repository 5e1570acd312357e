use std::fmt;

use crate::value::{Extractable, Value};

/// Extracts a scalar from a cache value. Extractors are evaluated both
/// client-side (local predicate checks, local indexes) and server-side
/// (the transport carries them by `id`).
///
/// The `id` is the identity under which an index registration is keyed; two
/// extractors with the same id are considered to address the same attribute.
pub trait ValueExtractor<V>: Send + Sync + fmt::Debug {
    fn extract(&self, value: &V) -> Option<Value>;

    /// Stable identity of the extracted attribute.
    fn id(&self) -> String;
}

/// Extracts a named property from a record-like value.
#[derive(Debug, Clone)]
pub struct PropertyExtractor {
    name: String,
}

impl PropertyExtractor {
    pub fn new(name: impl Into<String>) -> Self { Self { name: name.into() } }

    pub fn name(&self) -> &str { &self.name }
}

impl<V: Extractable> ValueExtractor<V> for PropertyExtractor {
    fn extract(&self, value: &V) -> Option<Value> { value.value(&self.name) }

    fn id(&self) -> String { format!("property:{}", self.name) }
}

/// Extracts the value itself, for caches whose values are scalars.
#[derive(Debug, Clone, Default)]
pub struct SelfExtractor;

impl SelfExtractor {
    pub fn new() -> Self { Self }
}

impl<V: Clone + Into<Value>> ValueExtractor<V> for SelfExtractor {
    fn extract(&self, value: &V) -> Option<Value> { Some(value.clone().into()) }

    fn id(&self) -> String { "self".to_string() }
}

/// Maps a cache value before it is stored in a client-side view. Transformers
/// are type-preserving projections: a view built with a transformer stores
/// `transform(remote_value)` and becomes read-only.
pub trait Transformer<V>: Send + Sync + fmt::Debug {
    fn transform(&self, value: V) -> V;
}
