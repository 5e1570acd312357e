use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::extract::ValueExtractor;
use crate::value::Value;

/// An opaque predicate over cache entries, evaluable on both sides of the
/// wire. The client evaluates filters against local data; the transport
/// carries the same filter to the server for remote queries and event
/// subscriptions.
pub trait Filter<K, V>: Send + Sync + fmt::Debug {
    fn evaluate(&self, key: &K, value: &V) -> bool;

    /// True for filters that match every entry. Lets callers skip wrapping
    /// when merging with a view that is not a strict subset of its cache.
    fn matches_all(&self) -> bool { false }

    /// For filters that are a single comparison over an extracted attribute,
    /// the `(extractor id, op, operand)` triple. An index keyed on the same
    /// extractor id can then answer the filter without a scan.
    fn comparison_parts(&self) -> Option<(String, CompareOp, Value)> { None }
}

/// Identity wrapper so `Arc<dyn Filter>` handles can key a map. Two handles
/// are equal iff they wrap the same allocation; filter structural equality is
/// deliberately not part of the contract.
pub struct FilterHandle<K, V>(pub Arc<dyn Filter<K, V>>);

impl<K, V> Clone for FilterHandle<K, V> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<K, V> PartialEq for FilterHandle<K, V> {
    fn eq(&self, other: &Self) -> bool { Arc::ptr_eq(&self.0, &other.0) }
}
impl<K, V> Eq for FilterHandle<K, V> {}

impl<K, V> Hash for FilterHandle<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) { (Arc::as_ptr(&self.0) as *const () as usize).hash(state) }
}

impl<K, V> fmt::Debug for FilterHandle<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
}

/// Matches every entry. The default filter of a view.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFilter;

impl AlwaysFilter {
    pub fn new() -> Self { Self }
}

impl<K, V> Filter<K, V> for AlwaysFilter {
    fn evaluate(&self, _key: &K, _value: &V) -> bool { true }

    fn matches_all(&self) -> bool { true }
}

pub struct AndFilter<K, V> {
    left: Arc<dyn Filter<K, V>>,
    right: Arc<dyn Filter<K, V>>,
}

impl<K, V> AndFilter<K, V> {
    pub fn new(left: Arc<dyn Filter<K, V>>, right: Arc<dyn Filter<K, V>>) -> Self { Self { left, right } }
}

impl<K, V> fmt::Debug for AndFilter<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AndFilter").field("left", &self.left).field("right", &self.right).finish()
    }
}

impl<K, V> Filter<K, V> for AndFilter<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn evaluate(&self, key: &K, value: &V) -> bool { self.left.evaluate(key, value) && self.right.evaluate(key, value) }

    fn matches_all(&self) -> bool { self.left.matches_all() && self.right.matches_all() }
}

pub struct OrFilter<K, V> {
    left: Arc<dyn Filter<K, V>>,
    right: Arc<dyn Filter<K, V>>,
}

impl<K, V> OrFilter<K, V> {
    pub fn new(left: Arc<dyn Filter<K, V>>, right: Arc<dyn Filter<K, V>>) -> Self { Self { left, right } }
}

impl<K, V> fmt::Debug for OrFilter<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrFilter").field("left", &self.left).field("right", &self.right).finish()
    }
}

impl<K, V> Filter<K, V> for OrFilter<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn evaluate(&self, key: &K, value: &V) -> bool { self.left.evaluate(key, value) || self.right.evaluate(key, value) }

    fn matches_all(&self) -> bool { self.left.matches_all() || self.right.matches_all() }
}

pub struct NotFilter<K, V> {
    inner: Arc<dyn Filter<K, V>>,
}

impl<K, V> NotFilter<K, V> {
    pub fn new(inner: Arc<dyn Filter<K, V>>) -> Self { Self { inner } }
}

impl<K, V> fmt::Debug for NotFilter<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotFilter").field("inner", &self.inner).finish()
    }
}

impl<K, V> Filter<K, V> for NotFilter<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn evaluate(&self, key: &K, value: &V) -> bool { !self.inner.evaluate(key, value) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Compares an extracted scalar against a constant operand. An entry whose
/// extractor yields no value never matches.
pub struct ComparisonFilter<V> {
    extractor: Arc<dyn ValueExtractor<V>>,
    op: CompareOp,
    operand: Value,
}

impl<V> fmt::Debug for ComparisonFilter<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComparisonFilter")
            .field("extractor", &self.extractor)
            .field("op", &self.op)
            .field("operand", &self.operand)
            .finish()
    }
}

impl<V> ComparisonFilter<V> {
    pub fn new(extractor: Arc<dyn ValueExtractor<V>>, op: CompareOp, operand: impl Into<Value>) -> Self {
        Self { extractor, op, operand: operand.into() }
    }

    pub fn equals(extractor: Arc<dyn ValueExtractor<V>>, operand: impl Into<Value>) -> Self {
        Self::new(extractor, CompareOp::Eq, operand)
    }

    pub fn greater(extractor: Arc<dyn ValueExtractor<V>>, operand: impl Into<Value>) -> Self {
        Self::new(extractor, CompareOp::Gt, operand)
    }

    pub fn less(extractor: Arc<dyn ValueExtractor<V>>, operand: impl Into<Value>) -> Self {
        Self::new(extractor, CompareOp::Lt, operand)
    }

    pub fn extractor(&self) -> &Arc<dyn ValueExtractor<V>> { &self.extractor }

    pub fn op(&self) -> CompareOp { self.op }

    pub fn operand(&self) -> &Value { &self.operand }
}

impl<K, V> Filter<K, V> for ComparisonFilter<V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn evaluate(&self, _key: &K, value: &V) -> bool {
        let Some(extracted) = self.extractor.extract(value) else { return false };
        let ord = extracted.compare(&self.operand);
        match self.op {
            CompareOp::Eq => ord == std::cmp::Ordering::Equal,
            CompareOp::Ne => ord != std::cmp::Ordering::Equal,
            CompareOp::Gt => ord == std::cmp::Ordering::Greater,
            CompareOp::Ge => ord != std::cmp::Ordering::Less,
            CompareOp::Lt => ord == std::cmp::Ordering::Less,
            CompareOp::Le => ord != std::cmp::Ordering::Greater,
        }
    }

    fn comparison_parts(&self) -> Option<(String, CompareOp, Value)> {
        Some((self.extractor.id(), self.op, self.operand.clone()))
    }
}

/// Conjunction of a view's own filter with a caller-supplied one. When the
/// view filter matches everything the caller's filter is returned unchanged.
pub fn merge<K, V>(view: &Arc<dyn Filter<K, V>>, user: Arc<dyn Filter<K, V>>) -> Arc<dyn Filter<K, V>>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    if view.matches_all() {
        user
    } else {
        Arc::new(AndFilter::new(view.clone(), user))
    }
}
