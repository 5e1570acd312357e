use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::extract::ValueExtractor;

/// Orders cache values, e.g. for sorted entry queries. Carried to the server
/// by id alongside index registrations; evaluated locally for view-side sorts.
pub trait Comparator<V>: Send + Sync + fmt::Debug {
    fn compare(&self, a: &V, b: &V) -> Ordering;
}

/// Orders values by an extracted scalar; values the extractor cannot reach
/// sort last.
#[derive(Debug)]
pub struct ExtractorComparator<V> {
    extractor: Arc<dyn ValueExtractor<V>>,
}

impl<V> ExtractorComparator<V> {
    pub fn new(extractor: Arc<dyn ValueExtractor<V>>) -> Self { Self { extractor } }
}

impl<V: Send + Sync + fmt::Debug> Comparator<V> for ExtractorComparator<V> {
    fn compare(&self, a: &V, b: &V) -> Ordering {
        match (self.extractor.extract(a), self.extractor.extract(b)) {
            (Some(x), Some(y)) => x.compare(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}
