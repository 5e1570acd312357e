pub mod compare;
pub mod extract;
pub mod filter;
pub mod value;

pub use compare::{Comparator, ExtractorComparator};
pub use extract::{PropertyExtractor, SelfExtractor, Transformer, ValueExtractor};
pub use filter::{AlwaysFilter, AndFilter, CompareOp, ComparisonFilter, Filter, FilterHandle, NotFilter, OrFilter};
pub use value::{Extractable, Value};
