//! Local matching stages: direct identifier extraction (Stage 1) and
//! fuzzy string matching (Stage 2). Both are deterministic, in-process
//! and cost-free.

pub mod direct;
pub mod fuzzy;
pub mod reference;

pub use direct::{DirectMatcher, DirectMatcherConfig};
pub use fuzzy::{token_sort_ratio, FuzzyMatcher, FuzzyMatcherConfig};
pub use reference::{ReferenceIndex, ReferenceRecord};
