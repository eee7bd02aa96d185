//! Catalog domain: remote-to-local transformation and diff classification

pub mod diff;
pub mod transform;

pub use diff::{generate_diff, CatalogDiff, DiffAction, DiffItem, DiffSummary, FieldChange};
pub use transform::{transform, transform_all, TransformedEntry};
