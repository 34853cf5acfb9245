#![doc = r#"
labix: Embedded Inverted Index over Labeled Series in Rust

This crate provides an embedded inverted index for entities ("series")
identified by sets of key/value labels. It is designed for efficient
registration and matcher-based retrieval of large numbers of series, with
support for:
- Monotonic 64-bit series, label, and page IDs
- Delta-compressed, paged postings lists with skiplist-accelerated seeks
- Intersection and union iterators running in time proportional to output
- Transactional appends with crash atomicity over a WAL-backed KV store
  and a fixed-size page store
- Pluggable storage backends (durable file stores and in-memory stores)

See the README for usage examples and more details.
"#]
// Declare modules
pub mod dictionary;
pub mod encoding;
pub mod error;
pub mod index;
pub mod iter;
pub mod kvstore;
pub mod matcher;
pub mod page;
pub mod pagestore;
pub mod postings;
pub mod telemetry;
pub mod types;

/// Main entry point for interacting with the index.
pub use crate::index::Index;
/// Configuration options for the index.
pub use crate::index::IndexConfig;
/// Error type for index operations.
pub use crate::error::IndexError;
/// Result alias used throughout the crate.
pub use crate::error::Result;
/// Predicate over label values.
pub use crate::matcher::{EqualMatcher, Matcher, PrefixMatcher};
/// Structured event hook for observability.
pub use crate::telemetry::{IndexEvent, IndexEventListener};
/// Type alias for a set of labels (key-value pairs) identifying a series.
pub use crate::types::LabelSet;
/// 64-bit identifiers assigned by the store.
pub use crate::types::{LabelId, PageId, SeriesId};
/// Size of every postings page in bytes.
pub use crate::page::PAGE_SIZE;
