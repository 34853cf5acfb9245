use std::collections::HashMap;

/// Identifier assigned to a distinct `(key, value)` label on first sight.
pub type LabelId = u64;

/// Identifier assigned to a distinct label set on first sight. Series IDs
/// are monotonically increasing in assignment order; that numerical order
/// defines the postings list order.
pub type SeriesId = u64;

/// Identifier of a fixed-size page in the page store.
pub type PageId = u64;

/// LabelSet type (using a HashMap for flexibility).
pub type LabelSet = HashMap<String, String>;

/// IDs to be appended to the postings list of each label-ID key. The IDs
/// per key must be sorted and strictly greater than the last ID already in
/// that postings list.
pub type PostingsBatches = HashMap<LabelId, Vec<SeriesId>>;
