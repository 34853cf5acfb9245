//! Top-level index facade: wires the label/series dictionary to the
//! postings store and exposes registration and matcher queries.

use crate::dictionary::Dictionary;
use crate::error::{IndexError, Result};
use crate::iter::{expand, intersect, merge, PostingsIterator};
use crate::kvstore::{FileKvStore, KvStore};
use crate::matcher::Matcher;
use crate::pagestore::{FilePageStore, PageStore};
use crate::postings::PostingsStore;
use crate::telemetry::{noop_event_listener, IndexEvent, IndexEventListener};
use crate::types::{LabelSet, SeriesId};
use metrics::{counter, histogram};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Configuration options for an [`Index`].
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Directory holding the on-disk stores (`series.db`, `postings.db`,
    /// `postings.pb`). Created if missing.
    pub data_dir: PathBuf,
    /// Whether commits fsync before being acknowledged.
    pub fsync: bool,
    /// Structured event hook for observability (no-op by default).
    pub event_listener: Arc<dyn IndexEventListener>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            data_dir: PathBuf::from("./data"),
            fsync: true,
            event_listener: noop_event_listener(),
        }
    }
}

/// An inverted index over labeled series.
///
/// Clients register label sets with [`Index::ensure_sets`], receive stable
/// series IDs, and query with [`Index::select`]: each matcher resolves to
/// the union of its label-ID postings lists, and the matchers' results are
/// intersected.
#[derive(Debug)]
pub struct Index {
    dict: Dictionary,
    postings: PostingsStore,
    events: Arc<dyn IndexEventListener>,
}

impl Index {
    /// Opens (or creates) an index with durable file-backed stores under
    /// `config.data_dir`.
    pub fn open(config: IndexConfig) -> Result<Index> {
        fs::create_dir_all(&config.data_dir)?;
        let series_db: Arc<dyn KvStore> = Arc::new(FileKvStore::open(
            config.data_dir.join("series.db"),
            config.fsync,
        )?);
        let postings_db: Arc<dyn KvStore> = Arc::new(FileKvStore::open(
            config.data_dir.join("postings.db"),
            config.fsync,
        )?);
        let pages: Arc<dyn PageStore> = Arc::new(FilePageStore::open(
            config.data_dir.join("postings.pb"),
            config.fsync,
        )?);
        Self::with_stores(series_db, postings_db, pages, config.event_listener)
    }

    /// Wires an index over explicitly provided store implementations.
    /// Used with the in-memory backends in tests; there is no process-wide
    /// backend registry.
    pub fn with_stores(
        series_db: Arc<dyn KvStore>,
        postings_db: Arc<dyn KvStore>,
        pages: Arc<dyn PageStore>,
        event_listener: Arc<dyn IndexEventListener>,
    ) -> Result<Index> {
        let dict = Dictionary::open(series_db)?;
        let postings = PostingsStore::open(postings_db, pages)?;
        Ok(Index {
            dict,
            postings,
            events: event_listener,
        })
    }

    /// Registers every label set and returns their series IDs in input
    /// order. Sets seen before keep their IDs; new series are appended to
    /// the postings list of each of their labels.
    pub fn ensure_sets(&self, sets: &[LabelSet]) -> Result<Vec<SeriesId>> {
        let (sids, batches, created) = self.dict.ensure_sets(sets)?;
        if !batches.is_empty() {
            if let Err(e) = self.postings.append(&batches) {
                self.events.on_event(IndexEvent::PostingsAppendFailed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        }
        counter!(crate::telemetry::index_metrics::ENSURE_SERIES_NEW).increment(created as u64);
        self.events.on_event(IndexEvent::SeriesRegistered {
            requested: sets.len(),
            new: created,
        });
        Ok(sids)
    }

    /// The label sets of the given series IDs.
    pub fn sets(&self, sids: &[SeriesId]) -> Result<Vec<LabelSet>> {
        self.dict.sets(sids)
    }

    /// Series IDs satisfying all matchers, ascending. Within one matcher
    /// the postings lists of all matching label IDs are unioned; across
    /// matchers the streams are intersected. An empty matcher list selects
    /// nothing.
    pub fn select(&self, matchers: &[Box<dyn Matcher>]) -> Result<Vec<SeriesId>> {
        let start = Instant::now();
        let mut per_matcher: Vec<Box<dyn PostingsIterator>> = Vec::new();
        for matcher in matchers {
            let label_ids = self.dict.resolve(matcher.as_ref())?;
            let mut its: Vec<Box<dyn PostingsIterator>> = Vec::new();
            for label_id in label_ids {
                match self.postings.iter(label_id) {
                    Ok(it) => its.push(it),
                    // A label with no postings list contributes nothing.
                    Err(IndexError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            if its.is_empty() {
                // One matcher selecting nothing empties the intersection.
                for mut it in per_matcher {
                    let _ = it.close();
                }
                return Ok(Vec::new());
            }
            per_matcher.push(merge(its));
        }
        if per_matcher.is_empty() {
            return Ok(Vec::new());
        }
        let mut it = intersect(per_matcher);
        let res = expand(it.as_mut());
        let _ = it.close();
        histogram!(crate::telemetry::index_metrics::SELECT_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        res
    }

    /// Closes the dictionary and postings stores.
    pub fn close(&self) -> Result<()> {
        self.dict.close()?;
        self.postings.close()?;
        self.events.on_event(IndexEvent::Closed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kvstore::MemoryKvStore;
    use crate::matcher::{EqualMatcher, PrefixMatcher};
    use crate::pagestore::MemoryPageStore;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn mem_index() -> Index {
        Index::with_stores(
            Arc::new(MemoryKvStore::new()),
            Arc::new(MemoryKvStore::new()),
            Arc::new(MemoryPageStore::new()),
            noop_event_listener(),
        )
        .unwrap()
    }

    fn eq(key: &str, value: &str) -> Box<dyn Matcher> {
        Box::new(EqualMatcher::new(key, value))
    }

    #[test]
    fn select_intersects_matchers() {
        let ix = mem_index();
        let sids = ix
            .ensure_sets(&[
                labels(&[("job", "api"), ("zone", "eu")]),
                labels(&[("job", "api"), ("zone", "us")]),
                labels(&[("job", "db"), ("zone", "eu")]),
            ])
            .unwrap();

        let res = ix.select(&[eq("job", "api")]).unwrap();
        assert_eq!(res, vec![sids[0], sids[1]]);

        let res = ix.select(&[eq("job", "api"), eq("zone", "eu")]).unwrap();
        assert_eq!(res, vec![sids[0]]);

        let res = ix.select(&[eq("job", "db"), eq("zone", "us")]).unwrap();
        assert!(res.is_empty());
    }

    #[test]
    fn select_unions_within_a_matcher() {
        let ix = mem_index();
        let sids = ix
            .ensure_sets(&[
                labels(&[("zone", "eu-west")]),
                labels(&[("zone", "eu-north")]),
                labels(&[("zone", "us-east")]),
            ])
            .unwrap();
        let res = ix
            .select(&[Box::new(PrefixMatcher::new("zone", "eu-")) as Box<dyn Matcher>])
            .unwrap();
        let mut expect = vec![sids[0], sids[1]];
        expect.sort_unstable();
        assert_eq!(res, expect);
    }

    #[test]
    fn select_with_unknown_key_is_empty() {
        let ix = mem_index();
        ix.ensure_sets(&[labels(&[("a", "1")])]).unwrap();
        assert!(ix.select(&[eq("missing", "x")]).unwrap().is_empty());
        assert!(ix
            .select(&[eq("a", "1"), eq("missing", "x")])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn select_with_no_matchers_is_empty() {
        let ix = mem_index();
        ix.ensure_sets(&[labels(&[("a", "1")])]).unwrap();
        assert!(ix.select(&[]).unwrap().is_empty());
    }

    #[test]
    fn reregistration_does_not_duplicate_postings() {
        let ix = mem_index();
        let set = labels(&[("job", "api")]);
        let first = ix.ensure_sets(std::slice::from_ref(&set)).unwrap();
        let second = ix.ensure_sets(std::slice::from_ref(&set)).unwrap();
        assert_eq!(first, second);
        let res = ix.select(&[eq("job", "api")]).unwrap();
        assert_eq!(res, first);
    }

    #[test]
    fn sets_resolves_selected_ids() {
        let ix = mem_index();
        let registered = labels(&[("job", "api"), ("zone", "eu")]);
        ix.ensure_sets(std::slice::from_ref(&registered)).unwrap();
        let res = ix.select(&[eq("zone", "eu")]).unwrap();
        let sets = ix.sets(&res).unwrap();
        assert_eq!(sets, vec![registered]);
    }
}
