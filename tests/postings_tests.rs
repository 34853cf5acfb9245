use std::sync::Arc;

use labix::error::IndexError;
use labix::iter::{expand, intersect, merge, PostingsIterator};
use labix::kvstore::FileKvStore;
use labix::pagestore::FilePageStore;
use labix::postings::PostingsStore;
use labix::types::PostingsBatches;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> PostingsStore {
    let db = FileKvStore::open(dir.path().join("postings.db"), true).unwrap();
    let pages = FilePageStore::open(dir.path().join("postings.pb"), true).unwrap();
    PostingsStore::open(Arc::new(db), Arc::new(pages)).unwrap()
}

fn append_one(store: &PostingsStore, key: u64, ids: &[u64]) -> Result<(), IndexError> {
    let mut batches = PostingsBatches::new();
    batches.insert(key, ids.to_vec());
    store.append(&batches)
}

#[test]
fn intersect_two_lists() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    append_one(&store, 1, &[1, 2, 3, 5, 8, 13]).unwrap();
    append_one(&store, 2, &[2, 3, 5, 7, 11, 13]).unwrap();

    let mut it = intersect(vec![store.iter(1).unwrap(), store.iter(2).unwrap()]);
    assert_eq!(expand(it.as_mut()).unwrap(), vec![2, 3, 5, 13]);
    it.close().unwrap();
    store.close().unwrap();
}

#[test]
fn merge_two_lists_with_dedup() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    append_one(&store, 1, &[1, 2, 3, 5, 8, 13]).unwrap();
    append_one(&store, 2, &[2, 3, 5, 7, 11, 13]).unwrap();

    let mut it = merge(vec![store.iter(1).unwrap(), store.iter(2).unwrap()]);
    assert_eq!(
        expand(it.as_mut()).unwrap(),
        vec![1, 2, 3, 5, 7, 8, 11, 13]
    );
    it.close().unwrap();
    store.close().unwrap();
}

#[test]
fn page_rollover_with_seek_and_drain() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ids: Vec<u64> = (1..=10_000).collect();
    append_one(&store, 1, &ids).unwrap();

    let mut it = store.iter(1).unwrap();
    assert_eq!(expand(it.as_mut()).unwrap(), ids);
    it.close().unwrap();

    let mut it = store.iter(1).unwrap();
    assert_eq!(it.seek(7500).unwrap(), 7500);
    let mut drained = vec![7500u64];
    loop {
        match it.next() {
            Ok(v) => drained.push(v),
            Err(IndexError::Exhausted) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    it.close().unwrap();
    let expect: Vec<u64> = (7500..=10_000).collect();
    assert_eq!(drained, expect);
    store.close().unwrap();
}

#[test]
fn out_of_order_append_fails_and_leaves_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let err = append_one(&store, 1, &[5, 3]).unwrap_err();
    assert!(matches!(err, IndexError::OutOfOrder(_)));
    assert!(matches!(store.iter(1), Err(IndexError::NotFound(_))));
    store.close().unwrap();
}

#[test]
fn aborted_append_leaves_store_unchanged() {
    let dir = TempDir::new().unwrap();
    let wal_path = dir.path().join("postings.db").join("kv.wal");
    {
        let store = open_store(&dir);
        append_one(&store, 1, &[10, 20, 30]).unwrap();
        store.close().unwrap();
    }
    let wal_before = std::fs::read(&wal_path).unwrap();
    {
        let store = open_store(&dir);
        let err = append_one(&store, 1, &[25, 40]).unwrap_err();
        assert!(matches!(err, IndexError::OutOfOrder(_)));
        let mut it = store.iter(1).unwrap();
        assert_eq!(expand(it.as_mut()).unwrap(), vec![10, 20, 30]);
        it.close().unwrap();
        store.close().unwrap();
    }
    // The failed append must not have logged anything.
    let wal_after = std::fs::read(&wal_path).unwrap();
    assert_eq!(wal_before, wal_after);
}

#[test]
fn postings_survive_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(&dir);
        append_one(&store, 1, &[1, 4, 9, 16]).unwrap();
        store.close().unwrap();
    }
    let store = open_store(&dir);
    let mut it = store.iter(1).unwrap();
    assert_eq!(expand(it.as_mut()).unwrap(), vec![1, 4, 9, 16]);
    it.close().unwrap();
    store.close().unwrap();
}

#[test]
fn appends_after_reopen_continue_the_list() {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(&dir);
        append_one(&store, 1, &[1, 2, 3]).unwrap();
        store.close().unwrap();
    }
    let store = open_store(&dir);
    append_one(&store, 1, &[4, 5]).unwrap();
    let err = append_one(&store, 1, &[5]).unwrap_err();
    assert!(matches!(err, IndexError::OutOfOrder(_)));
    let mut it = store.iter(1).unwrap();
    assert_eq!(expand(it.as_mut()).unwrap(), vec![1, 2, 3, 4, 5]);
    it.close().unwrap();
    store.close().unwrap();
}

#[test]
fn rollover_list_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let ids: Vec<u64> = (1..=10_000).collect();
    {
        let store = open_store(&dir);
        append_one(&store, 1, &ids).unwrap();
        store.close().unwrap();
    }
    let store = open_store(&dir);
    let mut it = store.iter(1).unwrap();
    assert_eq!(expand(it.as_mut()).unwrap(), ids);
    it.close().unwrap();

    // The reopened tail page keeps absorbing appends.
    append_one(&store, 1, &[10_001]).unwrap();
    let mut it = store.iter(1).unwrap();
    assert_eq!(it.seek(9_999).unwrap(), 9_999);
    assert_eq!(it.next().unwrap(), 10_000);
    assert_eq!(it.next().unwrap(), 10_001);
    assert!(matches!(it.next(), Err(IndexError::Exhausted)));
    it.close().unwrap();
    store.close().unwrap();
}

#[test]
fn seek_is_monotonic_across_reseeks() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);
    let ids: Vec<u64> = (1..=5_000).map(|i| i * 3).collect();
    append_one(&store, 1, &ids).unwrap();

    let mut it = store.iter(1).unwrap();
    assert_eq!(it.seek(10).unwrap(), 12);
    assert_eq!(it.seek(100).unwrap(), 102);
    assert_eq!(it.seek(9_000).unwrap(), 9_000);
    // Values after a forward re-seek never fall below the target.
    assert_eq!(it.next().unwrap(), 9_003);
    it.close().unwrap();
    store.close().unwrap();
}
