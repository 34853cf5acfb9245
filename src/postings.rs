//! Transactional postings store: per-key sorted series-ID lists stored as
//! delta pages in a page store, located through a per-key skiplist in a KV
//! store.
//!
//! The skiplist lives in a single bucket with composite keys
//! `encode_u64(postings_key) ++ encode_u64(last_id_in_page)` mapping to
//! `encode_u64(page_id)`. Every entry's `last_id` equals the largest ID in
//! its page at commit time; when the tail page grows, the old tail entry is
//! deleted and the new one inserted in the same transaction.

use crate::encoding::{decode_u64, encode_u64};
use crate::error::{IndexError, Result};
use crate::iter::{PageSource, PostingsIterator, SkiplistIterator, SkippingIterator};
use crate::kvstore::{KvStore, KvTx};
use crate::page::{PageDelta, PageIter};
use crate::pagestore::{PageStore, PageTx};
use crate::telemetry::index_metrics;
use crate::types::PostingsBatches;
use metrics::counter;
use std::sync::Arc;

const BUCKET_SKIPLIST: &[u8] = b"skiplist";

fn entry_key(key: u64, last_id: u64) -> [u8; 16] {
    let mut k = [0u8; 16];
    k[..8].copy_from_slice(&encode_u64(key));
    k[8..].copy_from_slice(&encode_u64(last_id));
    k
}

fn decode_entry(key: u64, raw_key: &[u8], raw_value: &[u8]) -> Result<Option<(u64, u64)>> {
    if raw_key.len() != 16 || !raw_key.starts_with(&encode_u64(key)) {
        return Ok(None);
    }
    Ok(Some((decode_u64(&raw_key[8..])?, decode_u64(raw_value)?)))
}

/// First skiplist entry of `key`, if any.
fn first_entry(tx: &dyn KvTx, key: u64) -> Result<Option<(u64, u64)>> {
    match tx.seek_ge(BUCKET_SKIPLIST, &entry_key(key, 0))? {
        Some((k, v)) => decode_entry(key, &k, &v),
        None => Ok(None),
    }
}

/// Last skiplist entry of `key`, if any. This is the tail of the postings
/// list, equivalent to seeking to `u64::MAX`.
fn last_entry(tx: &dyn KvTx, key: u64) -> Result<Option<(u64, u64)>> {
    let raw = if key == u64::MAX {
        tx.last(BUCKET_SKIPLIST)?
    } else {
        tx.prev_lt(BUCKET_SKIPLIST, &entry_key(key + 1, 0))?
    };
    match raw {
        Some((k, v)) => decode_entry(key, &k, &v),
        None => Ok(None),
    }
}

/// Entry following `(key, last_id)` within the same key, if any.
fn entry_after(tx: &dyn KvTx, key: u64, last_id: u64) -> Result<Option<(u64, u64)>> {
    match tx.next_gt(BUCKET_SKIPLIST, &entry_key(key, last_id))? {
        Some((k, v)) => decode_entry(key, &k, &v),
        None => Ok(None),
    }
}

/// Entry preceding `(key, last_id)` within the same key, if any.
fn entry_before(tx: &dyn KvTx, key: u64, last_id: u64) -> Result<Option<(u64, u64)>> {
    match tx.prev_lt(BUCKET_SKIPLIST, &entry_key(key, last_id))? {
        Some((k, v)) => decode_entry(key, &k, &v),
        None => Ok(None),
    }
}

/// Inserts `(last_id, page_id)`; fails `OutOfOrder` unless `last_id` is
/// strictly greater than every existing entry of the key.
fn skiplist_append(tx: &mut dyn KvTx, key: u64, last_id: u64, page_id: u64) -> Result<()> {
    if let Some((tail_id, _)) = last_entry(tx, key)? {
        if tail_id >= last_id {
            return Err(IndexError::OutOfOrder(format!(
                "skiplist entry {} is not greater than tail {}",
                last_id, tail_id
            )));
        }
    }
    tx.put(
        BUCKET_SKIPLIST,
        &entry_key(key, last_id),
        &encode_u64(page_id),
    )
}

/// Read-side skiplist cursor over one key's entries.
struct KvSkiplist {
    tx: Box<dyn KvTx>,
    key: u64,
    // last_id of the entry returned most recently; `next` resumes after it.
    pos: Option<u64>,
}

impl SkiplistIterator for KvSkiplist {
    fn seek(&mut self, id: u64) -> Result<(u64, u64)> {
        let found = match self.tx.seek_ge(BUCKET_SKIPLIST, &entry_key(self.key, id))? {
            Some((k, v)) => decode_entry(self.key, &k, &v)?,
            None => None,
        };
        let (mut last_id, mut page_id) = match found {
            Some(e) => e,
            // Past all entries: position at the tail. The page cursor will
            // exhaust if the target is beyond the final page.
            None => match last_entry(self.tx.as_ref(), self.key)? {
                Some(e) => e,
                None => return Err(IndexError::Exhausted),
            },
        };
        if last_id > id {
            // The previous page may contain the range holding `id`; if
            // there is none, stay on the first entry.
            if let Some((prev_id, prev_page)) = entry_before(self.tx.as_ref(), self.key, last_id)? {
                last_id = prev_id;
                page_id = prev_page;
            }
        }
        self.pos = Some(last_id);
        Ok((last_id, page_id))
    }

    fn next(&mut self) -> Result<(u64, u64)> {
        let entry = match self.pos {
            None => first_entry(self.tx.as_ref(), self.key)?,
            Some(p) => entry_after(self.tx.as_ref(), self.key, p)?,
        };
        match entry {
            Some((last_id, page_id)) => {
                self.pos = Some(last_id);
                Ok((last_id, page_id))
            }
            None => Err(IndexError::Exhausted),
        }
    }
}

/// Page source over a page-store read transaction.
struct TxPageSource {
    tx: Box<dyn PageTx>,
}

impl PageSource for TxPageSource {
    fn page_iter(&self, page_id: u64) -> Result<Box<dyn PostingsIterator>> {
        let data = self.tx.get(page_id)?;
        let page = PageDelta::from_bytes(data.as_ref().clone())?;
        Ok(Box::new(PageIter::new(page)))
    }
}

/// Read and append access to a set of postings lists.
#[derive(Debug)]
pub struct PostingsStore {
    db: Arc<dyn KvStore>,
    pages: Arc<dyn PageStore>,
}

impl PostingsStore {
    /// Opens the store over the given backends, creating the skiplist
    /// bucket if needed.
    pub fn open(db: Arc<dyn KvStore>, pages: Arc<dyn PageStore>) -> Result<Self> {
        let mut tx = db.begin(true)?;
        tx.create_bucket_if_missing(BUCKET_SKIPLIST)?;
        tx.commit()?;
        Ok(PostingsStore { db, pages })
    }

    /// Opens an iterator on the postings list associated with `key`.
    /// Returns `NotFound` if no postings exist for the key. Closing the
    /// iterator releases the read transactions on both stores.
    pub fn iter(&self, key: u64) -> Result<Box<dyn PostingsIterator>> {
        let kv = self.db.begin(false)?;
        if first_entry(kv.as_ref(), key)?.is_none() {
            return Err(IndexError::NotFound(format!("postings list {}", key)));
        }
        let pb = self.pages.begin(false)?;
        Ok(Box::new(SkippingIterator::new(
            Box::new(KvSkiplist {
                tx: kv,
                key,
                pos: None,
            }),
            Box::new(TxPageSource { tx: pb }),
        )))
    }

    /// Appends the given IDs to the postings lists of their keys. The IDs
    /// per key must be sorted and strictly greater than the last ID in that
    /// list. All batches commit atomically: the page store first, then the
    /// KV store, with both rolled back on any failure.
    pub fn append(&self, batches: &PostingsBatches) -> Result<()> {
        if batches.is_empty() {
            return Ok(());
        }
        let mut pbtx = self.pages.begin(true)?;
        let mut kvtx = self.db.begin(true)?;
        let mut appended = 0u64;
        for (&key, ids) in batches {
            if let Err(e) = append_key(kvtx.as_mut(), pbtx.as_mut(), key, ids) {
                let _ = kvtx.rollback();
                let _ = pbtx.rollback();
                return Err(e);
            }
            appended += ids.len() as u64;
        }
        // Commit pages before the skiplist: a page-store failure rolls the
        // KV store back, while a KV failure merely leaks unreferenced
        // pages. Readers never observe dangling skiplist entries.
        if let Err(e) = pbtx.commit() {
            let _ = kvtx.rollback();
            return Err(e);
        }
        kvtx.commit()?;
        counter!(index_metrics::POSTINGS_APPEND_IDS).increment(appended);
        Ok(())
    }

    /// Closes both underlying stores.
    pub fn close(&self) -> Result<()> {
        self.db.close()?;
        self.pages.close()
    }
}

/// Appends `ids` to the postings list of `key` inside the given
/// transactions, rolling the tail page over as it fills.
fn append_key(kv: &mut dyn KvTx, pb: &mut dyn PageTx, key: u64, ids: &[u64]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }

    let mut page: PageDelta;
    // ID of the current tail page; None until it is persisted.
    let mut page_id: Option<u64>;
    // Skiplist key the persisted tail page is currently filed under.
    let mut entry_id: Option<u64>;
    let mut last_in_page: u64;
    let rest: &[u64];

    match last_entry(kv, key)? {
        None => {
            // The postings list is new.
            page = PageDelta::alloc();
            page.init(ids[0])?;
            page_id = None;
            entry_id = None;
            last_in_page = ids[0];
            rest = &ids[1..];
        }
        Some((tail_id, tail_page)) => {
            // The page bytes are shared with the store; copy before
            // mutating.
            let data = pb.get(tail_page)?;
            page = PageDelta::from_bytes(data.as_ref().clone())?;
            page_id = Some(tail_page);
            entry_id = Some(tail_id);
            last_in_page = tail_id;
            rest = ids;
        }
    }

    let mut i = 0;
    loop {
        let mut rolled: Option<usize> = None;
        {
            let mut cursor = page.cursor();
            while i < rest.len() {
                match cursor.append(rest[i]) {
                    Ok(()) => {
                        last_in_page = rest[i];
                        i += 1;
                    }
                    Err(IndexError::PageFull) => {
                        rolled = Some(i);
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // Store away the current page and keep its skiplist entry keyed by
        // the page's own last ID.
        match page_id {
            None => {
                let id = pb.add(page.data())?;
                skiplist_append(kv, key, last_in_page, id)?;
                page_id = Some(id);
            }
            Some(id) => {
                pb.set(id, page.data())?;
                if entry_id != Some(last_in_page) {
                    if let Some(old) = entry_id {
                        kv.delete(BUCKET_SKIPLIST, &entry_key(key, old))?;
                    }
                    skiplist_append(kv, key, last_in_page, id)?;
                }
            }
        }

        match rolled {
            None => return Ok(()),
            Some(at) => {
                // Allocate a fresh tail page starting with the ID that did
                // not fit.
                page = PageDelta::alloc();
                page.init(rest[at])?;
                page_id = None;
                entry_id = None;
                last_in_page = rest[at];
                i = at + 1;
            }
        }
    }
}
