//! Label/series dictionary: bidirectional maps between labels and label
//! IDs, and between canonical label-ID sets and series IDs.
//!
//! Four buckets in one KV store:
//! - `label_to_id`: `utf8(key) ++ SEP ++ utf8(value)` → varint label ID
//! - `id_to_label`: varint label ID → the same composite label bytes
//! - `series_to_id`: canonical series key → varint series ID
//! - `id_to_series`: varint series ID → canonical series key
//!
//! The canonical series key is the concatenation of the set's label IDs as
//! big-endian 8-byte integers, sorted ascending, so label sets equal as
//! sets serialize identically. IDs come from per-bucket sequences and are
//! never reused.

use crate::encoding::{decode_u64, encode_u64, read_var_u64, write_var_u64};
use crate::error::{IndexError, Result};
use crate::kvstore::{KvStore, KvTx};
use crate::matcher::Matcher;
use crate::types::{LabelId, LabelSet, PostingsBatches, SeriesId};
use std::sync::Arc;

const BUCKET_LABEL_TO_ID: &[u8] = b"label_to_id";
const BUCKET_ID_TO_LABEL: &[u8] = b"id_to_label";
const BUCKET_SERIES_TO_ID: &[u8] = b"series_to_id";
const BUCKET_ID_TO_SERIES: &[u8] = b"id_to_series";

/// Separator between the key and value halves of a composite label.
/// Labels containing this byte are rejected.
pub const LABEL_SEP: u8 = 0x00;

fn varint(v: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2);
    write_var_u64(&mut buf, v);
    buf
}

fn read_varint_value(b: &[u8]) -> Result<u64> {
    let (v, n) = read_var_u64(b)?;
    if n != b.len() {
        return Err(IndexError::Corruption(
            "trailing bytes after varint value".to_string(),
        ));
    }
    Ok(v)
}

fn check_label_part(part: &str) -> Result<()> {
    if part.as_bytes().contains(&LABEL_SEP) {
        return Err(IndexError::InvalidLabel(format!(
            "label component {:?} contains the separator byte",
            part
        )));
    }
    Ok(())
}

fn label_key(key: &str, value: &str) -> Result<Vec<u8>> {
    check_label_part(key)?;
    check_label_part(value)?;
    let mut k = Vec::with_capacity(key.len() + value.len() + 1);
    k.extend_from_slice(key.as_bytes());
    k.push(LABEL_SEP);
    k.extend_from_slice(value.as_bytes());
    Ok(k)
}

fn split_label(raw: &[u8]) -> Result<(String, String)> {
    let sep = raw
        .iter()
        .position(|&b| b == LABEL_SEP)
        .ok_or_else(|| IndexError::Corruption("label without separator".to_string()))?;
    let key = std::str::from_utf8(&raw[..sep])
        .map_err(|e| IndexError::Corruption(format!("label key is not UTF-8: {}", e)))?;
    let value = std::str::from_utf8(&raw[sep + 1..])
        .map_err(|e| IndexError::Corruption(format!("label value is not UTF-8: {}", e)))?;
    Ok((key.to_string(), value.to_string()))
}

fn series_key_bytes(mut label_ids: Vec<LabelId>) -> Vec<u8> {
    label_ids.sort_unstable();
    let mut out = Vec::with_capacity(label_ids.len() * 8);
    for id in label_ids {
        out.extend_from_slice(&encode_u64(id));
    }
    out
}

/// Returns a unique ID for the label, allocating a new monotonic one on
/// first sight.
fn ensure_label(tx: &mut dyn KvTx, key: &str, value: &str) -> Result<LabelId> {
    let k = label_key(key, value)?;
    if let Some(v) = tx.get(BUCKET_LABEL_TO_ID, &k)? {
        return read_varint_value(&v);
    }
    let id = tx.next_sequence(BUCKET_ID_TO_LABEL)?;
    tx.put(BUCKET_LABEL_TO_ID, &k, &varint(id))?;
    tx.put(BUCKET_ID_TO_LABEL, &varint(id), &k)?;
    Ok(id)
}

/// Ensures all labels of `set`, forms the canonical series key, and looks
/// up or allocates the series ID. Returns the ID, the set's label IDs, and
/// whether the series is new.
fn ensure_series(tx: &mut dyn KvTx, set: &LabelSet) -> Result<(SeriesId, Vec<LabelId>, bool)> {
    let mut label_ids = Vec::with_capacity(set.len());
    for (k, v) in set {
        label_ids.push(ensure_label(tx, k, v)?);
    }
    let skey = series_key_bytes(label_ids.clone());
    if let Some(v) = tx.get(BUCKET_SERIES_TO_ID, &skey)? {
        return Ok((read_varint_value(&v)?, label_ids, false));
    }
    let sid = tx.next_sequence(BUCKET_ID_TO_SERIES)?;
    tx.put(BUCKET_SERIES_TO_ID, &skey, &varint(sid))?;
    tx.put(BUCKET_ID_TO_SERIES, &varint(sid), &skey)?;
    Ok((sid, label_ids, true))
}

fn lookup_series(tx: &dyn KvTx, sid: SeriesId) -> Result<LabelSet> {
    let skey = tx
        .get(BUCKET_ID_TO_SERIES, &varint(sid))?
        .ok_or_else(|| IndexError::NotFound(format!("series {}", sid)))?;
    if skey.len() % 8 != 0 {
        return Err(IndexError::Corruption(format!(
            "series key of {} has length {}",
            sid,
            skey.len()
        )));
    }
    let mut set = LabelSet::with_capacity(skey.len() / 8);
    for chunk in skey.chunks_exact(8) {
        let label_id = decode_u64(chunk)?;
        let raw = tx
            .get(BUCKET_ID_TO_LABEL, &varint(label_id))?
            .ok_or_else(|| {
                IndexError::Corruption(format!("label {} of series {} missing", label_id, sid))
            })?;
        let (k, v) = split_label(&raw)?;
        set.insert(k, v);
    }
    Ok(set)
}

/// The persistent label/series dictionary.
#[derive(Debug)]
pub struct Dictionary {
    db: Arc<dyn KvStore>,
}

impl Dictionary {
    /// Opens the dictionary over the given KV store, creating its buckets
    /// if needed.
    pub fn open(db: Arc<dyn KvStore>) -> Result<Self> {
        let mut tx = db.begin(true)?;
        for bucket in [
            BUCKET_LABEL_TO_ID,
            BUCKET_ID_TO_LABEL,
            BUCKET_SERIES_TO_ID,
            BUCKET_ID_TO_SERIES,
        ] {
            tx.create_bucket_if_missing(bucket)?;
        }
        tx.commit()?;
        Ok(Dictionary { db })
    }

    /// Registers every label set in one transaction and returns their
    /// series IDs in input order, together with the postings batches for
    /// series seen for the first time (label ID → new series IDs) and the
    /// number of new series. Calling again with the same sets returns the
    /// same IDs and empty batches.
    pub fn ensure_sets(
        &self,
        sets: &[LabelSet],
    ) -> Result<(Vec<SeriesId>, PostingsBatches, usize)> {
        let mut tx = self.db.begin(true)?;
        let mut sids = Vec::with_capacity(sets.len());
        let mut batches = PostingsBatches::new();
        let mut created = 0;
        for set in sets {
            match ensure_series(tx.as_mut(), set) {
                Ok((sid, label_ids, is_new)) => {
                    sids.push(sid);
                    if is_new {
                        created += 1;
                        for label_id in label_ids {
                            batches.entry(label_id).or_default().push(sid);
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.rollback();
                    return Err(e);
                }
            }
        }
        tx.commit()?;
        Ok((sids, batches, created))
    }

    /// The label set of a series ID; `NotFound` if it was never assigned.
    pub fn series(&self, sid: SeriesId) -> Result<LabelSet> {
        let tx = self.db.begin(false)?;
        lookup_series(tx.as_ref(), sid)
    }

    /// Label sets for several series IDs, resolved in one read snapshot.
    pub fn sets(&self, sids: &[SeriesId]) -> Result<Vec<LabelSet>> {
        let tx = self.db.begin(false)?;
        sids.iter()
            .map(|&sid| lookup_series(tx.as_ref(), sid))
            .collect()
    }

    /// Label IDs of all `(key, value)` labels whose key equals the
    /// matcher's key and whose value satisfies it.
    pub fn resolve(&self, matcher: &dyn Matcher) -> Result<Vec<LabelId>> {
        check_label_part(matcher.key())?;
        let mut prefix = Vec::with_capacity(matcher.key().len() + 1);
        prefix.extend_from_slice(matcher.key().as_bytes());
        prefix.push(LABEL_SEP);

        let tx = self.db.begin(false)?;
        let mut ids = Vec::new();
        let mut entry = tx.seek_ge(BUCKET_LABEL_TO_ID, &prefix)?;
        while let Some((k, v)) = entry {
            if !k.starts_with(&prefix) {
                break;
            }
            let value = std::str::from_utf8(&k[prefix.len()..])
                .map_err(|e| IndexError::Corruption(format!("label value is not UTF-8: {}", e)))?;
            if matcher.matches(value) {
                ids.push(read_varint_value(&v)?);
            }
            entry = tx.next_gt(BUCKET_LABEL_TO_ID, &k)?;
        }
        Ok(ids)
    }

    /// Closes the underlying store.
    pub fn close(&self) -> Result<()> {
        self.db.close()
    }
}
