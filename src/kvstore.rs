//! Ordered key-value store primitive: named buckets of sorted byte keys
//! with range queries, per-bucket sequences, and transactions.
//!
//! Two backends implement the same contract: [`MemoryKvStore`] keeps
//! everything in process memory and is used by tests; [`FileKvStore`] adds
//! durability through a write-ahead log of CRC-framed, bincode-serialized
//! operation batches, one frame per committed transaction. Replay applies
//! whole frames only, so a torn tail never resurrects a partial commit.
//!
//! Readers take copy-on-write snapshots and are isolated from concurrent
//! commits; write transactions are serialized by the store.

use crate::error::{IndexError, Result};
use crate::telemetry::index_metrics;
use crc32fast::Hasher as Crc32;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Instant;

const WAL_MAGIC: &[u8; 8] = b"LBXWAL01";
const WAL_VERSION: u32 = 1;
const WAL_HEADER_LEN: u64 = 12;

/// An ordered KV store with named buckets and transactions.
pub trait KvStore: fmt::Debug + Send + Sync {
    /// Begins a transaction. Write transactions are serialized; a second
    /// writer blocks until the first commits or rolls back.
    fn begin(&self, writable: bool) -> Result<Box<dyn KvTx>>;

    /// Closes the store. Subsequent `begin` calls fail with `Closed`.
    fn close(&self) -> Result<()>;
}

/// A transaction over a [`KvStore`].
///
/// Readers observe the committed state as of `begin` plus their own writes.
/// The range primitives (`seek_ge`, `next_gt`, `prev_lt`, `first`, `last`)
/// are the stateless form of an ordered cursor; callers keep their own
/// position key.
pub trait KvTx: Send {
    fn create_bucket_if_missing(&mut self, bucket: &[u8]) -> Result<()>;

    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<()>;

    /// Returns the next value of the bucket's monotonic sequence,
    /// starting at 1.
    fn next_sequence(&mut self, bucket: &[u8]) -> Result<u64>;

    /// First entry of the bucket.
    fn first(&self, bucket: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Last entry of the bucket.
    fn last(&self, bucket: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// First entry with a key `>= key`.
    fn seek_ge(&self, bucket: &[u8], key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// First entry with a key `> key`.
    fn next_gt(&self, bucket: &[u8], key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Last entry with a key `< key`.
    fn prev_lt(&self, bucket: &[u8], key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>>;

    /// Commits the transaction. For read transactions this is equivalent
    /// to `rollback`.
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discards the transaction. Dropping a transaction has the same
    /// effect.
    fn rollback(self: Box<Self>) -> Result<()>;
}

type Bucket = BTreeMap<Vec<u8>, Vec<u8>>;

#[derive(Debug, Clone, Default)]
struct KvState {
    buckets: HashMap<Vec<u8>, Arc<Bucket>>,
    sequences: HashMap<Vec<u8>, u64>,
}

/// One logged mutation. A committed transaction is one frame holding the
/// ordered list of its operations.
#[derive(Debug, Serialize, Deserialize)]
enum WalOp {
    CreateBucket {
        bucket: Vec<u8>,
    },
    Put {
        bucket: Vec<u8>,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        bucket: Vec<u8>,
        key: Vec<u8>,
    },
    SetSequence {
        bucket: Vec<u8>,
        seq: u64,
    },
}

fn apply_op(state: &mut KvState, op: WalOp) {
    match op {
        WalOp::CreateBucket { bucket } => {
            state.buckets.entry(bucket).or_default();
        }
        WalOp::Put { bucket, key, value } => {
            let b = state.buckets.entry(bucket).or_default();
            Arc::make_mut(b).insert(key, value);
        }
        WalOp::Delete { bucket, key } => {
            if let Some(b) = state.buckets.get_mut(&bucket) {
                Arc::make_mut(b).remove(&key);
            }
        }
        WalOp::SetSequence { bucket, seq } => {
            state.sequences.insert(bucket, seq);
        }
    }
}

#[derive(Debug)]
struct WalWriter {
    file: File,
    path: PathBuf,
}

impl WalWriter {
    fn append_frame(&mut self, ops: &[WalOp], fsync: bool) -> Result<()> {
        let payload = bincode::serialize(ops)?;
        let mut hasher = Crc32::new();
        hasher.update(&payload);
        let crc = hasher.finalize();
        let len = payload.len() as u32;
        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&crc.to_le_bytes())?;
        self.file.write_all(&payload)?;
        counter!(index_metrics::WAL_BYTES_WRITTEN).increment(8 + payload.len() as u64);
        if fsync {
            let start = Instant::now();
            self.file.sync_data()?;
            histogram!(index_metrics::WAL_FSYNC_DURATION_SECONDS)
                .record(start.elapsed().as_secs_f64());
        }
        Ok(())
    }
}

/// Opens the WAL at `path`, replaying committed frames into a fresh state.
/// A torn or corrupt tail is discarded by truncating the file to the last
/// whole frame.
fn open_wal(path: &Path) -> Result<(WalWriter, KvState)> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    let file_len = file.metadata()?.len();
    if file_len == 0 {
        file.write_all(WAL_MAGIC)?;
        file.write_all(&WAL_VERSION.to_le_bytes())?;
        file.sync_data()?;
        return Ok((
            WalWriter {
                file,
                path: path.to_path_buf(),
            },
            KvState::default(),
        ));
    }
    if file_len < WAL_HEADER_LEN {
        return Err(IndexError::Corruption(format!(
            "WAL {:?} shorter than its header",
            path
        )));
    }
    let mut magic = [0u8; 8];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut magic)?;
    if &magic != WAL_MAGIC {
        return Err(IndexError::Corruption(format!("bad WAL magic in {:?}", path)));
    }
    let mut ver = [0u8; 4];
    file.read_exact(&mut ver)?;
    let version = u32::from_le_bytes(ver);
    if version != WAL_VERSION {
        return Err(IndexError::Corruption(format!(
            "unsupported WAL version {} in {:?}",
            version, path
        )));
    }

    let mut state = KvState::default();
    let mut good_end = WAL_HEADER_LEN;
    loop {
        let mut hdr = [0u8; 8];
        if !read_exact_or_eof(&mut file, &mut hdr)? {
            break;
        }
        let len = u32::from_le_bytes(hdr[0..4].try_into().expect("4-byte slice")) as usize;
        let expected_crc = u32::from_le_bytes(hdr[4..8].try_into().expect("4-byte slice"));
        let mut payload = vec![0u8; len];
        if !read_exact_or_eof(&mut file, &mut payload)? {
            break;
        }
        let mut hasher = Crc32::new();
        hasher.update(&payload);
        if hasher.finalize() != expected_crc {
            break;
        }
        let ops: Vec<WalOp> = match bincode::deserialize(&payload) {
            Ok(ops) => ops,
            Err(_) => break,
        };
        for op in ops {
            apply_op(&mut state, op);
        }
        good_end += 8 + len as u64;
    }
    if good_end < file_len {
        file.set_len(good_end)?;
        file.sync_data()?;
    }
    file.seek(SeekFrom::Start(good_end))?;
    Ok((
        WalWriter {
            file,
            path: path.to_path_buf(),
        },
        state,
    ))
}

/// Reads exactly `buf.len()` bytes, or returns `Ok(false)` if the stream
/// ends first (partial reads count as ended).
fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> Result<bool> {
    let mut read = 0;
    while read < buf.len() {
        let n = file.read(&mut buf[read..])?;
        if n == 0 {
            return Ok(false);
        }
        read += n;
    }
    Ok(true)
}

#[derive(Debug)]
struct KvShared {
    state: RwLock<Arc<KvState>>,
    writer: Mutex<bool>,
    writer_cv: Condvar,
    wal: Option<Mutex<WalWriter>>,
    fsync: bool,
    closed: AtomicBool,
}

impl KvShared {
    fn acquire_writer(&self) -> Result<()> {
        let mut active = self.writer.lock()?;
        while *active {
            active = self.writer_cv.wait(active)?;
        }
        *active = true;
        Ok(())
    }

    fn release_writer(&self) {
        if let Ok(mut active) = self.writer.lock() {
            *active = false;
            self.writer_cv.notify_one();
        }
    }

    fn begin_tx(shared: &Arc<KvShared>, writable: bool) -> Result<Box<dyn KvTx>> {
        if shared.closed.load(Ordering::SeqCst) {
            return Err(IndexError::Closed);
        }
        if writable {
            shared.acquire_writer()?;
        }
        let state = (**shared.state.read()?).clone();
        Ok(Box::new(KvTxImpl {
            shared: Arc::clone(shared),
            state,
            ops: Vec::new(),
            writable,
            done: false,
        }))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(wal) = &self.wal {
            wal.lock()?.file.sync_all()?;
        }
        Ok(())
    }
}

struct KvTxImpl {
    shared: Arc<KvShared>,
    state: KvState,
    ops: Vec<WalOp>,
    writable: bool,
    done: bool,
}

impl KvTxImpl {
    fn bucket(&self, name: &[u8]) -> Result<&Arc<Bucket>> {
        self.state.buckets.get(name).ok_or_else(|| {
            IndexError::Internal(format!(
                "bucket {:?} missing",
                String::from_utf8_lossy(name)
            ))
        })
    }

    fn bucket_mut(&mut self, name: &[u8]) -> Result<&mut Bucket> {
        let b = self.state.buckets.get_mut(name).ok_or_else(|| {
            IndexError::Internal(format!(
                "bucket {:?} missing",
                String::from_utf8_lossy(name)
            ))
        })?;
        Ok(Arc::make_mut(b))
    }

    fn check_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(IndexError::ReadOnly)
        }
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if self.writable {
            self.shared.release_writer();
        }
    }
}

fn owned(entry: Option<(&Vec<u8>, &Vec<u8>)>) -> Option<(Vec<u8>, Vec<u8>)> {
    entry.map(|(k, v)| (k.clone(), v.clone()))
}

impl KvTx for KvTxImpl {
    fn create_bucket_if_missing(&mut self, bucket: &[u8]) -> Result<()> {
        self.check_writable()?;
        if self.state.buckets.contains_key(bucket) {
            return Ok(());
        }
        self.state
            .buckets
            .insert(bucket.to_vec(), Arc::new(Bucket::new()));
        self.ops.push(WalOp::CreateBucket {
            bucket: bucket.to_vec(),
        });
        Ok(())
    }

    fn get(&self, bucket: &[u8], key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.bucket(bucket)?.get(key).cloned())
    }

    fn put(&mut self, bucket: &[u8], key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.bucket_mut(bucket)?
            .insert(key.to_vec(), value.to_vec());
        self.ops.push(WalOp::Put {
            bucket: bucket.to_vec(),
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    fn delete(&mut self, bucket: &[u8], key: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.bucket_mut(bucket)?.remove(key);
        self.ops.push(WalOp::Delete {
            bucket: bucket.to_vec(),
            key: key.to_vec(),
        });
        Ok(())
    }

    fn next_sequence(&mut self, bucket: &[u8]) -> Result<u64> {
        self.check_writable()?;
        self.bucket(bucket)?;
        let seq = self.state.sequences.get(bucket).copied().unwrap_or(0) + 1;
        self.state.sequences.insert(bucket.to_vec(), seq);
        self.ops.push(WalOp::SetSequence {
            bucket: bucket.to_vec(),
            seq,
        });
        Ok(seq)
    }

    fn first(&self, bucket: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(owned(self.bucket(bucket)?.iter().next()))
    }

    fn last(&self, bucket: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(owned(self.bucket(bucket)?.iter().next_back()))
    }

    fn seek_ge(&self, bucket: &[u8], key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let b = self.bucket(bucket)?;
        Ok(owned(
            b.range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
                .next(),
        ))
    }

    fn next_gt(&self, bucket: &[u8], key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let b = self.bucket(bucket)?;
        Ok(owned(
            b.range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
                .next(),
        ))
    }

    fn prev_lt(&self, bucket: &[u8], key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let b = self.bucket(bucket)?;
        Ok(owned(
            b.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
                .next_back(),
        ))
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        if self.done {
            return Ok(());
        }
        if !self.writable || self.ops.is_empty() {
            self.finish();
            return Ok(());
        }
        if let Some(wal) = &self.shared.wal {
            let frame = wal
                .lock()
                .map_err(IndexError::from)
                .and_then(|mut w| w.append_frame(&self.ops, self.shared.fsync));
            if let Err(e) = frame {
                self.finish();
                return Err(e);
            }
        }
        let published = self
            .shared
            .state
            .write()
            .map(|mut guard| *guard = Arc::new(std::mem::take(&mut self.state)))
            .map_err(IndexError::from);
        self.finish();
        published
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finish();
        Ok(())
    }
}

impl Drop for KvTxImpl {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Ephemeral KV store used by tests and as the non-durable backend.
#[derive(Debug)]
pub struct MemoryKvStore {
    shared: Arc<KvShared>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        MemoryKvStore {
            shared: Arc::new(KvShared {
                state: RwLock::new(Arc::new(KvState::default())),
                writer: Mutex::new(false),
                writer_cv: Condvar::new(),
                wal: None,
                fsync: false,
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryKvStore {
    fn begin(&self, writable: bool) -> Result<Box<dyn KvTx>> {
        KvShared::begin_tx(&self.shared, writable)
    }

    fn close(&self) -> Result<()> {
        self.shared.close()
    }
}

/// Durable KV store: in-memory ordered buckets backed by a write-ahead log
/// under the given directory. Reopening replays the log.
#[derive(Debug)]
pub struct FileKvStore {
    shared: Arc<KvShared>,
}

impl FileKvStore {
    pub fn open<P: AsRef<Path>>(dir: P, fsync: bool) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let wal_path = dir.as_ref().join("kv.wal");
        let (writer, state) = open_wal(&wal_path)?;
        Ok(FileKvStore {
            shared: Arc::new(KvShared {
                state: RwLock::new(Arc::new(state)),
                writer: Mutex::new(false),
                writer_cv: Condvar::new(),
                wal: Some(Mutex::new(writer)),
                fsync,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Path of the backing WAL file.
    pub fn wal_path(&self) -> Option<PathBuf> {
        self.shared
            .wal
            .as_ref()
            .and_then(|w| w.lock().ok().map(|w| w.path.clone()))
    }
}

impl KvStore for FileKvStore {
    fn begin(&self, writable: bool) -> Result<Box<dyn KvTx>> {
        KvShared::begin_tx(&self.shared, writable)
    }

    fn close(&self) -> Result<()> {
        self.shared.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const B: &[u8] = b"bucket";

    fn with_bucket(store: &dyn KvStore) {
        let mut tx = store.begin(true).unwrap();
        tx.create_bucket_if_missing(B).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn put_get_delete_roundtrip() {
        let store = MemoryKvStore::new();
        with_bucket(&store);

        let mut tx = store.begin(true).unwrap();
        tx.put(B, b"a", b"1").unwrap();
        tx.put(B, b"b", b"2").unwrap();
        tx.delete(B, b"a").unwrap();
        tx.commit().unwrap();

        let tx = store.begin(false).unwrap();
        assert_eq!(tx.get(B, b"a").unwrap(), None);
        assert_eq!(tx.get(B, b"b").unwrap(), Some(b"2".to_vec()));
        tx.rollback().unwrap();
    }

    #[test]
    fn range_primitives() {
        let store = MemoryKvStore::new();
        with_bucket(&store);
        let mut tx = store.begin(true).unwrap();
        for k in [b"b".as_slice(), b"d", b"f"] {
            tx.put(B, k, b"v").unwrap();
        }
        tx.commit().unwrap();

        let tx = store.begin(false).unwrap();
        assert_eq!(tx.first(B).unwrap().unwrap().0, b"b".to_vec());
        assert_eq!(tx.last(B).unwrap().unwrap().0, b"f".to_vec());
        assert_eq!(tx.seek_ge(B, b"c").unwrap().unwrap().0, b"d".to_vec());
        assert_eq!(tx.seek_ge(B, b"d").unwrap().unwrap().0, b"d".to_vec());
        assert_eq!(tx.next_gt(B, b"d").unwrap().unwrap().0, b"f".to_vec());
        assert_eq!(tx.prev_lt(B, b"d").unwrap().unwrap().0, b"b".to_vec());
        assert_eq!(tx.seek_ge(B, b"g").unwrap(), None);
        assert_eq!(tx.prev_lt(B, b"a").unwrap(), None);
        tx.rollback().unwrap();
    }

    #[test]
    fn readers_are_snapshot_isolated() {
        let store = MemoryKvStore::new();
        with_bucket(&store);

        let reader = store.begin(false).unwrap();

        let mut tx = store.begin(true).unwrap();
        tx.put(B, b"k", b"v").unwrap();
        tx.commit().unwrap();

        // The reader opened before the commit must not observe it.
        assert_eq!(reader.get(B, b"k").unwrap(), None);
        reader.rollback().unwrap();

        let reader = store.begin(false).unwrap();
        assert_eq!(reader.get(B, b"k").unwrap(), Some(b"v".to_vec()));
        reader.rollback().unwrap();
    }

    #[test]
    fn rollback_discards_writes_and_sequences() {
        let store = MemoryKvStore::new();
        with_bucket(&store);

        let mut tx = store.begin(true).unwrap();
        tx.put(B, b"k", b"v").unwrap();
        assert_eq!(tx.next_sequence(B).unwrap(), 1);
        tx.rollback().unwrap();

        let mut tx = store.begin(true).unwrap();
        assert_eq!(tx.get(B, b"k").unwrap(), None);
        assert_eq!(tx.next_sequence(B).unwrap(), 1);
        tx.commit().unwrap();
    }

    #[test]
    fn write_transaction_sees_its_own_writes() {
        let store = MemoryKvStore::new();
        with_bucket(&store);
        let mut tx = store.begin(true).unwrap();
        tx.put(B, b"k", b"v").unwrap();
        assert_eq!(tx.get(B, b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(tx.last(B).unwrap().unwrap().0, b"k".to_vec());
        tx.rollback().unwrap();
    }

    #[test]
    fn read_only_transaction_rejects_writes() {
        let store = MemoryKvStore::new();
        with_bucket(&store);
        let mut tx = store.begin(false).unwrap();
        assert!(matches!(tx.put(B, b"k", b"v"), Err(IndexError::ReadOnly)));
        assert!(matches!(tx.next_sequence(B), Err(IndexError::ReadOnly)));
        tx.rollback().unwrap();
    }

    #[test]
    fn sequences_are_monotonic_per_bucket() {
        let store = MemoryKvStore::new();
        with_bucket(&store);
        let mut tx = store.begin(true).unwrap();
        tx.create_bucket_if_missing(b"other").unwrap();
        assert_eq!(tx.next_sequence(B).unwrap(), 1);
        assert_eq!(tx.next_sequence(B).unwrap(), 2);
        assert_eq!(tx.next_sequence(b"other").unwrap(), 1);
        tx.commit().unwrap();

        let mut tx = store.begin(true).unwrap();
        assert_eq!(tx.next_sequence(B).unwrap(), 3);
        tx.commit().unwrap();
    }

    #[test]
    fn file_store_replays_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileKvStore::open(dir.path(), true).unwrap();
            with_bucket(&store);
            let mut tx = store.begin(true).unwrap();
            tx.put(B, b"a", b"1").unwrap();
            assert_eq!(tx.next_sequence(B).unwrap(), 1);
            tx.commit().unwrap();
            store.close().unwrap();
        }
        let store = FileKvStore::open(dir.path(), true).unwrap();
        let tx = store.begin(false).unwrap();
        assert_eq!(tx.get(B, b"a").unwrap(), Some(b"1".to_vec()));
        tx.rollback().unwrap();
        let mut tx = store.begin(true).unwrap();
        assert_eq!(tx.next_sequence(B).unwrap(), 2);
        tx.rollback().unwrap();
    }

    #[test]
    fn torn_wal_tail_is_discarded() {
        let dir = TempDir::new().unwrap();
        let wal_path;
        {
            let store = FileKvStore::open(dir.path(), true).unwrap();
            wal_path = store.wal_path().unwrap();
            with_bucket(&store);
            let mut tx = store.begin(true).unwrap();
            tx.put(B, b"committed", b"1").unwrap();
            tx.commit().unwrap();
            store.close().unwrap();
        }
        // Simulate a crash mid-frame: garbage that looks like the start of
        // a record.
        {
            let mut f = OpenOptions::new().append(true).open(&wal_path).unwrap();
            f.write_all(&[0xAB, 0xCD, 0x12, 0x34, 0x56]).unwrap();
        }
        let store = FileKvStore::open(dir.path(), true).unwrap();
        let tx = store.begin(false).unwrap();
        assert_eq!(tx.get(B, b"committed").unwrap(), Some(b"1".to_vec()));
        tx.rollback().unwrap();

        // The store keeps working after truncation.
        let mut tx = store.begin(true).unwrap();
        tx.put(B, b"after", b"2").unwrap();
        tx.commit().unwrap();
        store.close().unwrap();

        let store = FileKvStore::open(dir.path(), true).unwrap();
        let tx = store.begin(false).unwrap();
        assert_eq!(tx.get(B, b"after").unwrap(), Some(b"2".to_vec()));
        tx.rollback().unwrap();
    }

    #[test]
    fn closed_store_rejects_transactions() {
        let store = MemoryKvStore::new();
        store.close().unwrap();
        assert!(matches!(store.begin(false), Err(IndexError::Closed)));
    }
}
