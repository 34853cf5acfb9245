//! Paged blob store primitive: fixed-size pages addressed by monotonically
//! assigned page IDs, with `add`/`get`/`set` under transactions.
//!
//! [`MemoryPageStore`] is ephemeral. [`FilePageStore`] persists pages to a
//! single file (`magic + version + page size` header, page N at a fixed
//! offset) and keeps the committed pages in a copy-on-write map so readers
//! hold a consistent snapshot while the tail page is overwritten in place
//! on disk.

use crate::error::{IndexError, Result};
use crate::page::PAGE_SIZE;
use crate::telemetry::index_metrics;
use crate::types::PageId;
use metrics::counter;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};

const PAGE_FILE_MAGIC: &[u8; 8] = b"LBXPAGE1";
const PAGE_FILE_VERSION: u32 = 1;
const PAGE_FILE_HEADER_LEN: u64 = 16;

/// A store of fixed-size pages with transactions.
pub trait PageStore: fmt::Debug + Send + Sync {
    /// Begins a transaction. Write transactions are serialized.
    fn begin(&self, writable: bool) -> Result<Box<dyn PageTx>>;

    /// Closes the store. Subsequent `begin` calls fail with `Closed`.
    fn close(&self) -> Result<()>;
}

/// A transaction over a [`PageStore`].
pub trait PageTx: Send {
    /// Stores a new page and returns its ID. IDs are assigned
    /// monotonically starting at 1 and are reserved as soon as `add`
    /// returns; a rollback leaves them unused.
    fn add(&mut self, data: &[u8]) -> Result<PageId>;

    /// Retrieves a page. The bytes are shared with the store's snapshot
    /// and must be copied before mutation.
    fn get(&self, page_id: PageId) -> Result<Arc<Vec<u8>>>;

    /// Overwrites an existing page.
    fn set(&mut self, page_id: PageId, data: &[u8]) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
struct PageState {
    pages: HashMap<PageId, Arc<Vec<u8>>>,
    // Highest assigned page ID; 0 means none.
    last_id: u64,
}

#[derive(Debug)]
struct PageShared {
    state: RwLock<Arc<PageState>>,
    writer: Mutex<bool>,
    writer_cv: Condvar,
    file: Option<Mutex<std::fs::File>>,
    fsync: bool,
    closed: AtomicBool,
}

impl PageShared {
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

    fn begin_tx(shared: &Arc<PageShared>, writable: bool) -> Result<Box<dyn PageTx>> {
        if shared.closed.load(Ordering::SeqCst) {
            return Err(IndexError::Closed);
        }
        if writable {
            shared.acquire_writer()?;
        }
        let state = (**shared.state.read()?).clone();
        Ok(Box::new(PageTxImpl {
            shared: Arc::clone(shared),
            state,
            dirty: BTreeSet::new(),
            writable,
            done: false,
        }))
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(file) = &self.file {
            file.lock()?.sync_all()?;
        }
        Ok(())
    }
}

struct PageTxImpl {
    shared: Arc<PageShared>,
    state: PageState,
    dirty: BTreeSet<PageId>,
    writable: bool,
    done: bool,
}

impl PageTxImpl {
    fn check_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(IndexError::ReadOnly)
        }
    }

    fn check_page_len(data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            return Err(IndexError::Internal(format!(
                "page is {} bytes, expected {}",
                data.len(),
                PAGE_SIZE
            )));
        }
        Ok(())
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

impl PageTx for PageTxImpl {
    fn add(&mut self, data: &[u8]) -> Result<PageId> {
        self.check_writable()?;
        Self::check_page_len(data)?;
        let id = self.state.last_id + 1;
        self.state.last_id = id;
        self.state.pages.insert(id, Arc::new(data.to_vec()));
        self.dirty.insert(id);
        counter!(index_metrics::PAGES_ALLOCATED).increment(1);
        Ok(id)
    }

    fn get(&self, page_id: PageId) -> Result<Arc<Vec<u8>>> {
        self.state
            .pages
            .get(&page_id)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(format!("page {}", page_id)))
    }

    fn set(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        Self::check_page_len(data)?;
        if !self.state.pages.contains_key(&page_id) {
            return Err(IndexError::NotFound(format!("page {}", page_id)));
        }
        self.state.pages.insert(page_id, Arc::new(data.to_vec()));
        self.dirty.insert(page_id);
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        if self.done {
            return Ok(());
        }
        if !self.writable || self.dirty.is_empty() {
            self.finish();
            return Ok(());
        }
        if let Some(file) = &self.shared.file {
            let written = (|| -> Result<()> {
                let mut f = file.lock()?;
                for &id in &self.dirty {
                    let data = self
                        .state
                        .pages
                        .get(&id)
                        .ok_or_else(|| IndexError::Internal(format!("dirty page {} lost", id)))?;
                    let off = PAGE_FILE_HEADER_LEN + (id - 1) * PAGE_SIZE as u64;
                    f.seek(SeekFrom::Start(off))?;
                    f.write_all(data)?;
                }
                if self.shared.fsync {
                    f.sync_data()?;
                }
                Ok(())
            })();
            if let Err(e) = written {
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

impl Drop for PageTxImpl {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Ephemeral page store used by tests and as the non-durable backend.
#[derive(Debug)]
pub struct MemoryPageStore {
    shared: Arc<PageShared>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        MemoryPageStore {
            shared: Arc::new(PageShared {
                state: RwLock::new(Arc::new(PageState::default())),
                writer: Mutex::new(false),
                writer_cv: Condvar::new(),
                file: None,
                fsync: false,
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl Default for MemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemoryPageStore {
    fn begin(&self, writable: bool) -> Result<Box<dyn PageTx>> {
        PageShared::begin_tx(&self.shared, writable)
    }

    fn close(&self) -> Result<()> {
        self.shared.close()
    }
}

/// Durable page store over a single file.
#[derive(Debug)]
pub struct FilePageStore {
    shared: Arc<PageShared>,
}

impl FilePageStore {
    pub fn open<P: AsRef<Path>>(path: P, fsync: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let file_len = file.metadata()?.len();
        let mut state = PageState::default();
        if file_len == 0 {
            file.write_all(PAGE_FILE_MAGIC)?;
            file.write_all(&PAGE_FILE_VERSION.to_le_bytes())?;
            file.write_all(&(PAGE_SIZE as u32).to_le_bytes())?;
            file.sync_data()?;
        } else {
            if file_len < PAGE_FILE_HEADER_LEN {
                return Err(IndexError::Corruption(format!(
                    "page file {:?} shorter than its header",
                    path
                )));
            }
            let mut magic = [0u8; 8];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut magic)?;
            if &magic != PAGE_FILE_MAGIC {
                return Err(IndexError::Corruption(format!(
                    "bad page file magic in {:?}",
                    path
                )));
            }
            let mut word = [0u8; 4];
            file.read_exact(&mut word)?;
            let version = u32::from_le_bytes(word);
            if version != PAGE_FILE_VERSION {
                return Err(IndexError::Corruption(format!(
                    "unsupported page file version {} in {:?}",
                    version, path
                )));
            }
            file.read_exact(&mut word)?;
            let page_size = u32::from_le_bytes(word) as usize;
            if page_size != PAGE_SIZE {
                return Err(IndexError::Corruption(format!(
                    "page file {:?} uses page size {}, expected {}",
                    path, page_size, PAGE_SIZE
                )));
            }
            // A torn trailing page cannot be referenced: the KV commit that
            // would reference it only happens after the page commit, so the
            // partial tail is dropped.
            let full_pages = (file_len - PAGE_FILE_HEADER_LEN) / PAGE_SIZE as u64;
            let good_end = PAGE_FILE_HEADER_LEN + full_pages * PAGE_SIZE as u64;
            if good_end < file_len {
                file.set_len(good_end)?;
                file.sync_data()?;
            }
            file.seek(SeekFrom::Start(PAGE_FILE_HEADER_LEN))?;
            for id in 1..=full_pages {
                let mut buf = vec![0u8; PAGE_SIZE];
                file.read_exact(&mut buf)?;
                state.pages.insert(id, Arc::new(buf));
            }
            state.last_id = full_pages;
        }
        Ok(FilePageStore {
            shared: Arc::new(PageShared {
                state: RwLock::new(Arc::new(state)),
                writer: Mutex::new(false),
                writer_cv: Condvar::new(),
                file: Some(Mutex::new(file)),
                fsync,
                closed: AtomicBool::new(false),
            }),
        })
    }
}

impl PageStore for FilePageStore {
    fn begin(&self, writable: bool) -> Result<Box<dyn PageTx>> {
        PageShared::begin_tx(&self.shared, writable)
    }

    fn close(&self) -> Result<()> {
        self.shared.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn page(fill: u8) -> Vec<u8> {
        vec![fill; PAGE_SIZE]
    }

    #[test]
    fn add_get_set_roundtrip() {
        let store = MemoryPageStore::new();
        let mut tx = store.begin(true).unwrap();
        let p1 = tx.add(&page(1)).unwrap();
        let p2 = tx.add(&page(2)).unwrap();
        assert_eq!((p1, p2), (1, 2));
        tx.set(p1, &page(9)).unwrap();
        assert_eq!(tx.get(p1).unwrap()[0], 9);
        tx.commit().unwrap();

        let tx = store.begin(false).unwrap();
        assert_eq!(tx.get(p1).unwrap()[0], 9);
        assert_eq!(tx.get(p2).unwrap()[0], 2);
        assert!(matches!(tx.get(42), Err(IndexError::NotFound(_))));
        tx.rollback().unwrap();
    }

    #[test]
    fn wrong_page_size_rejected() {
        let store = MemoryPageStore::new();
        let mut tx = store.begin(true).unwrap();
        assert!(matches!(
            tx.add(&vec![0u8; PAGE_SIZE - 1]),
            Err(IndexError::Internal(_))
        ));
        tx.rollback().unwrap();
    }

    #[test]
    fn set_of_unknown_page_rejected() {
        let store = MemoryPageStore::new();
        let mut tx = store.begin(true).unwrap();
        assert!(matches!(
            tx.set(1, &page(0)),
            Err(IndexError::NotFound(_))
        ));
        tx.rollback().unwrap();
    }

    #[test]
    fn rollback_releases_reserved_ids() {
        let store = MemoryPageStore::new();
        let mut tx = store.begin(true).unwrap();
        assert_eq!(tx.add(&page(1)).unwrap(), 1);
        tx.rollback().unwrap();

        let reader = store.begin(false).unwrap();
        assert!(matches!(reader.get(1), Err(IndexError::NotFound(_))));
        reader.rollback().unwrap();

        let mut tx = store.begin(true).unwrap();
        assert_eq!(tx.add(&page(2)).unwrap(), 1);
        tx.commit().unwrap();
    }

    #[test]
    fn readers_snapshot_survives_tail_overwrite() {
        let store = MemoryPageStore::new();
        let mut tx = store.begin(true).unwrap();
        tx.add(&page(1)).unwrap();
        tx.commit().unwrap();

        let reader = store.begin(false).unwrap();
        let before = reader.get(1).unwrap();

        let mut tx = store.begin(true).unwrap();
        tx.set(1, &page(7)).unwrap();
        tx.commit().unwrap();

        assert_eq!(before[0], 1);
        assert_eq!(reader.get(1).unwrap()[0], 1);
        reader.rollback().unwrap();
    }

    #[test]
    fn file_store_persists_pages_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("postings.pb");
        {
            let store = FilePageStore::open(&path, true).unwrap();
            let mut tx = store.begin(true).unwrap();
            assert_eq!(tx.add(&page(3)).unwrap(), 1);
            assert_eq!(tx.add(&page(4)).unwrap(), 2);
            tx.commit().unwrap();
            store.close().unwrap();
        }
        let store = FilePageStore::open(&path, true).unwrap();
        let tx = store.begin(false).unwrap();
        assert_eq!(tx.get(1).unwrap()[0], 3);
        assert_eq!(tx.get(2).unwrap()[0], 4);
        tx.rollback().unwrap();

        let mut tx = store.begin(true).unwrap();
        assert_eq!(tx.add(&page(5)).unwrap(), 3);
        tx.commit().unwrap();
        store.close().unwrap();
    }

    #[test]
    fn torn_trailing_page_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("postings.pb");
        {
            let store = FilePageStore::open(&path, true).unwrap();
            let mut tx = store.begin(true).unwrap();
            tx.add(&page(1)).unwrap();
            tx.commit().unwrap();
            store.close().unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 100]).unwrap();
        }
        let store = FilePageStore::open(&path, true).unwrap();
        let mut tx = store.begin(true).unwrap();
        assert_eq!(tx.get(1).unwrap()[0], 1);
        // The next allocation reuses the space of the dropped partial page.
        assert_eq!(tx.add(&page(2)).unwrap(), 2);
        tx.commit().unwrap();
        store.close().unwrap();
    }
}
