//! Sorted ID iterators and their set-algebra combinators.
//!
//! Everything that produces series IDs implements [`PostingsIterator`]:
//! page cursors, skiplist-backed skipping iterators, and the
//! [`intersect`]/[`merge`] combinator trees built over them. End of stream
//! is the dedicated [`IndexError::Exhausted`] condition; any other error
//! aborts the iterator.

use crate::error::{IndexError, Result};
use std::collections::HashMap;

/// A sorted stream of 64-bit IDs.
pub trait PostingsIterator: Send {
    /// Retrieves the next ID in the stream.
    fn next(&mut self) -> Result<u64>;

    /// Moves the cursor to `id` or the closest following ID if it does not
    /// exist, and returns the ID at the position.
    fn seek(&mut self, id: u64) -> Result<u64>;

    /// Releases underlying resources (read transactions). Idempotent.
    fn close(&mut self) -> Result<()>;
}

/// An iterator over no IDs.
#[derive(Debug, Default)]
pub struct EmptyIterator;

impl PostingsIterator for EmptyIterator {
    fn next(&mut self) -> Result<u64> {
        Err(IndexError::Exhausted)
    }

    fn seek(&mut self, _id: u64) -> Result<u64> {
        Err(IndexError::Exhausted)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// Leading value of one combinator side. `None` means the side has not been
// advanced yet; priming is deferred so constructing a combinator stays free
// of I/O.
type Side = Option<Result<u64>>;

fn prime(side: &mut Side, it: &mut dyn PostingsIterator) -> Result<u64> {
    match side {
        Some(r) => r.clone(),
        None => {
            let r = it.next();
            *side = Some(r.clone());
            r
        }
    }
}

/// Union of two sorted streams with deduplication.
pub struct MergeIterator {
    i1: Box<dyn PostingsIterator>,
    i2: Box<dyn PostingsIterator>,
    cur1: Side,
    cur2: Side,
}

impl MergeIterator {
    fn new(i1: Box<dyn PostingsIterator>, i2: Box<dyn PostingsIterator>) -> Self {
        MergeIterator {
            i1,
            i2,
            cur1: None,
            cur2: None,
        }
    }
}

impl PostingsIterator for MergeIterator {
    fn next(&mut self) -> Result<u64> {
        let c1 = prime(&mut self.cur1, self.i1.as_mut());
        let c2 = prime(&mut self.cur2, self.i2.as_mut());
        match (c1, c2) {
            (Err(e1), Err(e2)) => {
                if !matches!(e1, IndexError::Exhausted) {
                    Err(e1)
                } else if !matches!(e2, IndexError::Exhausted) {
                    Err(e2)
                } else {
                    Err(IndexError::Exhausted)
                }
            }
            (Err(e1), Ok(v2)) => {
                if !matches!(e1, IndexError::Exhausted) {
                    return Err(e1);
                }
                self.cur2 = Some(self.i2.next());
                Ok(v2)
            }
            (Ok(v1), Err(e2)) => {
                if !matches!(e2, IndexError::Exhausted) {
                    return Err(e2);
                }
                self.cur1 = Some(self.i1.next());
                Ok(v1)
            }
            (Ok(v1), Ok(v2)) => {
                if v1 < v2 {
                    self.cur1 = Some(self.i1.next());
                    Ok(v1)
                } else if v2 < v1 {
                    self.cur2 = Some(self.i2.next());
                    Ok(v2)
                } else {
                    self.cur1 = Some(self.i1.next());
                    self.cur2 = Some(self.i2.next());
                    Ok(v1)
                }
            }
        }
    }

    fn seek(&mut self, id: u64) -> Result<u64> {
        self.cur1 = Some(self.i1.seek(id));
        self.cur2 = Some(self.i2.seek(id));
        self.next()
    }

    fn close(&mut self) -> Result<()> {
        self.i1.close()?;
        self.i2.close()
    }
}

/// Intersection of two sorted streams. Each side leapfrogs the other via
/// `seek`, so the cost is proportional to the output, not the inputs.
pub struct IntersectIterator {
    i1: Box<dyn PostingsIterator>,
    i2: Box<dyn PostingsIterator>,
    cur1: Side,
    cur2: Side,
}

impl IntersectIterator {
    fn new(i1: Box<dyn PostingsIterator>, i2: Box<dyn PostingsIterator>) -> Self {
        IntersectIterator {
            i1,
            i2,
            cur1: None,
            cur2: None,
        }
    }
}

impl PostingsIterator for IntersectIterator {
    fn next(&mut self) -> Result<u64> {
        loop {
            let c1 = prime(&mut self.cur1, self.i1.as_mut());
            let c2 = prime(&mut self.cur2, self.i2.as_mut());
            let (v1, v2) = match (c1, c2) {
                (Err(e), _) => return Err(e),
                (_, Err(e)) => return Err(e),
                (Ok(v1), Ok(v2)) => (v1, v2),
            };
            if v1 < v2 {
                self.cur1 = Some(self.i1.seek(v2));
            } else if v2 < v1 {
                self.cur2 = Some(self.i2.seek(v1));
            } else {
                self.cur1 = Some(self.i1.next());
                self.cur2 = Some(self.i2.next());
                return Ok(v1);
            }
        }
    }

    fn seek(&mut self, id: u64) -> Result<u64> {
        // Both sides must be advanced; seeking only one would false-match
        // on its old leading value.
        self.cur1 = Some(self.i1.seek(id));
        self.cur2 = Some(self.i2.seek(id));
        self.next()
    }

    fn close(&mut self) -> Result<()> {
        self.i1.close()?;
        self.i2.close()
    }
}

/// Folds any number of iterators into a left-leaning binary merge tree.
/// An empty input yields an empty iterator.
pub fn merge(its: Vec<Box<dyn PostingsIterator>>) -> Box<dyn PostingsIterator> {
    let mut its = its.into_iter();
    let mut i1 = match its.next() {
        Some(it) => it,
        None => return Box::new(EmptyIterator),
    };
    for i2 in its {
        i1 = Box::new(MergeIterator::new(i1, i2));
    }
    i1
}

/// Folds any number of iterators into a left-leaning binary intersect tree.
/// An empty input yields an empty iterator.
pub fn intersect(its: Vec<Box<dyn PostingsIterator>>) -> Box<dyn PostingsIterator> {
    let mut its = its.into_iter();
    let mut i1 = match its.next() {
        Some(it) => it,
        None => return Box::new(EmptyIterator),
    };
    for i2 in its {
        i1 = Box::new(IntersectIterator::new(i1, i2));
    }
    i1
}

/// Materializes `it` into a sorted, deduplicated vector. `Exhausted` is
/// consumed here; any other error is surfaced.
pub fn expand(it: &mut dyn PostingsIterator) -> Result<Vec<u64>> {
    let mut res = Vec::new();
    let mut r = it.seek(0);
    loop {
        match r {
            Ok(v) => res.push(v),
            Err(IndexError::Exhausted) => break,
            Err(e) => return Err(e),
        }
        r = it.next();
    }
    res.dedup();
    Ok(res)
}

/// Iterator over an in-memory sorted list of IDs.
#[derive(Debug)]
pub struct PlainListIterator {
    list: Vec<u64>,
    pos: usize,
}

impl PlainListIterator {
    pub fn new(mut list: Vec<u64>) -> Self {
        list.sort_unstable();
        PlainListIterator { list, pos: 0 }
    }
}

impl PostingsIterator for PlainListIterator {
    fn next(&mut self) -> Result<u64> {
        if self.pos >= self.list.len() {
            return Err(IndexError::Exhausted);
        }
        let x = self.list[self.pos];
        self.pos += 1;
        Ok(x)
    }

    fn seek(&mut self, id: u64) -> Result<u64> {
        self.pos = self.list.partition_point(|&x| x < id);
        self.next()
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A skiplist iterates through `(last_id_in_page, page_id)` pairs.
pub trait SkiplistIterator: Send {
    /// Positions at the entry whose page may contain `id` and returns it.
    /// After `seek`, `next` yields the following entry.
    fn seek(&mut self, id: u64) -> Result<(u64, u64)>;

    /// Returns the next `(last_id, page_id)` pair.
    fn next(&mut self) -> Result<(u64, u64)>;
}

/// Retrieves a page iterator for a page ID. Implementations hold the read
/// transaction the page bytes are borrowed from.
pub trait PageSource: Send {
    fn page_iter(&self, page_id: u64) -> Result<Box<dyn PostingsIterator>>;
}

struct SkippingInner {
    skiplist: Box<dyn SkiplistIterator>,
    pages: Box<dyn PageSource>,
    // The page iterator holding the next value.
    cur: Option<Box<dyn PostingsIterator>>,
}

/// Iterator over a paged postings list. The skiplist jumps close to the
/// seeked value; the page cursor finishes the job. This speeds up seeks
/// when the underlying pages cannot be searched in `O(log n)`.
pub struct SkippingIterator {
    inner: Option<SkippingInner>,
}

impl SkippingIterator {
    pub fn new(skiplist: Box<dyn SkiplistIterator>, pages: Box<dyn PageSource>) -> Self {
        SkippingIterator {
            inner: Some(SkippingInner {
                skiplist,
                pages,
                cur: None,
            }),
        }
    }
}

impl PostingsIterator for SkippingIterator {
    fn seek(&mut self, id: u64) -> Result<u64> {
        let inner = self.inner.as_mut().ok_or(IndexError::Closed)?;
        let (_, mut ptr) = inner.skiplist.seek(id)?;
        loop {
            let mut cur = inner.pages.page_iter(ptr)?;
            match cur.seek(id) {
                Ok(v) => {
                    inner.cur = Some(cur);
                    return Ok(v);
                }
                // The skiplist may position one page early (its entry keys
                // track the tail lazily); fall through to the next page.
                Err(IndexError::Exhausted) => match inner.skiplist.next() {
                    Ok((_, next_ptr)) => ptr = next_ptr,
                    Err(e) => {
                        inner.cur = Some(cur);
                        return Err(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    fn next(&mut self) -> Result<u64> {
        {
            let inner = self.inner.as_mut().ok_or(IndexError::Closed)?;
            if let Some(cur) = inner.cur.as_mut() {
                match cur.next() {
                    Ok(id) => return Ok(id),
                    Err(IndexError::Exhausted) => {}
                    Err(e) => return Err(e),
                }
                // We reached the end of the current page. Get the next one
                // through the skiplist; Exhausted here is the end of the
                // whole list.
                let (_, ptr) = inner.skiplist.next()?;
                let mut cur = inner.pages.page_iter(ptr)?;
                let first = cur.seek(0);
                inner.cur = Some(cur);
                return first;
            }
        }
        // If next was called initially.
        self.seek(0)
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the inner state releases the skiplist and page
        // transactions.
        self.inner = None;
        Ok(())
    }
}

/// Skiplist iterator over a plain in-memory mapping, for tests.
#[derive(Debug)]
pub struct PlainSkiplistIterator {
    m: HashMap<u64, u64>,
    keys: Vec<u64>,
    pos: usize,
}

impl PlainSkiplistIterator {
    pub fn new(m: HashMap<u64, u64>) -> Self {
        let mut keys: Vec<u64> = m.keys().copied().collect();
        keys.sort_unstable();
        PlainSkiplistIterator { m, keys, pos: 0 }
    }
}

impl SkiplistIterator for PlainSkiplistIterator {
    fn seek(&mut self, id: u64) -> Result<(u64, u64)> {
        if self.keys.is_empty() {
            return Err(IndexError::Exhausted);
        }
        let mut pos = self.keys.partition_point(|&k| k < id);
        if pos == self.keys.len() {
            pos -= 1;
        } else if self.keys[pos] > id && pos > 0 {
            pos -= 1;
        }
        self.pos = pos;
        self.next()
    }

    fn next(&mut self) -> Result<(u64, u64)> {
        if self.pos >= self.keys.len() {
            return Err(IndexError::Exhausted);
        }
        let k = self.keys[self.pos];
        self.pos += 1;
        Ok((k, self.m[&k]))
    }
}
