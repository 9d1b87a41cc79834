//! Heap-organized table files.
//!
//! A heap file is an ordered sequence of fixed-size pages backing one table;
//! tuples live wherever a page has room. File handles are opened per call
//! rather than cached, so no handle is ever shared across threads. All page
//! traffic on behalf of a transaction goes through the buffer pool, which
//! enforces locking; the raw `read_page`/`write_page` entry points are for
//! the pool itself and for recovery.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use parking_lot::Mutex;

use crate::access::tuple::{Tuple, TupleId};
use crate::catalog::TableId;
use crate::storage::buffer::{BufferPool, Permission, SharedPage};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::slotted::SlottedPage;
use crate::storage::page::{HeapPage, PageId};
use crate::transaction::TransactionId;

/// Capability set of a table file. Heap files implement it today; an
/// index-organized file would implement the same surface.
pub trait DbFile: Send + Sync {
    fn table_id(&self) -> TableId;

    /// Reads one page's bytes straight from disk, bypassing cache and locks.
    fn read_page(&self, page_id: PageId) -> StorageResult<HeapPage>;

    /// Overwrites one page on disk. Refuses page numbers beyond the current
    /// extent.
    fn write_page(&self, page: &HeapPage) -> StorageResult<()>;

    /// Number of whole pages in the file, derived from its length.
    fn num_pages(&self) -> StorageResult<u32>;

    /// Inserts a tuple somewhere in the file on behalf of `txn`, going
    /// through `pool` for every page it touches. Returns the pages it
    /// mutated (always exactly one for a heap file).
    fn insert_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        data: &[u8],
    ) -> Result<Vec<SharedPage>>;

    /// Removes the tuple named by its embedded id. Returns the mutated pages.
    fn delete_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<SharedPage>>;

    /// A lazy scan over all live tuples, page by page, under read permission.
    fn iterator<'a>(
        &'a self,
        pool: &'a BufferPool,
        txn: TransactionId,
    ) -> Box<dyn TupleIterator + 'a>;
}

/// One on-disk table: pages laid out contiguously, page `n` at byte offset
/// `n * page_size`, file length always an exact multiple of the page size.
pub struct HeapFile {
    path: PathBuf,
    table_id: TableId,
    page_size: usize,
    // Serializes file growth so two inserts cannot append over each other.
    append_lock: Mutex<()>,
}

impl HeapFile {
    /// Creates a new empty heap file, truncating anything already at `path`.
    pub fn create(path: &Path, table_id: TableId, page_size: usize) -> StorageResult<Self> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::attach(path, table_id, page_size))
    }

    /// Opens an existing heap file.
    pub fn open(path: &Path, table_id: TableId, page_size: usize) -> StorageResult<Self> {
        // Open and drop immediately; handles are per-call.
        OpenOptions::new().read(true).open(path)?;
        Ok(Self::attach(path, table_id, page_size))
    }

    fn attach(path: &Path, table_id: TableId, page_size: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            table_id,
            page_size,
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one all-zero page, growing the file by exactly `page_size`
    /// bytes, and returns the new page's id.
    pub fn allocate_page(&self) -> StorageResult<PageId> {
        let _guard = self.append_lock.lock();
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&vec![0u8; self.page_size])?;
        file.sync_all()?;
        let page_no = (file.metadata()?.len() / self.page_size as u64) as u32 - 1;
        Ok(PageId::new(self.table_id, page_no))
    }
}

impl DbFile for HeapFile {
    fn table_id(&self) -> TableId {
        self.table_id
    }

    fn read_page(&self, page_id: PageId) -> StorageResult<HeapPage> {
        let mut file = OpenOptions::new().read(true).open(&self.path)?;
        let needed = (page_id.page_no as u64 + 1) * self.page_size as u64;
        if file.metadata()?.len() < needed {
            return Err(StorageError::InvalidPage {
                page_id,
                reason: "beyond end of file".into(),
            });
        }

        file.seek(SeekFrom::Start(page_id.page_no as u64 * self.page_size as u64))?;
        let mut buf = vec![0u8; self.page_size];
        file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                StorageError::InvalidPage {
                    page_id,
                    reason: "short read".into(),
                }
            } else {
                StorageError::Io(e)
            }
        })?;
        Ok(HeapPage::new(page_id, buf))
    }

    fn write_page(&self, page: &HeapPage) -> StorageResult<()> {
        let page_id = page.id();
        if page_id.page_no > self.num_pages()? {
            return Err(StorageError::InvalidPage {
                page_id,
                reason: "write past current extent".into(),
            });
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.seek(SeekFrom::Start(page_id.page_no as u64 * self.page_size as u64))?;
        file.write_all(page.data())?;
        file.sync_all()?;
        Ok(())
    }

    fn num_pages(&self) -> StorageResult<u32> {
        let len = std::fs::metadata(&self.path)?.len();
        Ok((len / self.page_size as u64) as u32)
    }

    fn insert_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        data: &[u8],
    ) -> Result<Vec<SharedPage>> {
        // First fit: scan existing pages in order for one with room.
        for page_no in 0..self.num_pages()? {
            let page_id = PageId::new(self.table_id, page_no);
            let shared = pool.get_page(txn, page_id, Permission::ReadWrite)?;
            {
                let mut page = shared.lock();
                let mut view = SlottedPage::new(page.data_mut());
                if view.has_room_for(data.len()) {
                    view.insert_tuple(data)?;
                    page.mark_dirty(txn);
                    drop(page);
                    return Ok(vec![shared]);
                }
            }
            // The page was only inspected and found full; keeping its write
            // lock until completion would serialize all inserters on the
            // whole file.
            pool.release_page(txn, page_id);
        }

        // No room anywhere: grow the file by one page and use it.
        let page_id = self.allocate_page()?;
        let shared = pool.get_page(txn, page_id, Permission::ReadWrite)?;
        {
            let mut page = shared.lock();
            SlottedPage::new(page.data_mut()).insert_tuple(data)?;
            page.mark_dirty(txn);
        }
        Ok(vec![shared])
    }

    fn delete_tuple(
        &self,
        pool: &BufferPool,
        txn: TransactionId,
        tuple: &Tuple,
    ) -> Result<Vec<SharedPage>> {
        let page_id = tuple.tuple_id.page_id;
        if page_id.table_id != self.table_id {
            return Err(StorageError::InvalidPage {
                page_id,
                reason: format!("tuple belongs to {}", page_id.table_id),
            }
            .into());
        }

        let shared = pool.get_page(txn, page_id, Permission::ReadWrite)?;
        {
            let mut page = shared.lock();
            SlottedPage::new(page.data_mut()).delete_tuple(tuple.tuple_id.slot_id)?;
            page.mark_dirty(txn);
        }
        Ok(vec![shared])
    }

    fn iterator<'a>(
        &'a self,
        pool: &'a BufferPool,
        txn: TransactionId,
    ) -> Box<dyn TupleIterator + 'a> {
        Box::new(HeapFileIterator::new(self, pool, txn))
    }
}

/// Forward-only, restartable tuple stream contract consumed by query
/// operators.
pub trait TupleIterator {
    fn open(&mut self) -> Result<()>;
    fn has_next(&mut self) -> Result<bool>;
    /// The next live tuple, or `None` once the stream is exhausted or not
    /// open.
    fn next_tuple(&mut self) -> Result<Option<Tuple>>;
    /// Restarts the stream from page zero.
    fn rewind(&mut self) -> Result<()>;
    fn close(&mut self);
}

/// Streams every live tuple of a heap file, one page at a time, fetching each
/// page through the buffer pool under read permission. Pages holding no live
/// tuples are skipped.
pub struct HeapFileIterator<'a> {
    file: &'a HeapFile,
    pool: &'a BufferPool,
    txn: TransactionId,
    opened: bool,
    next_page_no: u32,
    buffered: std::collections::VecDeque<Tuple>,
}

impl<'a> HeapFileIterator<'a> {
    pub fn new(file: &'a HeapFile, pool: &'a BufferPool, txn: TransactionId) -> Self {
        Self {
            file,
            pool,
            txn,
            opened: false,
            next_page_no: 0,
            buffered: std::collections::VecDeque::new(),
        }
    }

    /// Advances page by page until a live tuple is buffered or the file is
    /// exhausted.
    fn fill(&mut self) -> Result<()> {
        while self.buffered.is_empty() {
            if self.next_page_no >= self.file.num_pages()? {
                return Ok(());
            }
            let page_id = PageId::new(self.file.table_id, self.next_page_no);
            self.next_page_no += 1;

            let shared = self.pool.get_page(self.txn, page_id, Permission::ReadOnly)?;
            let mut page = shared.lock();
            let view = SlottedPage::new(page.data_mut());
            for (slot_id, bytes) in view.live_tuples() {
                self.buffered
                    .push_back(Tuple::new(TupleId::new(page_id, slot_id), bytes));
            }
        }
        Ok(())
    }
}

impl TupleIterator for HeapFileIterator<'_> {
    fn open(&mut self) -> Result<()> {
        self.opened = true;
        self.next_page_no = 0;
        self.buffered.clear();
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        if !self.opened {
            return Ok(false);
        }
        self.fill()?;
        Ok(!self.buffered.is_empty())
    }

    fn next_tuple(&mut self) -> Result<Option<Tuple>> {
        if !self.has_next()? {
            return Ok(None);
        }
        Ok(self.buffered.pop_front())
    }

    fn rewind(&mut self) -> Result<()> {
        self.close();
        self.open()
    }

    fn close(&mut self) {
        self.opened = false;
        self.buffered.clear();
    }
}

impl Iterator for HeapFileIterator<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_tuple().transpose()
    }
}
