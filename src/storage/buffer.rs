//! Bounded page cache and transaction completion paths.
//!
//! Every page read and write goes through [`BufferPool::get_page`], which
//! first blocks on the lock manager for the right permission and only then
//! materializes the page, so lock acquisition always happens-before the page
//! becomes visible to the requesting transaction. Eviction follows a no-steal
//! discipline: a dirty page belonging to an uncommitted transaction is never
//! written back or dropped; when every cached page is dirty the pool fails
//! loudly instead.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;

use crate::access::tuple::Tuple;
use crate::catalog::{Catalog, TableId};
use crate::concurrency::lock::{LockManager, LockMode};
use crate::config::StorageConfig;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId};
use crate::storage::wal::WalManager;
use crate::transaction::TransactionId;

/// Permission a caller requests on a page; translated to a lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

impl Permission {
    fn lock_mode(self) -> LockMode {
        match self {
            Permission::ReadOnly => LockMode::Shared,
            Permission::ReadWrite => LockMode::Exclusive,
        }
    }
}

/// A cached page. The inner mutex is the aliasing boundary for in-place
/// mutation; transactional isolation comes from the page lock held in the
/// lock manager.
pub type SharedPage = Arc<Mutex<HeapPage>>;

/// Bounded map of cached pages with approximate LRU ordering. Independently
/// testable; knows nothing about locks or files.
struct PageCache {
    capacity: usize,
    pages: HashMap<PageId, SharedPage>,
    // Least recently used at the front.
    recency: VecDeque<PageId>,
}

impl PageCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            pages: HashMap::with_capacity(capacity),
            recency: VecDeque::with_capacity(capacity),
        }
    }

    fn len(&self) -> usize {
        self.pages.len()
    }

    fn touch(&mut self, page_id: PageId) {
        if let Some(pos) = self.recency.iter().position(|p| *p == page_id) {
            self.recency.remove(pos);
        }
        self.recency.push_back(page_id);
    }

    fn get(&mut self, page_id: PageId) -> Option<SharedPage> {
        let page = self.pages.get(&page_id).cloned();
        if page.is_some() {
            self.touch(page_id);
        }
        page
    }

    /// Inserts (or refreshes) a page, evicting a clean page first when at
    /// capacity.
    fn insert(&mut self, page_id: PageId, page: SharedPage) -> StorageResult<()> {
        if !self.pages.contains_key(&page_id) && self.pages.len() >= self.capacity {
            self.evict_clean()?;
        }
        self.pages.insert(page_id, page);
        self.touch(page_id);
        Ok(())
    }

    /// Drops the least-recently-used clean page. Scans past dirty candidates
    /// rather than flushing them; if every page is dirty the pool is
    /// exhausted.
    fn evict_clean(&mut self) -> StorageResult<()> {
        let victim = self
            .recency
            .iter()
            .copied()
            .find(|pid| {
                self.pages
                    .get(pid)
                    .map(|page| !page.lock().is_dirty())
                    .unwrap_or(false)
            })
            .ok_or(StorageError::PoolExhausted {
                capacity: self.capacity,
            })?;
        log::trace!("evicting clean {}", victim);
        self.remove(victim);
        Ok(())
    }

    fn remove(&mut self, page_id: PageId) {
        self.pages.remove(&page_id);
        if let Some(pos) = self.recency.iter().position(|p| *p == page_id) {
            self.recency.remove(pos);
        }
    }

    /// Pages currently dirtied by `txn`, in recency order.
    fn dirtied_by(&self, txn: TransactionId) -> Vec<SharedPage> {
        self.recency
            .iter()
            .filter_map(|pid| self.pages.get(pid))
            .filter(|page| page.lock().dirty_by() == Some(txn))
            .cloned()
            .collect()
    }

    fn all_pages(&self) -> Vec<SharedPage> {
        self.recency
            .iter()
            .filter_map(|pid| self.pages.get(pid))
            .cloned()
            .collect()
    }
}

/// The shared page cache and the single choke point for page access.
pub struct BufferPool {
    config: StorageConfig,
    catalog: Arc<Catalog>,
    wal: Arc<WalManager>,
    lock_manager: LockManager,
    cache: Mutex<PageCache>,
}

impl BufferPool {
    /// Creates a pool caching up to `config.pool_capacity` pages.
    pub fn new(
        catalog: Arc<Catalog>,
        wal: Arc<WalManager>,
        config: StorageConfig,
    ) -> StorageResult<Self> {
        config.validate()?;
        let capacity = config.pool_capacity;
        Ok(Self {
            config,
            catalog,
            wal,
            lock_manager: LockManager::new(),
            cache: Mutex::new(PageCache::new(capacity)),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Retrieves a page with the requested permission, blocking while the
    /// needed lock is held elsewhere.
    ///
    /// The lock is retried under the configured bound; a transaction that
    /// cannot make progress within it gets a transaction-abort error and is
    /// expected to abort through [`BufferPool::abort`]. On grant the page is
    /// served from cache or loaded from the owning file, evicting a clean
    /// page when the cache is full.
    pub fn get_page(
        &self,
        txn: TransactionId,
        page_id: PageId,
        perm: Permission,
    ) -> Result<SharedPage> {
        self.lock_manager
            .acquire(page_id, txn, perm.lock_mode(), self.config.lock_timeout)?;

        let mut cache = self.cache.lock();
        if let Some(page) = cache.get(page_id) {
            return Ok(page);
        }

        let file = self.catalog.database_file(page_id.table_id)?;
        let page: SharedPage = Arc::new(Mutex::new(file.read_page(page_id)?));
        cache.insert(page_id, Arc::clone(&page))?;
        Ok(page)
    }

    /// Adds a tuple to `table_id` on behalf of `txn`. The owning file picks
    /// (or grows) a page under write permission; every page it mutated is
    /// marked dirty and (re)admitted to the cache, replacing any stale copy.
    pub fn insert_tuple(&self, txn: TransactionId, table_id: TableId, data: &[u8]) -> Result<()> {
        let file = self.catalog.database_file(table_id)?;
        let pages = file.insert_tuple(self, txn, data)?;
        self.admit_dirty(txn, pages)
    }

    /// Removes a tuple, located via its embedded page identity.
    pub fn delete_tuple(&self, txn: TransactionId, tuple: &Tuple) -> Result<()> {
        let file = self
            .catalog
            .database_file(tuple.tuple_id.page_id.table_id)?;
        let pages = file.delete_tuple(self, txn, tuple)?;
        self.admit_dirty(txn, pages)
    }

    fn admit_dirty(&self, txn: TransactionId, pages: Vec<SharedPage>) -> Result<()> {
        let mut cache = self.cache.lock();
        for shared in pages {
            let page_id = {
                let mut page = shared.lock();
                page.mark_dirty(txn);
                page.id()
            };
            cache.insert(page_id, shared)?;
        }
        Ok(())
    }

    /// Commits `txn`: flushes its dirty pages (write-ahead logged) and
    /// releases all its locks.
    pub fn commit(&self, txn: TransactionId) -> Result<()> {
        self.transaction_complete(txn, true)
    }

    /// Aborts `txn`: discards its in-memory modifications and releases all
    /// its locks.
    pub fn abort(&self, txn: TransactionId) -> Result<()> {
        self.transaction_complete(txn, false)
    }

    /// Completes a transaction. Locks are released unconditionally, even when
    /// the flush or reload failed part-way.
    pub fn transaction_complete(&self, txn: TransactionId, commit: bool) -> Result<()> {
        let result = if commit {
            self.flush_pages(txn)
        } else {
            self.recover_pages(txn)
        };
        self.lock_manager.release_all(txn);
        result
    }

    /// Persists every page dirtied by `txn`: for each, the before/after image
    /// pair is logged and forced ahead of the page write, then the dirty
    /// marker is cleared and the before-image refreshed.
    fn flush_pages(&self, txn: TransactionId) -> Result<()> {
        let dirtied = self.cache.lock().dirtied_by(txn);
        for shared in dirtied {
            self.flush_one(&shared)?;
        }
        self.wal.log_commit(txn)?;
        self.wal.force()?;
        Ok(())
    }

    fn flush_one(&self, shared: &SharedPage) -> Result<()> {
        let mut page = shared.lock();
        let Some(txn) = page.dirty_by() else {
            return Ok(());
        };
        self.wal.log_write(txn, &page.before_image(), &page)?;
        self.wal.force()?;

        let file = self.catalog.database_file(page.id().table_id)?;
        file.write_page(&page)?;
        page.mark_clean();
        page.set_before_image();
        Ok(())
    }

    /// Reloads every page dirtied by `txn` from disk, discarding the
    /// in-memory copies. No undo is needed: under no-steal the disk copy was
    /// never overwritten by the uncommitted transaction.
    fn recover_pages(&self, txn: TransactionId) -> Result<()> {
        let dirtied = self.cache.lock().dirtied_by(txn);
        for shared in dirtied {
            let mut page = shared.lock();
            let file = self.catalog.database_file(page.id().table_id)?;
            let fresh = file.read_page(page.id())?;
            page.overwrite_from(fresh.data());
        }
        self.wal.log_abort(txn)?;
        self.wal.force()?;
        Ok(())
    }

    /// Writes every dirty page in the cache to disk.
    ///
    /// NB: this flushes pages of transactions that have not committed, which
    /// breaks the no-steal discipline. Only recovery and shutdown paths that
    /// understand the consequences should call it.
    pub fn flush_all_pages(&self) -> Result<()> {
        let pages = self.cache.lock().all_pages();
        for shared in pages {
            self.flush_one(&shared)?;
        }
        Ok(())
    }

    /// Drops a page from the cache without flushing it. Used to forget
    /// rolled-back or deallocated pages.
    pub fn discard_page(&self, page_id: PageId) {
        self.cache.lock().remove(page_id);
    }

    /// Releases `txn`'s lock on one page before the transaction completes.
    ///
    /// This breaks strict two-phase locking and is risky for that reason; the
    /// only in-tree caller is the heap-file insert scan, which releases write
    /// locks on pages it merely inspected and found full.
    pub fn release_page(&self, txn: TransactionId, page_id: PageId) {
        self.lock_manager.release(page_id, txn);
    }

    /// True if `txn` holds a lock of any mode on `page_id`.
    pub fn holds_lock(&self, txn: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.holds(page_id, txn)
    }

    /// Number of pages currently cached.
    pub fn cached_pages(&self) -> usize {
        self.cache.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::heap::{DbFile, HeapFile};
    use crate::storage::wal::WalRecord;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    const PAGE_SIZE: usize = 256;

    fn pool_with_capacity(capacity: usize) -> (BufferPool, Arc<HeapFile>, TempDir) {
        let dir = tempdir().unwrap();
        let file = Arc::new(
            HeapFile::create(&dir.path().join("t1.tbl"), TableId(1), PAGE_SIZE).unwrap(),
        );
        let catalog = Arc::new(Catalog::new());
        catalog.register(Arc::clone(&file) as Arc<dyn DbFile>);
        let wal = Arc::new(WalManager::open(&dir.path().join("wal.log")).unwrap());
        let pool =
            BufferPool::new(catalog, wal, StorageConfig::for_tests(PAGE_SIZE, capacity)).unwrap();
        (pool, file, dir)
    }

    fn txn(n: u64) -> TransactionId {
        TransactionId::new(n)
    }

    fn wal_records(dir: &Path) -> Vec<WalRecord> {
        WalManager::records(&dir.join("wal.log")).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::new());
        let wal = Arc::new(WalManager::open(&dir.path().join("wal.log")).unwrap());
        let result = BufferPool::new(catalog, wal, StorageConfig::for_tests(PAGE_SIZE, 0));
        assert!(result.is_err());
    }

    #[test]
    fn test_get_page_serves_from_cache() {
        let (pool, file, _dir) = pool_with_capacity(4);
        let pid = file.allocate_page().unwrap();

        let first = pool.get_page(txn(1), pid, Permission::ReadOnly).unwrap();
        let second = pool.get_page(txn(1), pid, Permission::ReadOnly).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.cached_pages(), 1);
    }

    #[test]
    fn test_cache_never_exceeds_capacity() {
        let (pool, file, _dir) = pool_with_capacity(2);
        for _ in 0..5 {
            file.allocate_page().unwrap();
        }

        for page_no in 0..5 {
            let pid = PageId::new(TableId(1), page_no);
            let t = txn(page_no as u64 + 1);
            pool.get_page(t, pid, Permission::ReadOnly).unwrap();
            pool.commit(t).unwrap();
            assert!(pool.cached_pages() <= 2);
        }
    }

    #[test]
    fn test_insert_tuple_marks_page_dirty() {
        let (pool, _file, _dir) = pool_with_capacity(4);
        let t = txn(1);
        pool.insert_tuple(t, TableId(1), b"hello").unwrap();

        let pid = PageId::new(TableId(1), 0);
        let page = pool.get_page(t, pid, Permission::ReadOnly).unwrap();
        assert_eq!(page.lock().dirty_by(), Some(t));
    }

    #[test]
    fn test_all_dirty_pool_is_exhausted() {
        let (pool, file, _dir) = pool_with_capacity(1);
        file.allocate_page().unwrap();
        file.allocate_page().unwrap();

        // Dirty the only cache slot with an uncommitted insert
        let t1 = txn(1);
        pool.insert_tuple(t1, TableId(1), b"occupier").unwrap();

        // A second transaction wants a different page; the sole candidate is
        // dirty, so the pool must fail rather than steal it
        let err = pool
            .get_page(txn(2), PageId::new(TableId(1), 1), Permission::ReadOnly)
            .unwrap_err();
        let storage = err.downcast_ref::<StorageError>().unwrap();
        assert!(matches!(storage, StorageError::PoolExhausted { .. }));
    }

    #[test]
    fn test_eviction_succeeds_after_commit() {
        let (pool, file, _dir) = pool_with_capacity(1);
        file.allocate_page().unwrap();

        let t1 = txn(1);
        pool.insert_tuple(t1, TableId(1), b"first").unwrap();
        pool.commit(t1).unwrap();

        // The slot's page is clean now, so another page can take its place
        let pid1 = PageId::new(TableId(1), 1);
        file.allocate_page().unwrap();
        pool.get_page(txn(2), pid1, Permission::ReadWrite).unwrap();
        assert_eq!(pool.cached_pages(), 1);
    }

    #[test]
    fn test_commit_is_durable_and_logged() {
        let (pool, file, dir) = pool_with_capacity(4);
        let t = txn(1);
        pool.insert_tuple(t, TableId(1), b"durable bytes").unwrap();
        pool.commit(t).unwrap();

        // Bypass the cache: read the page straight from disk
        let page = file.read_page(PageId::new(TableId(1), 0)).unwrap();
        let mut data = page.data().to_vec();
        let view = crate::storage::page::slotted::SlottedPage::new(&mut data);
        assert_eq!(view.get_tuple(0).unwrap(), b"durable bytes");

        // Cached copy is clean again
        let cached = pool
            .get_page(txn(2), PageId::new(TableId(1), 0), Permission::ReadOnly)
            .unwrap();
        assert!(!cached.lock().is_dirty());

        // WAL holds the before/after pair ahead of the commit record
        let records = wal_records(dir.path());
        assert!(matches!(records[0], WalRecord::PageWrite { .. }));
        assert!(records.contains(&WalRecord::Commit { txn: t }));
    }

    #[test]
    fn test_abort_restores_disk_content() {
        let (pool, file, _dir) = pool_with_capacity(4);

        // Committed baseline
        let t1 = txn(1);
        pool.insert_tuple(t1, TableId(1), b"keep me").unwrap();
        pool.commit(t1).unwrap();

        // Uncommitted second insert, then abort
        let t2 = txn(2);
        pool.insert_tuple(t2, TableId(1), b"discard me").unwrap();
        pool.abort(t2).unwrap();

        let pid = PageId::new(TableId(1), 0);
        let t3 = txn(3);
        let page = pool.get_page(t3, pid, Permission::ReadOnly).unwrap();
        {
            let mut guard = page.lock();
            let view = crate::storage::page::slotted::SlottedPage::new(guard.data_mut());
            assert_eq!(view.tuple_count(), 1);
            assert_eq!(view.get_tuple(0).unwrap(), b"keep me");
        }

        // The aborted transaction holds nothing
        assert!(!pool.holds_lock(t2, pid));
        assert_eq!(file.num_pages().unwrap(), 1);
    }

    #[test]
    fn test_abort_record_is_durable_immediately() {
        let (pool, _file, dir) = pool_with_capacity(4);
        let t = txn(1);
        pool.insert_tuple(t, TableId(1), b"never lands").unwrap();
        pool.abort(t).unwrap();

        // The abort record must be on disk without waiting for a later force
        let records = wal_records(dir.path());
        assert!(records.contains(&WalRecord::Abort { txn: t }));
    }

    #[test]
    fn test_lock_timeout_surfaces_as_abort_condition() {
        let (pool, file, _dir) = pool_with_capacity(4);
        let pid = file.allocate_page().unwrap();

        pool.get_page(txn(1), pid, Permission::ReadWrite).unwrap();

        let err = pool
            .get_page(txn(2), pid, Permission::ReadWrite)
            .unwrap_err();
        let storage = err.downcast_ref::<StorageError>().unwrap();
        assert!(storage.is_transaction_abort());
    }

    #[test]
    fn test_discard_page_forgets_cached_copy() {
        let (pool, file, _dir) = pool_with_capacity(4);
        let pid = file.allocate_page().unwrap();

        pool.get_page(txn(1), pid, Permission::ReadOnly).unwrap();
        assert_eq!(pool.cached_pages(), 1);

        pool.discard_page(pid);
        assert_eq!(pool.cached_pages(), 0);
    }

    #[test]
    fn test_transaction_complete_releases_locks_twice_safely() {
        let (pool, file, _dir) = pool_with_capacity(4);
        let pid = file.allocate_page().unwrap();
        let t = txn(1);

        pool.get_page(t, pid, Permission::ReadWrite).unwrap();
        pool.commit(t).unwrap();
        assert!(!pool.holds_lock(t, pid));

        // A second completion finds no dirty pages and no locks; it must not
        // error
        pool.commit(t).unwrap();
    }
}
