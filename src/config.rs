//! Process-wide storage settings.
//!
//! Page size and pool capacity are fixed at construction time and threaded
//! through explicitly rather than read from mutable globals. The only
//! exception is [`StorageConfig::for_tests`], which exists so tests can shrink
//! pages and pools to force boundary conditions.

use std::time::Duration;

use crate::storage::error::StorageError;

/// Bytes per page, including the slotted header.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Default number of pages the buffer pool caches.
pub const DEFAULT_POOL_CAPACITY: usize = 50;

/// Default bound on lock waiting before a transaction is told to abort.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for the storage core, passed to `BufferPool::new`.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Size of every page, on disk and in memory.
    pub page_size: usize,
    /// Maximum number of pages held in the buffer pool.
    pub pool_capacity: usize,
    /// How long `get_page` retries lock acquisition before aborting the
    /// requesting transaction.
    pub lock_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pool_capacity: DEFAULT_POOL_CAPACITY,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl StorageConfig {
    /// Validates the configuration. The pool must hold at least one page and
    /// a page must fit the slotted header while staying addressable by the
    /// page's 16-bit slot offsets.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.pool_capacity == 0 {
            return Err(StorageError::InvalidConfig(
                "pool capacity must be positive".into(),
            ));
        }
        if self.page_size < crate::storage::page::slotted::HEADER_SIZE {
            return Err(StorageError::InvalidConfig(format!(
                "page size {} is smaller than the page header",
                self.page_size
            )));
        }
        // Slot offsets and the free pointer are u16; a larger page would
        // overflow them once tuple bytes pass offset 65535.
        if self.page_size > u16::MAX as usize {
            return Err(StorageError::InvalidConfig(format!(
                "page size {} exceeds the 16-bit slot addressing limit of {}",
                self.page_size,
                u16::MAX
            )));
        }
        Ok(())
    }

    /// THIS CONSTRUCTOR SHOULD ONLY BE USED FOR TESTING. Production code uses
    /// `Default` and overrides individual fields explicitly.
    pub fn for_tests(page_size: usize, pool_capacity: usize) -> Self {
        Self {
            page_size,
            pool_capacity,
            lock_timeout: Duration::from_millis(200),
        }
    }
}
