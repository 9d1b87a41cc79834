//! Storage core: page cache, page-level locking glue, and heap files.
//!
//! This layer coordinates concurrent transactions over a page-based disk
//! format. Key components:
//!
//! - **HeapPage**: a fixed-size block of bytes, the unit of caching and I/O,
//!   tagged with the transaction that last dirtied it
//! - **HeapFile**: a page-oriented file backing one table
//! - **BufferPool**: the bounded cache every page read and write passes
//!   through; acquires page locks on behalf of callers and drives
//!   commit/abort flushing
//! - **WalManager**: before/after page-image logging, forced ahead of every
//!   page write
//!
//! Strict two-phase locking holds all of a transaction's locks until its
//! completion, and the pool never writes a dirty page on behalf of a
//! transaction that has not committed (no-steal).

pub mod buffer;
pub mod error;
pub mod heap;
pub mod page;
pub mod wal;

pub use buffer::{BufferPool, Permission, SharedPage};
pub use error::{StorageError, StorageResult};
pub use heap::{DbFile, HeapFile, TupleIterator};
pub use page::{HeapPage, PageId};
pub use wal::WalManager;
