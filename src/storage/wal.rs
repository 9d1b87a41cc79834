//! Write-ahead logging of page images.
//!
//! Every page flush is preceded by a log record pairing the page's
//! before-image with its current content, followed by a `force`, so the pair
//! is durable before the page write lands on disk. Record framing is a u32
//! length prefix followed by the bincode-encoded record.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::storage::error::StorageResult;
use crate::storage::page::{HeapPage, PageId};
use crate::transaction::TransactionId;

/// A single log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalRecord {
    /// Before/after images of one page, written ahead of the page flush.
    PageWrite {
        txn: TransactionId,
        page_id: PageId,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    Commit {
        txn: TransactionId,
    },
    Abort {
        txn: TransactionId,
    },
}

struct WalInner {
    writer: BufWriter<File>,
}

/// Append-only write-ahead log.
pub struct WalManager {
    inner: Mutex<WalInner>,
}

impl WalManager {
    /// Opens (or creates) the log file at `path`, appending to existing
    /// records.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            inner: Mutex::new(WalInner {
                writer: BufWriter::new(file),
            }),
        })
    }

    /// Appends a before/after record for one dirty page. Not yet durable;
    /// callers follow with [`WalManager::force`] before writing the page.
    pub fn log_write(
        &self,
        txn: TransactionId,
        before: &[u8],
        page: &HeapPage,
    ) -> StorageResult<()> {
        self.append(&WalRecord::PageWrite {
            txn,
            page_id: page.id(),
            before: before.to_vec(),
            after: page.data().to_vec(),
        })
    }

    pub fn log_commit(&self, txn: TransactionId) -> StorageResult<()> {
        self.append(&WalRecord::Commit { txn })
    }

    pub fn log_abort(&self, txn: TransactionId) -> StorageResult<()> {
        self.append(&WalRecord::Abort { txn })
    }

    fn append(&self, record: &WalRecord) -> StorageResult<()> {
        let payload = bincode::serialize(record)?;
        let mut inner = self.inner.lock();
        inner.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        inner.writer.write_all(&payload)?;
        Ok(())
    }

    /// Flushes buffered records and fsyncs the log file.
    pub fn force(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Reads every record currently in the log. Used by recovery and tests.
    pub fn records(path: &Path) -> StorageResult<Vec<WalRecord>> {
        let bytes = std::fs::read(path)?;
        let mut records = Vec::new();
        let mut cursor = 0;
        while cursor + 4 <= bytes.len() {
            let len = u32::from_le_bytes(bytes[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            if cursor + len > bytes.len() {
                // Torn tail from an interrupted append; everything before it
                // is intact.
                break;
            }
            records.push(bincode::deserialize(&bytes[cursor..cursor + len])?);
            cursor += len;
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableId;
    use tempfile::tempdir;

    #[test]
    fn test_log_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");
        let wal = WalManager::open(&path).unwrap();

        let txn = TransactionId::new(1);
        let page_id = PageId::new(TableId(1), 0);
        let mut page = HeapPage::new(page_id, vec![0u8; 64]);
        let before = page.before_image();
        page.data_mut()[0] = 42;

        wal.log_write(txn, &before, &page).unwrap();
        wal.log_commit(txn).unwrap();
        wal.force().unwrap();

        let records = WalManager::records(&path).unwrap();
        assert_eq!(records.len(), 2);
        match &records[0] {
            WalRecord::PageWrite {
                txn: t,
                page_id: p,
                before,
                after,
            } => {
                assert_eq!(*t, txn);
                assert_eq!(*p, page_id);
                assert_eq!(before[0], 0);
                assert_eq!(after[0], 42);
            }
            other => panic!("unexpected record {:?}", other),
        }
        assert_eq!(records[1], WalRecord::Commit { txn });
    }

    #[test]
    fn test_append_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wal.log");

        {
            let wal = WalManager::open(&path).unwrap();
            wal.log_commit(TransactionId::new(1)).unwrap();
            wal.force().unwrap();
        }
        {
            let wal = WalManager::open(&path).unwrap();
            wal.log_abort(TransactionId::new(2)).unwrap();
            wal.force().unwrap();
        }

        let records = WalManager::records(&path).unwrap();
        assert_eq!(
            records,
            vec![
                WalRecord::Commit {
                    txn: TransactionId::new(1)
                },
                WalRecord::Abort {
                    txn: TransactionId::new(2)
                },
            ]
        );
    }
}
