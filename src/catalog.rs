//! Table registry.
//!
//! Maps a table identifier to the file that stores it. Schemas and tuple
//! encodings live above this layer; the storage core only needs to resolve a
//! `PageId`'s table back to a file.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::heap::DbFile;

/// Identifier for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableId(pub u32);

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "table {}", self.0)
    }
}

/// Registry of the files backing each table.
pub struct Catalog {
    files: RwLock<HashMap<TableId, Arc<dyn DbFile>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a file under its own table id, replacing any previous
    /// registration for that table.
    pub fn register(&self, file: Arc<dyn DbFile>) {
        self.files.write().insert(file.table_id(), file);
    }

    /// Resolves a table id to its backing file.
    pub fn database_file(&self, table_id: TableId) -> StorageResult<Arc<dyn DbFile>> {
        self.files
            .read()
            .get(&table_id)
            .cloned()
            .ok_or(StorageError::UnknownTable(table_id))
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        let mut ids: Vec<TableId> = self.files.read().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
