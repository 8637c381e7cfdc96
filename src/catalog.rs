//! Table registry: maps table ids and names to their heap files.

use crate::access::heap::HeapFile;
use crate::access::schema::Schema;
use crate::storage::error::{StorageError, StorageResult};
use dashmap::DashMap;
use std::sync::Arc;

/// Identifies a table. Part of every [`PageId`], so two tables' pages never
/// collide in the buffer pool or the lock manager.
///
/// [`PageId`]: crate::storage::page::PageId
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(pub u32);

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
pub struct Catalog {
    tables: DashMap<TableId, Arc<HeapFile>>,
    names: DashMap<String, TableId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a heap file under `name`. A repeated name or table id
    /// replaces the earlier registration.
    pub fn add_table(&self, file: Arc<HeapFile>, name: &str) {
        self.names.insert(name.to_string(), file.table_id());
        self.tables.insert(file.table_id(), file);
    }

    pub fn table(&self, table_id: TableId) -> StorageResult<Arc<HeapFile>> {
        self.tables
            .get(&table_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(StorageError::NoSuchTable(table_id))
    }

    pub fn table_id(&self, name: &str) -> StorageResult<TableId> {
        self.names
            .get(name)
            .map(|e| *e.value())
            .ok_or_else(|| StorageError::NoSuchTableName(name.to_string()))
    }

    pub fn schema(&self, table_id: TableId) -> StorageResult<Schema> {
        Ok(self.table(table_id)?.schema().clone())
    }
}
