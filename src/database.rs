use crate::access::heap::{HeapFile, TableScan};
use crate::access::schema::Schema;
use crate::access::tuple::Tuple;
use crate::catalog::{Catalog, TableId};
use crate::storage::buffer::{BufferPool, DEFAULT_POOL_SIZE};
use crate::transaction::{TransactionId, TransactionIdGenerator};
use anyhow::{bail, Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// High-level database interface that integrates all layers
pub struct Database {
    catalog: Arc<Catalog>,
    buffer_pool: Arc<BufferPool>,
    tx_generator: TransactionIdGenerator,
    next_table_id: AtomicU32,
}

impl Database {
    /// Create a database with the given buffer pool capacity (in pages)
    pub fn new(pool_capacity: usize) -> Self {
        let catalog = Arc::new(Catalog::new());
        let buffer_pool = Arc::new(BufferPool::new(Arc::clone(&catalog), pool_capacity));
        Self {
            catalog,
            buffer_pool,
            tx_generator: TransactionIdGenerator::new(),
            next_table_id: AtomicU32::new(1),
        }
    }

    /// Create a new table backed by a fresh file at `path`
    pub fn create_table(&self, path: &Path, name: &str, schema: Schema) -> Result<TableId> {
        if path.exists() {
            bail!("table file already exists at {:?}", path);
        }
        let table_id = TableId(self.next_table_id.fetch_add(1, Ordering::SeqCst));
        let file = Arc::new(
            HeapFile::create(path, table_id, schema)
                .with_context(|| format!("failed to create table {}", name))?,
        );
        self.catalog.add_table(file, name);
        Ok(table_id)
    }

    /// Register an existing table file
    pub fn open_table(&self, path: &Path, name: &str, schema: Schema) -> Result<TableId> {
        if !path.exists() {
            bail!("table file does not exist at {:?}", path);
        }
        let table_id = TableId(self.next_table_id.fetch_add(1, Ordering::SeqCst));
        let file = Arc::new(
            HeapFile::open(path, table_id, schema)
                .with_context(|| format!("failed to open table {}", name))?,
        );
        self.catalog.add_table(file, name);
        Ok(table_id)
    }

    /// Start a new transaction
    pub fn begin(&self) -> TransactionId {
        self.tx_generator.next()
    }

    /// Commit: flush the transaction's dirty pages, then release its locks
    pub fn commit(&self, tid: TransactionId) -> Result<()> {
        self.buffer_pool
            .transaction_complete(tid, true)
            .with_context(|| format!("failed to commit {}", tid))
    }

    /// Abort: discard the transaction's dirty pages and release its locks
    pub fn abort(&self, tid: TransactionId) -> Result<()> {
        self.buffer_pool
            .transaction_complete(tid, false)
            .with_context(|| format!("failed to abort {}", tid))
    }

    /// Insert a tuple; its location is set on success
    pub fn insert(&self, tid: TransactionId, table_id: TableId, tuple: &mut Tuple) -> Result<()> {
        self.buffer_pool
            .insert_tuple(tid, table_id, tuple)
            .with_context(|| format!("failed to insert into table {}", table_id))?;
        Ok(())
    }

    /// Delete a tuple at its stored location
    pub fn delete(&self, tid: TransactionId, tuple: &Tuple) -> Result<()> {
        self.buffer_pool
            .delete_tuple(tid, tuple)
            .context("failed to delete tuple")?;
        Ok(())
    }

    /// Scan all tuples of a table within the given transaction
    pub fn scan(&self, tid: TransactionId, table_id: TableId) -> Result<TableScan> {
        let file = self.catalog.table(table_id)?;
        Ok(TableScan::new(file, Arc::clone(&self.buffer_pool), tid))
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}
