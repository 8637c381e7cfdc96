//! Heap files: one on-disk file of slotted pages per table.

use crate::access::schema::Schema;
use crate::access::tuple::Tuple;
use crate::catalog::TableId;
use crate::storage::buffer::{BufferPool, Frame, Permissions};
use crate::storage::disk::DiskManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId, PAGE_SIZE};
use crate::transaction::TransactionId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

/// A table's backing file plus its schema. Page reads and writes go through
/// a mutex on the disk manager; tuple-level operations go through the buffer
/// pool so they pick up page locks and cached frames.
pub struct HeapFile {
    table_id: TableId,
    schema: Schema,
    disk: Mutex<DiskManager>,
}

impl HeapFile {
    pub fn create(path: &Path, table_id: TableId, schema: Schema) -> StorageResult<Self> {
        Ok(Self {
            table_id,
            schema,
            disk: Mutex::new(DiskManager::create(path)?),
        })
    }

    pub fn open(path: &Path, table_id: TableId, schema: Schema) -> StorageResult<Self> {
        Ok(Self {
            table_id,
            schema,
            disk: Mutex::new(DiskManager::open(path)?),
        })
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn num_pages(&self) -> StorageResult<u32> {
        self.disk.lock().num_pages()
    }

    /// Reads and decodes a page straight from disk, bypassing the cache.
    pub fn read_page(&self, page_id: PageId) -> StorageResult<HeapPage> {
        if page_id.table_id != self.table_id {
            return Err(StorageError::PageNotFound(page_id));
        }
        let mut disk = self.disk.lock();
        if page_id.page_no >= disk.num_pages()? {
            return Err(StorageError::PageNotFound(page_id));
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        disk.read_page(page_id.page_no, &mut buf)?;
        HeapPage::from_bytes(page_id, self.schema.clone(), &buf)
    }

    /// Writes an encoded page back to its slot in the file.
    pub fn write_page(&self, page: &HeapPage) -> StorageResult<()> {
        let bytes = page.to_bytes()?;
        self.disk.lock().write_page(page.id().page_no, &bytes)
    }

    /// Extends the file with one zeroed page and returns its id. The disk
    /// mutex spans the length read and the write, so concurrent appends get
    /// distinct page numbers.
    pub fn append_empty_page(&self) -> StorageResult<PageId> {
        let mut disk = self.disk.lock();
        let page_no = disk.num_pages()?;
        disk.write_page(page_no, &[0u8; PAGE_SIZE])?;
        Ok(PageId::new(self.table_id, page_no))
    }

    /// Inserts the tuple into the first page with a free slot, appending a
    /// new page when every existing one is full. Returns the dirtied pages
    /// with their frames so the pool can reinstate them in the cache.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        tuple: &mut Tuple,
        pool: &BufferPool,
    ) -> StorageResult<Vec<(PageId, Arc<Frame>)>> {
        for page_no in 0..self.num_pages()? {
            let page_id = PageId::new(self.table_id, page_no);
            let frame = pool.get_page(tid, page_id, Permissions::ReadWrite)?;
            let mut page = frame.write();
            if page.num_empty_slots() > 0 {
                page.insert_tuple(tuple)?;
                // Marked while the write guard is held, so the evictor can
                // never see the mutation before the dirty flag.
                frame.mark_dirty(tid);
                drop(page);
                return Ok(vec![(page_id, frame)]);
            }
        }
        let page_id = self.append_empty_page()?;
        let frame = pool.get_page(tid, page_id, Permissions::ReadWrite)?;
        let mut page = frame.write();
        page.insert_tuple(tuple)?;
        frame.mark_dirty(tid);
        drop(page);
        Ok(vec![(page_id, frame)])
    }

    /// Deletes the tuple at its stored location. Returns the dirtied page
    /// with its frame so the pool can reinstate it in the cache.
    pub fn delete_tuple(
        &self,
        tid: TransactionId,
        tuple: &Tuple,
        pool: &BufferPool,
    ) -> StorageResult<Vec<(PageId, Arc<Frame>)>> {
        let location = tuple.location().ok_or(StorageError::TupleNotStored)?;
        let frame = pool.get_page(tid, location.page_id, Permissions::ReadWrite)?;
        let mut page = frame.write();
        page.delete_tuple(location.slot)?;
        frame.mark_dirty(tid);
        drop(page);
        Ok(vec![(location.page_id, frame)])
    }

    /// Iterator over every live tuple in the table, under shared page locks.
    pub fn scan(self: &Arc<Self>, tid: TransactionId, pool: Arc<BufferPool>) -> TableScan {
        TableScan::new(Arc::clone(self), pool, tid)
    }
}

/// Iterates a table's tuples page by page, taking a shared lock on each page
/// as it is reached. Errors (deadlock abort included) end the scan after
/// being yielded once.
pub struct TableScan {
    file: Arc<HeapFile>,
    pool: Arc<BufferPool>,
    tid: TransactionId,
    next_page: u32,
    buffered: VecDeque<Tuple>,
    done: bool,
}

impl TableScan {
    pub fn new(
        file: Arc<HeapFile>,
        pool: Arc<BufferPool>,
        tid: TransactionId,
    ) -> Self {
        Self {
            file,
            pool,
            tid,
            next_page: 0,
            buffered: VecDeque::new(),
            done: false,
        }
    }
}

impl Iterator for TableScan {
    type Item = StorageResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(tuple) = self.buffered.pop_front() {
                return Some(Ok(tuple));
            }
            if self.done {
                return None;
            }
            let num_pages = match self.file.num_pages() {
                Ok(n) => n,
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            };
            if self.next_page >= num_pages {
                self.done = true;
                return None;
            }
            let page_id = PageId::new(self.file.table_id(), self.next_page);
            self.next_page += 1;
            match self.pool.get_page(self.tid, page_id, Permissions::ReadOnly) {
                Ok(frame) => {
                    let page = frame.read();
                    self.buffered.extend(page.tuples().cloned());
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
