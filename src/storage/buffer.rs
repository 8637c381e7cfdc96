//! Fixed-capacity page cache with NO-STEAL eviction.
//!
//! Every page access goes through [`BufferPool::get_page`], which takes the
//! page lock matching the requested permission before touching the cache.
//! Frames dirtied by an in-flight transaction are pinned in memory: eviction
//! only ever picks clean frames, so an uncommitted page never reaches disk
//! and abort is a pure in-memory discard.

use crate::access::tuple::Tuple;
use crate::catalog::{Catalog, TableId};
use crate::concurrency::manager::LockManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{HeapPage, PageId};
use crate::transaction::TransactionId;
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Default number of frames in the pool.
pub const DEFAULT_POOL_SIZE: usize = 50;

/// The access mode requested for a page: `ReadOnly` takes a shared lock,
/// `ReadWrite` an exclusive one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permissions {
    ReadOnly,
    ReadWrite,
}

/// A cached page plus its dirty marker.
///
/// The marker holds the id of the transaction that last modified the page,
/// or 0 (no valid transaction id) when the frame matches disk. Writers store
/// it while still holding the page write guard, so a clean reading under the
/// read guard is trustworthy.
pub struct Frame {
    page: RwLock<HeapPage>,
    dirty_owner: AtomicU64,
}

impl Frame {
    fn new(page: HeapPage) -> Self {
        Self {
            page: RwLock::new(page),
            dirty_owner: AtomicU64::new(0),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, HeapPage> {
        self.page.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, HeapPage> {
        self.page.write()
    }

    pub fn dirty_owner(&self) -> Option<TransactionId> {
        match self.dirty_owner.load(Ordering::Acquire) {
            0 => None,
            id => Some(TransactionId::new(id)),
        }
    }

    pub fn mark_dirty(&self, tid: TransactionId) {
        self.dirty_owner.store(tid.value(), Ordering::Release);
    }

    fn clear_dirty(&self) {
        self.dirty_owner.store(0, Ordering::Release);
    }
}

/// The page cache. Owns the lock manager so every cached access is guarded
/// by strict two-phase page locking.
pub struct BufferPool {
    capacity: usize,
    cache: DashMap<PageId, Arc<Frame>>,
    lock_manager: LockManager,
    catalog: Arc<Catalog>,
}

impl BufferPool {
    pub fn new(catalog: Arc<Catalog>, capacity: usize) -> Self {
        Self {
            capacity,
            cache: DashMap::new(),
            lock_manager: LockManager::new(),
            catalog,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently cached.
    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    /// Locks and returns the frame for `page_id`, loading it from disk on a
    /// cache miss (evicting a clean frame first when the pool is at
    /// capacity). Blocks until the page lock is granted; errors with
    /// `TransactionAborted` when blocking would deadlock.
    pub fn get_page(
        &self,
        tid: TransactionId,
        page_id: PageId,
        perm: Permissions,
    ) -> StorageResult<Arc<Frame>> {
        let already_locked = self.lock_manager.holds_lock(tid, page_id);
        match perm {
            Permissions::ReadOnly => self.lock_manager.acquire_shared(tid, page_id)?,
            Permissions::ReadWrite => self.lock_manager.acquire_exclusive(tid, page_id)?,
        }

        if let Some(frame) = self.cache.get(&page_id).map(|e| Arc::clone(e.value())) {
            return Ok(frame);
        }
        match self.load_page(page_id) {
            Ok(frame) => Ok(frame),
            Err(err) => {
                // A failed fetch must not leave a fresh lock behind, but a
                // stake held from an earlier call survives.
                if !already_locked {
                    match perm {
                        Permissions::ReadOnly => {
                            self.lock_manager.release_shared(tid, page_id)
                        }
                        Permissions::ReadWrite => {
                            self.lock_manager.release_exclusive(tid, page_id)
                        }
                    }
                }
                Err(err)
            }
        }
    }

    fn load_page(&self, page_id: PageId) -> StorageResult<Arc<Frame>> {
        if self.cache.len() >= self.capacity {
            self.evict_page()?;
        }
        let file = self.catalog.table(page_id.table_id)?;
        let page = file.read_page(page_id)?;
        let frame = Arc::clone(
            self.cache
                .entry(page_id)
                .or_insert_with(|| Arc::new(Frame::new(page)))
                .value(),
        );
        // Concurrent misses can slip past the pre-check together; trim until
        // the bound holds again at insertion time.
        while self.cache.len() > self.capacity {
            if let Err(err) = self.evict_page() {
                // The overflow this load caused cannot be resolved; back the
                // insert out rather than leave the pool over its bound.
                self.cache
                    .remove_if(&page_id, |_, frame| frame.dirty_owner().is_none());
                return Err(err);
            }
        }
        Ok(frame)
    }

    /// Drops the first clean frame found, in map iteration order. A frame is
    /// skipped while its page is write-locked or exclusively page-locked:
    /// either way a mutation may be in flight whose dirty marker has not
    /// been published yet, and evicting it would orphan that mutation.
    fn evict_page(&self) -> StorageResult<()> {
        loop {
            let mut indeterminate = false;
            let mut victim = None;
            for entry in self.cache.iter() {
                match self.evictable(*entry.key(), entry.value()) {
                    Some(true) => {
                        victim = Some(*entry.key());
                        break;
                    }
                    Some(false) => {}
                    None => indeterminate = true,
                }
            }
            let Some(page_id) = victim else {
                if indeterminate {
                    // Some page lock was mid-operation; its state settles in
                    // a moment, so rescan rather than report a full pool.
                    std::thread::yield_now();
                    continue;
                }
                return Err(StorageError::BufferPoolFull);
            };
            // Re-checked under the shard lock; the frame may have been
            // dirtied or locked since the scan.
            let removed = self
                .cache
                .remove_if(&page_id, |_, frame| {
                    self.evictable(page_id, frame) == Some(true)
                });
            if removed.is_some() {
                log::trace!("evicted page {}", page_id);
                return Ok(());
            }
        }
    }

    /// `None` when the page's lock was busy and could not be inspected.
    fn evictable(&self, page_id: PageId, frame: &Frame) -> Option<bool> {
        if frame.page.try_read().is_none() || frame.dirty_owner().is_some() {
            return Some(false);
        }
        self.lock_manager
            .has_exclusive_holder(page_id)
            .map(|held| !held)
    }

    /// Inserts a tuple into `table_id`, dirtying the page it lands on. The
    /// tuple's location is set on success.
    pub fn insert_tuple(
        &self,
        tid: TransactionId,
        table_id: TableId,
        tuple: &mut Tuple,
    ) -> StorageResult<()> {
        let file = self.catalog.table(table_id)?;
        if !tuple.matches_schema(file.schema()) {
            return Err(StorageError::SchemaMismatch);
        }
        for (page_id, frame) in file.insert_tuple(tid, tuple, self)? {
            // Reinstate the dirtied frame, overwriting any stale copy a
            // concurrent eviction-and-reload may have left behind.
            self.cache.insert(page_id, frame);
        }
        Ok(())
    }

    /// Deletes a tuple at its stored location, dirtying that page.
    pub fn delete_tuple(&self, tid: TransactionId, tuple: &Tuple) -> StorageResult<()> {
        let location = tuple.location().ok_or(StorageError::TupleNotStored)?;
        let file = self.catalog.table(location.page_id.table_id)?;
        for (page_id, frame) in file.delete_tuple(tid, tuple, self)? {
            self.cache.insert(page_id, frame);
        }
        Ok(())
    }

    /// Ends a transaction. Commit flushes every frame it dirtied (and marks
    /// them clean, so they become evictable); abort discards those frames so
    /// the next access reloads the pre-transaction bytes. Locks are released
    /// last, once the outcome is durable.
    pub fn transaction_complete(&self, tid: TransactionId, commit: bool) -> StorageResult<()> {
        if commit {
            let dirtied: Vec<PageId> = self
                .cache
                .iter()
                .filter(|entry| entry.value().dirty_owner() == Some(tid))
                .map(|entry| *entry.key())
                .collect();
            for page_id in dirtied {
                self.flush_page(tid, page_id)?;
            }
        } else {
            self.cache
                .retain(|_, frame| frame.dirty_owner() != Some(tid));
        }
        self.lock_manager.release_all_locks(tid);
        log::debug!("{} {}", tid, if commit { "committed" } else { "aborted" });
        Ok(())
    }

    /// Writes a page `tid` dirtied back to its file and marks the frame
    /// clean. Pages dirtied by another transaction are left in memory (the
    /// pool never steals an uncommitted page); clean or uncached pages need
    /// no flush.
    pub fn flush_page(&self, tid: TransactionId, page_id: PageId) -> StorageResult<()> {
        if let Some(frame) = self.cache.get(&page_id).map(|e| Arc::clone(e.value())) {
            if frame.dirty_owner() != Some(tid) {
                return Ok(());
            }
            let file = self.catalog.table(page_id.table_id)?;
            let page = frame.read();
            file.write_page(&page)?;
            frame.clear_dirty();
        }
        Ok(())
    }

    /// Drops whatever lock `tid` holds on `page_id` before the transaction
    /// ends. Breaks strict 2PL; only for callers that know the page was not
    /// and will not be touched, such as a page checked for free slots and
    /// found full.
    pub fn unsafe_release_page(&self, tid: TransactionId, page_id: PageId) {
        self.lock_manager.release_lock(tid, page_id);
    }

    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.lock_manager.holds_lock(tid, page_id)
    }

    /// Removes a page from the cache without flushing it.
    pub fn discard_page(&self, page_id: PageId) {
        self.cache.remove(&page_id);
    }
}
