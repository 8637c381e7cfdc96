//! Page-level strict two-phase locking with deadlock detection.
//!
//! Transactions take shared locks to read pages and exclusive locks to write
//! them, and hold everything until commit or abort. Before a request blocks,
//! the manager records who it would wait for in the wait-for graph; if that
//! edge completes a cycle the requester is aborted instead of parked.

use crate::concurrency::lock::{LockState, PageLock};
use crate::concurrency::wait_for::WaitForGraph;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

pub struct LockManager {
    page_locks: DashMap<PageId, Arc<PageLock>>,
    transaction_pages: DashMap<TransactionId, HashSet<PageId>>,
    wait_for: Mutex<WaitForGraph>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            page_locks: DashMap::new(),
            transaction_pages: DashMap::new(),
            wait_for: Mutex::new(WaitForGraph::new()),
        }
    }

    /// Takes a shared lock on `page_id`, blocking until granted. Errors with
    /// `TransactionAborted` when blocking would complete a deadlock cycle.
    pub fn acquire_shared(
        &self,
        tid: TransactionId,
        page_id: PageId,
    ) -> StorageResult<()> {
        loop {
            let lock = self.page_lock(page_id);
            let mut guard = lock.lock();
            // The entry may have been pruned and recreated between the map
            // lookup and the mutex acquisition. Start over if so.
            if !self.is_current(page_id, &lock) {
                continue;
            }

            if !guard.can_acquire_shared(tid) {
                // Wait behind the queue tail if one exists, else behind the
                // admitted-but-not-yet-running transactions, else behind the
                // exclusive holder keeping us out.
                let targets: Vec<TransactionId> = if let Some(last) = guard.last_waiter() {
                    vec![last]
                } else if !guard.admitted().is_empty() {
                    guard.admitted().iter().copied().collect()
                } else {
                    guard.exclusive_holder().into_iter().collect()
                };
                if !targets.is_empty() {
                    self.add_wait_edge(tid, &targets)?;
                    lock.acquire_shared(&mut guard, tid);
                    let mut wait_for = self.wait_for.lock();
                    for target in &targets {
                        wait_for.decrement_wait(tid, *target);
                    }
                } else {
                    lock.acquire_shared(&mut guard, tid);
                }
            } else {
                lock.acquire_shared(&mut guard, tid);
            }
            drop(guard);

            self.transaction_pages
                .entry(tid)
                .or_default()
                .insert(page_id);
            return Ok(());
        }
    }

    /// Takes an exclusive lock on `page_id`, blocking until granted (a sole
    /// shared holder upgrades in place). Errors with `TransactionAborted`
    /// when blocking would complete a deadlock cycle.
    pub fn acquire_exclusive(
        &self,
        tid: TransactionId,
        page_id: PageId,
    ) -> StorageResult<()> {
        loop {
            let lock = self.page_lock(page_id);
            let mut guard = lock.lock();
            if !self.is_current(page_id, &lock) {
                continue;
            }

            if !guard.can_acquire_exclusive(tid) {
                let targets: Vec<TransactionId> = if let Some(last) = guard.last_waiter() {
                    vec![last]
                } else if !guard.admitted().is_empty() {
                    guard.admitted().iter().copied().collect()
                } else {
                    match guard.state() {
                        LockState::Exclusive => guard.exclusive_holder().into_iter().collect(),
                        // An exclusive request waits for every current
                        // reader; the graph drops the self edge when the
                        // requester is one of them.
                        LockState::Shared => guard.shared_holders().iter().copied().collect(),
                        LockState::Free => Vec::new(),
                    }
                };
                if !targets.is_empty() {
                    self.add_wait_edge(tid, &targets)?;
                    lock.acquire_exclusive(&mut guard, tid);
                    let mut wait_for = self.wait_for.lock();
                    for target in &targets {
                        wait_for.decrement_wait(tid, *target);
                    }
                } else {
                    lock.acquire_exclusive(&mut guard, tid);
                }
            } else {
                lock.acquire_exclusive(&mut guard, tid);
            }
            drop(guard);

            self.transaction_pages
                .entry(tid)
                .or_default()
                .insert(page_id);
            return Ok(());
        }
    }

    /// Drops whatever lock `tid` holds on `page_id`, ignoring strict 2PL.
    pub fn release_lock(&self, tid: TransactionId, page_id: PageId) {
        if let Some(lock) = self.page_locks.get(&page_id).map(|e| Arc::clone(e.value())) {
            let mut guard = lock.lock();
            lock.release_all(&mut guard, tid);
        }
        self.forget_page(tid, page_id);
        self.try_prune(page_id);
    }

    /// Drops only the shared stake, keeping an exclusive one if held.
    pub fn release_shared(&self, tid: TransactionId, page_id: PageId) {
        if let Some(lock) = self.page_locks.get(&page_id).map(|e| Arc::clone(e.value())) {
            let mut guard = lock.lock();
            lock.release_shared(&mut guard, tid);
            if !guard.has_any_lock(tid) {
                drop(guard);
                self.forget_page(tid, page_id);
            }
        }
        self.try_prune(page_id);
    }

    /// Drops only the exclusive stake, downgrading if a shared one remains.
    pub fn release_exclusive(&self, tid: TransactionId, page_id: PageId) {
        if let Some(lock) = self.page_locks.get(&page_id).map(|e| Arc::clone(e.value())) {
            let mut guard = lock.lock();
            lock.release_exclusive(&mut guard, tid);
            if !guard.has_any_lock(tid) {
                drop(guard);
                self.forget_page(tid, page_id);
            }
        }
        self.try_prune(page_id);
    }

    /// Releases every lock `tid` holds and removes it from the wait-for
    /// graph. Safe to call for a transaction holding nothing.
    pub fn release_all_locks(&self, tid: TransactionId) {
        let pages = self
            .transaction_pages
            .remove(&tid)
            .map(|(_, pages)| pages)
            .unwrap_or_default();
        for page_id in pages {
            if let Some(lock) = self.page_locks.get(&page_id).map(|e| Arc::clone(e.value())) {
                let mut guard = lock.lock();
                lock.release_all(&mut guard, tid);
            }
            self.try_prune(page_id);
        }
        self.wait_for.lock().remove_node(tid);
    }

    /// Whether some transaction holds `page_id` exclusively right now, or
    /// `None` when the lock was mid-operation and could not be inspected
    /// without blocking. The buffer pool uses this to keep pages
    /// mid-mutation out of eviction.
    pub fn has_exclusive_holder(&self, page_id: PageId) -> Option<bool> {
        match self.page_locks.get(&page_id) {
            None => Some(false),
            Some(entry) => entry
                .value()
                .try_lock()
                .map(|guard| guard.exclusive_holder().is_some()),
        }
    }

    pub fn holds_lock(&self, tid: TransactionId, page_id: PageId) -> bool {
        self.page_locks
            .get(&page_id)
            .map(|e| Arc::clone(e.value()))
            .is_some_and(|lock| lock.lock().has_any_lock(tid))
    }

    fn page_lock(&self, page_id: PageId) -> Arc<PageLock> {
        Arc::clone(
            self.page_locks
                .entry(page_id)
                .or_insert_with(|| Arc::new(PageLock::default()))
                .value(),
        )
    }

    fn is_current(&self, page_id: PageId, lock: &Arc<PageLock>) -> bool {
        self.page_locks
            .get(&page_id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), lock))
    }

    /// Records `tid` waiting on each target and checks for a cycle. On a
    /// cycle the edges are rolled back and the requester aborts.
    fn add_wait_edge(
        &self,
        tid: TransactionId,
        targets: &[TransactionId],
    ) -> StorageResult<()> {
        let mut wait_for = self.wait_for.lock();
        for target in targets {
            wait_for.increment_wait(tid, *target);
        }
        if wait_for.has_cycle() {
            wait_for.remove_node(tid);
            drop(wait_for);
            log::warn!("deadlock detected, aborting {}", tid);
            return Err(StorageError::TransactionAborted(tid));
        }
        Ok(())
    }

    fn forget_page(&self, tid: TransactionId, page_id: PageId) {
        if let Some(mut pages) = self.transaction_pages.get_mut(&tid) {
            pages.remove(&page_id);
        }
        self.transaction_pages
            .remove_if(&tid, |_, pages| pages.is_empty());
    }

    /// Removes the map entry when the lock has no holders or waiters. The
    /// non-blocking try_lock keeps the map shard and the page mutex from
    /// being taken in conflicting orders.
    fn try_prune(&self, page_id: PageId) {
        self.page_locks.remove_if(&page_id, |_, lock| {
            lock.try_lock().is_some_and(|guard| guard.is_unused())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TableId;
    use std::thread;
    use std::time::Duration;

    fn tx(n: u64) -> TransactionId {
        TransactionId::new(n)
    }

    fn page(n: u32) -> PageId {
        PageId::new(TableId(1), n)
    }

    #[test]
    fn test_shared_locks_coexist() -> StorageResult<()> {
        let manager = LockManager::new();
        manager.acquire_shared(tx(1), page(0))?;
        manager.acquire_shared(tx(2), page(0))?;

        assert!(manager.holds_lock(tx(1), page(0)));
        assert!(manager.holds_lock(tx(2), page(0)));
        Ok(())
    }

    #[test]
    fn test_release_all_forgets_transaction() -> StorageResult<()> {
        let manager = LockManager::new();
        manager.acquire_shared(tx(1), page(0))?;
        manager.acquire_exclusive(tx(1), page(1))?;

        manager.release_all_locks(tx(1));
        assert!(!manager.holds_lock(tx(1), page(0)));
        assert!(!manager.holds_lock(tx(1), page(1)));

        // Idempotent, and safe for a transaction that holds nothing.
        manager.release_all_locks(tx(1));
        manager.release_all_locks(tx(99));
        Ok(())
    }

    #[test]
    fn test_upgrade_as_sole_holder() -> StorageResult<()> {
        let manager = LockManager::new();
        manager.acquire_shared(tx(1), page(0))?;
        manager.acquire_exclusive(tx(1), page(0))?;
        assert!(manager.holds_lock(tx(1), page(0)));
        Ok(())
    }

    #[test]
    fn test_exclusive_blocks_until_release() {
        let manager = Arc::new(LockManager::new());
        manager.acquire_exclusive(tx(1), page(0)).unwrap();

        let handle = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || manager.acquire_shared(tx(2), page(0)))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!manager.holds_lock(tx(2), page(0)));

        manager.release_all_locks(tx(1));
        handle.join().unwrap().unwrap();
        assert!(manager.holds_lock(tx(2), page(0)));
    }

    #[test]
    fn test_waiters_granted_in_fifo_order() {
        let manager = Arc::new(LockManager::new());
        manager.acquire_exclusive(tx(1), page(0)).unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));

        // tx 2 queues first with an exclusive request.
        let first = {
            let manager = Arc::clone(&manager);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                manager.acquire_exclusive(tx(2), page(0)).unwrap();
                order.lock().push(2);
                manager.release_all_locks(tx(2));
            })
        };
        thread::sleep(Duration::from_millis(50));

        // tx 3 queues second with a shared request.
        let second = {
            let manager = Arc::clone(&manager);
            let order = Arc::clone(&order);
            thread::spawn(move || {
                manager.acquire_shared(tx(3), page(0)).unwrap();
                order.lock().push(3);
                manager.release_all_locks(tx(3));
            })
        };
        thread::sleep(Duration::from_millis(50));

        manager.release_all_locks(tx(1));
        first.join().unwrap();
        second.join().unwrap();

        assert_eq!(*order.lock(), vec![2, 3]);
    }

    #[test]
    fn test_deadlock_aborts_exactly_one() {
        let manager = Arc::new(LockManager::new());
        manager.acquire_exclusive(tx(1), page(0)).unwrap();
        manager.acquire_exclusive(tx(2), page(1)).unwrap();

        // Cross acquisition: tx 1 wants page 1, tx 2 wants page 0.
        let handles: Vec<_> = [(tx(1), page(1)), (tx(2), page(0))]
            .into_iter()
            .map(|(tid, pid)| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || {
                    let result = manager.acquire_exclusive(tid, pid);
                    if result.is_err() {
                        // Abort frees the victim's locks so the survivor
                        // can finish.
                        manager.release_all_locks(tid);
                    }
                    result
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        let aborted = results.iter().filter(|r| r.is_err()).count();
        assert_eq!(aborted, 1, "exactly one side of the cycle aborts");
        assert!(results.iter().any(|r| r.is_ok()));
        for result in results {
            if let Err(err) = result {
                assert!(matches!(err, StorageError::TransactionAborted(_)));
            }
        }
    }

    #[test]
    fn test_release_shared_keeps_exclusive() -> StorageResult<()> {
        let manager = LockManager::new();
        manager.acquire_shared(tx(1), page(0))?;
        manager.acquire_exclusive(tx(1), page(0))?;

        manager.release_shared(tx(1), page(0));
        assert!(manager.holds_lock(tx(1), page(0)));

        manager.release_exclusive(tx(1), page(0));
        assert!(!manager.holds_lock(tx(1), page(0)));
        Ok(())
    }
}
