//! Per-page lock state machine.
//!
//! A `PageLock` moves between NONE, SHARED and EXCLUSIVE, with a FIFO queue
//! of blocked waiters. It is driven by the [`LockManager`], which locks the
//! state mutex itself so it can consult the wait-for graph inside the same
//! critical section before a request blocks.
//!
//! [`LockManager`]: crate::concurrency::manager::LockManager

use crate::transaction::TransactionId;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashSet, VecDeque};

/// The mode a blocked request is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Free,
    Shared,
    Exclusive,
}

#[derive(Debug, Clone, Copy)]
struct Waiter {
    tid: TransactionId,
    mode: LockMode,
}

/// Lock state guarded by the `PageLock` mutex.
///
/// Invariants: in `Shared` the holder set is non-empty and no exclusive
/// holder exists; in `Exclusive` there is exactly one holder, which may also
/// appear in the shared set while it is upgrading (the downgrade path on
/// release depends on that).
#[derive(Debug)]
pub struct PageLockInner {
    state: LockState,
    shared: HashSet<TransactionId>,
    exclusive: Option<TransactionId>,
    waiters: VecDeque<Waiter>,
    last_waiter: Option<TransactionId>,
    // Popped from the queue but not yet through the condvar.
    admitted: HashSet<TransactionId>,
}

impl PageLockInner {
    pub fn state(&self) -> LockState {
        self.state
    }

    pub fn has_shared(&self, tid: TransactionId) -> bool {
        self.shared.contains(&tid)
    }

    pub fn has_exclusive(&self, tid: TransactionId) -> bool {
        self.exclusive == Some(tid)
    }

    pub fn has_any_lock(&self, tid: TransactionId) -> bool {
        self.has_shared(tid) || self.has_exclusive(tid)
    }

    pub fn exclusive_holder(&self) -> Option<TransactionId> {
        self.exclusive
    }

    pub fn shared_holders(&self) -> &HashSet<TransactionId> {
        &self.shared
    }

    /// The most recently queued waiter, if any. New waits order themselves
    /// behind this transaction in the wait-for graph; FIFO admission makes
    /// that edge transitively cover every earlier waiter.
    pub fn last_waiter(&self) -> Option<TransactionId> {
        self.last_waiter
    }

    /// Transactions popped from the queue that have not run yet. They are
    /// next in line, so new requests must order behind them as well.
    pub fn admitted(&self) -> &HashSet<TransactionId> {
        &self.admitted
    }

    /// A shared request is granted immediately when the requester already
    /// holds a stake; otherwise only when no one is queued or admitted and
    /// the page is free or shared. Holders bypass the queue gate because
    /// they are what the queue is waiting on.
    pub fn can_acquire_shared(&self, tid: TransactionId) -> bool {
        if self.has_any_lock(tid) {
            return true;
        }
        if !self.waiters.is_empty() || !self.admitted.is_empty() {
            return false;
        }
        matches!(self.state, LockState::Free | LockState::Shared)
    }

    /// An exclusive request is granted immediately when the requester
    /// already holds exclusive or is the sole shared holder (upgrade);
    /// otherwise only when no one is queued or admitted and the page is
    /// free.
    pub fn can_acquire_exclusive(&self, tid: TransactionId) -> bool {
        if self.exclusive == Some(tid)
            || (self.shared.len() == 1 && self.shared.contains(&tid))
        {
            return true;
        }
        if !self.waiters.is_empty() || !self.admitted.is_empty() {
            return false;
        }
        matches!(self.state, LockState::Free)
    }

    /// True when nothing holds, waits on, or has been admitted to this lock,
    /// so the manager may prune the map entry.
    pub fn is_unused(&self) -> bool {
        self.shared.is_empty()
            && self.exclusive.is_none()
            && self.waiters.is_empty()
            && self.admitted.is_empty()
    }
}

/// A single page's lock: state machine plus the condvar its waiters park on.
#[derive(Debug)]
pub struct PageLock {
    inner: Mutex<PageLockInner>,
    wakeup: Condvar,
}

impl Default for PageLock {
    fn default() -> Self {
        Self {
            inner: Mutex::new(PageLockInner {
                state: LockState::Free,
                shared: HashSet::new(),
                exclusive: None,
                waiters: VecDeque::new(),
                last_waiter: None,
                admitted: HashSet::new(),
            }),
            wakeup: Condvar::new(),
        }
    }
}

impl PageLock {
    pub fn lock(&self) -> MutexGuard<'_, PageLockInner> {
        self.inner.lock()
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, PageLockInner>> {
        self.inner.try_lock()
    }

    /// Grants a shared stake, parking on the condvar until it is this
    /// transaction's turn. A non-empty waiter queue or admitted set forces
    /// queueing even when the grant would otherwise be immediate, so neither
    /// long-waiting writers nor just-admitted waiters can be barged past by
    /// a stream of newcomers. A requester that already holds a stake skips
    /// the queue: it is what the queue is waiting on, and parking it behind
    /// its own waiters would wedge both.
    pub fn acquire_shared(&self, guard: &mut MutexGuard<'_, PageLockInner>, tid: TransactionId) {
        if !guard.has_any_lock(tid)
            && (!guard.waiters.is_empty() || !guard.admitted.is_empty())
        {
            self.wait(guard, tid, LockMode::Shared);
        }
        loop {
            match guard.state {
                LockState::Free => {
                    guard.state = LockState::Shared;
                    guard.shared.insert(tid);
                    return;
                }
                LockState::Shared => {
                    guard.shared.insert(tid);
                    return;
                }
                LockState::Exclusive => {
                    if guard.exclusive == Some(tid) {
                        guard.shared.insert(tid);
                        return;
                    }
                    self.wait(guard, tid, LockMode::Shared);
                }
            }
        }
    }

    /// Grants an exclusive stake, parking until it is this transaction's
    /// turn. A sole shared holder upgrades in place without passing through
    /// the free state; its shared stake is kept for the downgrade path. The
    /// current holder (or sole-holder upgrader) skips the queue gate for the
    /// same reason as in [`acquire_shared`](Self::acquire_shared).
    pub fn acquire_exclusive(&self, guard: &mut MutexGuard<'_, PageLockInner>, tid: TransactionId) {
        let holder = guard.exclusive == Some(tid)
            || (guard.shared.len() == 1 && guard.shared.contains(&tid));
        if !holder && (!guard.waiters.is_empty() || !guard.admitted.is_empty()) {
            self.wait(guard, tid, LockMode::Exclusive);
        }
        loop {
            match guard.state {
                LockState::Free => {
                    guard.state = LockState::Exclusive;
                    guard.exclusive = Some(tid);
                    return;
                }
                LockState::Shared => {
                    if guard.shared.len() == 1 && guard.shared.contains(&tid) {
                        guard.state = LockState::Exclusive;
                        guard.exclusive = Some(tid);
                        return;
                    }
                    self.wait(guard, tid, LockMode::Exclusive);
                }
                LockState::Exclusive => {
                    if guard.exclusive == Some(tid) {
                        return;
                    }
                    self.wait(guard, tid, LockMode::Exclusive);
                }
            }
        }
    }

    fn wait(&self, guard: &mut MutexGuard<'_, PageLockInner>, tid: TransactionId, mode: LockMode) {
        guard.last_waiter = Some(tid);
        guard.waiters.push_back(Waiter { tid, mode });
        while !guard.admitted.remove(&tid) {
            self.wakeup.wait(guard);
        }
    }

    /// Pops the queue head into the admitted set and wakes the sleepers.
    /// Each admitted transaction re-checks the state once it runs, so an
    /// admission never grants more than the state allows.
    fn admit_next(&self, guard: &mut MutexGuard<'_, PageLockInner>) {
        if let Some(waiter) = guard.waiters.pop_front() {
            guard.admitted.insert(waiter.tid);
            if guard.waiters.is_empty() {
                guard.last_waiter = None;
            }
            self.wakeup.notify_all();
        }
    }

    pub fn release_shared(&self, guard: &mut MutexGuard<'_, PageLockInner>, tid: TransactionId) {
        match guard.state {
            LockState::Shared => {
                guard.shared.remove(&tid);
                if guard.shared.is_empty() {
                    guard.state = LockState::Free;
                    self.admit_next(guard);
                } else if guard.shared.len() == 1 {
                    // If the head waiter belongs to the sole remaining
                    // holder it is that holder's pending upgrade; admit it,
                    // plus any of its queued follow-ups.
                    while matches!(guard.waiters.front(), Some(w) if guard.shared.contains(&w.tid))
                    {
                        self.admit_next(guard);
                    }
                }
            }
            LockState::Exclusive => {
                guard.shared.remove(&tid);
            }
            LockState::Free => {}
        }
    }

    pub fn release_exclusive(&self, guard: &mut MutexGuard<'_, PageLockInner>, tid: TransactionId) {
        if guard.state != LockState::Exclusive || guard.exclusive != Some(tid) {
            return;
        }
        guard.exclusive = None;
        if guard.shared.contains(&tid) {
            // Downgrade: the holder kept a shared stake through its upgrade,
            // so only leading shared-mode waiters may join it.
            guard.state = LockState::Shared;
            while matches!(guard.waiters.front(), Some(w) if w.mode == LockMode::Shared) {
                self.admit_next(guard);
            }
        } else {
            guard.state = LockState::Free;
            self.admit_next(guard);
        }
    }

    /// Releases both stakes; used at transaction end and for unsafe release.
    pub fn release_all(&self, guard: &mut MutexGuard<'_, PageLockInner>, tid: TransactionId) {
        self.release_shared(guard, tid);
        self.release_exclusive(guard, tid);
    }
}
