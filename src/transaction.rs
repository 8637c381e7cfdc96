//! Transaction ID generation and management.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A unique identifier for a transaction.
///
/// IDs are never reused while a transaction is active, and id 0 is reserved:
/// the buffer pool uses it as the "clean" sentinel in a frame's dirty marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the inner u64 value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}

/// A thread-safe transaction ID generator.
pub struct TransactionIdGenerator {
    next_id: AtomicU64,
}

impl TransactionIdGenerator {
    /// Creates a new generator starting from 1 (0 is the clean sentinel).
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Mints the next unique transaction ID.
    pub fn next(&self) -> TransactionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        TransactionId::new(id)
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_id_display() {
        let id = TransactionId::new(123);
        assert_eq!(format!("{}", id), "Txn123");
    }

    #[test]
    fn test_generator_starts_at_one() {
        let generator = TransactionIdGenerator::new();
        assert_eq!(generator.next().value(), 1);
        assert_eq!(generator.next().value(), 2);
    }

    #[test]
    fn test_generator_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let generator = Arc::new(TransactionIdGenerator::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let gen = Arc::clone(&generator);
            handles.push(thread::spawn(move || {
                (0..100).map(|_| gen.next().value()).collect::<Vec<_>>()
            }));
        }

        let mut all_ids = vec![];
        for handle in handles {
            all_ids.extend(handle.join().unwrap());
        }

        all_ids.sort();
        all_ids.dedup();
        assert_eq!(all_ids.len(), 1000);
    }
}
