//! Concurrency control: per-page strict 2PL with deadlock detection.

pub mod lock;
pub mod manager;
pub mod wait_for;

pub use lock::{LockMode, LockState, PageLock};
pub use manager::LockManager;
pub use wait_for::WaitForGraph;
