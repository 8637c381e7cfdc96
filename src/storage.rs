//! Storage layer: page format, file I/O, and the buffer pool.
//!
//! Pages live on disk as fixed-size slotted pages ([`page`]), are read and
//! written a page at a time ([`disk`]), and are cached in a fixed number of
//! frames with NO-STEAL eviction ([`buffer`]).

pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;

pub use buffer::{BufferPool, Frame, Permissions, DEFAULT_POOL_SIZE};
pub use disk::DiskManager;
pub use error::{StorageError, StorageResult};
pub use page::{HeapPage, PageId, PAGE_SIZE};
