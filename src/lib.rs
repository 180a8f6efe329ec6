//! Burrow - the storage-engine core of a disk-oriented database.
//!
//! Pages live on disk and are cached in a fixed pool of in-memory frames;
//! everything above is built from pinned pages.
//!
//! # Architecture
//!
//! - **Disk layer** (`storage::disk`): page-granular file I/O
//!   - `DiskManager`: reads and writes 4 KiB pages by page id
//!   - `DiskScheduler`: background worker funneling I/O requests
//!
//! - **Buffer pool** (`buffer`): the memory/disk boundary
//!   - `BufferPoolManager`: fetch/new/unpin/flush/delete with strict pin
//!     accounting; misses and evictions go through the disk scheduler
//!   - `LruKReplacer`: LRU-K eviction policy
//!   - `FrameHeader`: per-frame metadata plus the page latch
//!   - `ReadPageGuard`/`WritePageGuard`: RAII latch-plus-pin handles
//!
//! - **Page table** (`container`): `ExtendibleHashTable`, the concurrent
//!   page-id-to-frame map used by the buffer pool
//!
//! - **Index** (`index`): a concurrent B+tree over buffer-pool pages with
//!   latch crabbing, plus its leaf-chain iterator and key comparators
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use burrow::buffer::BufferPoolManager;
//! use burrow::concurrency::Transaction;
//! use burrow::index::{BPlusTree, IntegerComparator};
//! use burrow::storage::disk::DiskManager;
//! use burrow::{RecordId, PageId, SlotId};
//!
//! let disk_manager = Arc::new(DiskManager::new("test.db").unwrap());
//! let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
//!
//! let tree = BPlusTree::new("demo_index", Arc::clone(&bpm), IntegerComparator, 32, 32);
//! let mut transaction = Transaction::new();
//! let key = 42u64.to_le_bytes();
//! tree.insert(&key, RecordId::new(PageId::new(7), SlotId::new(0)), &mut transaction)
//!     .unwrap();
//! assert!(tree.get_value(&key).unwrap().is_some());
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
pub mod container;
pub mod index;
pub mod storage;

// Re-export commonly used types at the crate root
pub use common::{BurrowError, KeyBytes, PageId, RecordId, Result, SlotId};
