use super::types::PageId;

/// Size of a page in bytes (4 KB)
pub const PAGE_SIZE: usize = 4096;

/// Invalid page ID constant
pub const INVALID_PAGE_ID: PageId = PageId(u32::MAX);

/// The well-known page holding (index name -> root page id) records.
/// The buffer pool's page-id allocator starts past it.
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Default K value for LRU-K replacement policy
pub const DEFAULT_LRUK_K: usize = 2;

/// Default buffer pool size (number of frames)
pub const DEFAULT_BUFFER_POOL_SIZE: usize = 64;

/// Default bucket capacity of the extendible-hash page table
pub const DEFAULT_BUCKET_SIZE: usize = 4;

/// Width of an index key in bytes
pub const KEY_SIZE: usize = 8;

/// Fixed-width index key, ordered by a `KeyComparator`
pub type KeyBytes = [u8; KEY_SIZE];
