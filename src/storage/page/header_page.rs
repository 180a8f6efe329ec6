//! The index header page: a single well-known page (page 0) holding
//! `(index name -> root page id)` records so an index can find its root
//! again after a restart.
//!
//! Layout: `record_count: u32` at offset 0, then fixed-width records of a
//! 32-byte name (zero padded) followed by the root page id.

use crate::common::{PageId, Result, BurrowError, PAGE_SIZE};

use super::btree_page::{read_u32, write_u32};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// Maximum number of index records the header page can hold.
pub const HEADER_PAGE_CAPACITY: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_SIZE
}

/// Index names are compared in their fixed-width padded form.
fn padded_name(name: &str) -> [u8; NAME_SIZE] {
    let bytes = name.as_bytes();
    assert!(
        bytes.len() <= NAME_SIZE,
        "index name longer than {} bytes",
        NAME_SIZE
    );
    let mut padded = [0u8; NAME_SIZE];
    padded[..bytes.len()].copy_from_slice(bytes);
    padded
}

fn find_record(data: &[u8], name: &str) -> Option<usize> {
    let wanted = padded_name(name);
    let count = read_u32(data, RECORD_COUNT_OFFSET) as usize;
    (0..count).find(|&i| {
        let off = record_offset(i);
        data[off..off + NAME_SIZE] == wanted
    })
}

/// Read-only view of the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        read_u32(self.data, RECORD_COUNT_OFFSET) as usize
    }

    /// Root page id recorded for `name`, if any.
    pub fn get_root_page_id(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name)
            .map(|i| PageId::new(read_u32(self.data, record_offset(i) + NAME_SIZE)))
    }
}

/// Mutable view of the header page. A zeroed page is already a valid empty
/// header, so no init step is needed.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        read_u32(self.data, RECORD_COUNT_OFFSET) as usize
    }

    pub fn get_root_page_id(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name)
            .map(|i| PageId::new(read_u32(self.data, record_offset(i) + NAME_SIZE)))
    }

    /// Appends a new record. Fails if the page is full; overwrites in place
    /// if the name is already recorded.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> Result<()> {
        if let Some(i) = find_record(self.data, name) {
            write_u32(self.data, record_offset(i) + NAME_SIZE, root_page_id.as_u32());
            return Ok(());
        }

        let count = self.record_count();
        if count >= HEADER_PAGE_CAPACITY {
            return Err(BurrowError::HeaderFull);
        }

        let off = record_offset(count);
        self.data[off..off + NAME_SIZE].copy_from_slice(&padded_name(name));
        write_u32(self.data, off + NAME_SIZE, root_page_id.as_u32());
        write_u32(self.data, RECORD_COUNT_OFFSET, (count + 1) as u32);
        Ok(())
    }

    /// Updates an existing record. Returns whether the name was found.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        let Some(i) = find_record(self.data, name) else {
            return false;
        };
        write_u32(self.data, record_offset(i) + NAME_SIZE, root_page_id.as_u32());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_page_is_empty() {
        let data = [0u8; PAGE_SIZE];
        let header = HeaderPageRef::new(&data);
        assert_eq!(header.record_count(), 0);
        assert_eq!(header.get_root_page_id("orders_pk"), None);
    }

    #[test]
    fn test_insert_update_find() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        header.insert_record("orders_pk", PageId::new(3)).unwrap();
        header.insert_record("users_pk", PageId::new(7)).unwrap();
        assert_eq!(header.record_count(), 2);
        assert_eq!(header.get_root_page_id("orders_pk"), Some(PageId::new(3)));
        assert_eq!(header.get_root_page_id("users_pk"), Some(PageId::new(7)));

        assert!(header.update_record("orders_pk", PageId::new(9)));
        assert_eq!(header.get_root_page_id("orders_pk"), Some(PageId::new(9)));
        assert!(!header.update_record("missing", PageId::new(1)));
    }

    #[test]
    fn test_insert_existing_overwrites() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        header.insert_record("idx", PageId::new(1)).unwrap();
        header.insert_record("idx", PageId::new(2)).unwrap();
        assert_eq!(header.record_count(), 1);
        assert_eq!(header.get_root_page_id("idx"), Some(PageId::new(2)));
    }
}
