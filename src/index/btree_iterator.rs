use std::sync::Arc;

use crate::buffer::{BufferPoolManager, FrameHeader};
use crate::common::{KeyBytes, PageId, RecordId, Result, INVALID_PAGE_ID};
use crate::storage::page::LeafPageRef;

/// Forward scanner over the leaf chain.
///
/// Holds exactly one leaf pinned at a time and takes that leaf's read latch
/// only for the duration of a single entry read, so a long-lived iterator
/// never blocks writers. Each leaf is therefore a consistent snapshot, the
/// whole scan is not.
///
/// The past-the-end sentinel has no pinned leaf and `INVALID_PAGE_ID`;
/// iterators compare equal on `(page id, slot index)`.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    /// Pinned current leaf; None once exhausted
    frame: Option<Arc<FrameHeader>>,
    page_id: PageId,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn new(
        bpm: Arc<BufferPoolManager>,
        frame: Arc<FrameHeader>,
        page_id: PageId,
        index: usize,
    ) -> Self {
        Self {
            bpm,
            frame: Some(frame),
            page_id,
            index,
        }
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            frame: None,
            page_id: INVALID_PAGE_ID,
            index: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.frame.is_none()
    }

    /// Returns the next entry, crossing into sibling leaves as needed.
    pub fn next_entry(&mut self) -> Result<Option<(KeyBytes, RecordId)>> {
        loop {
            let Some(frame) = &self.frame else {
                return Ok(None);
            };

            let (entry, next_page_id) = {
                let data = frame.read_data();
                let leaf = LeafPageRef::new(&data[..]);
                if self.index < leaf.size() {
                    (Some((leaf.key_at(self.index), leaf.value_at(self.index))), INVALID_PAGE_ID)
                } else {
                    (None, leaf.next_page_id())
                }
            };

            if let Some(entry) = entry {
                self.index += 1;
                return Ok(Some(entry));
            }

            // This leaf is exhausted: release it before touching the sibling.
            self.bpm.unpin_page(self.page_id, false);
            self.frame = None;
            self.page_id = INVALID_PAGE_ID;
            self.index = 0;

            if !next_page_id.is_valid() {
                return Ok(None);
            }
            let frame = self.bpm.fetch_page(next_page_id)?;
            self.frame = Some(frame);
            self.page_id = next_page_id;
        }
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(KeyBytes, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

impl PartialEq for IndexIterator {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.index == other.index
    }
}

impl Drop for IndexIterator {
    fn drop(&mut self) {
        if self.frame.take().is_some() {
            self.bpm.unpin_page(self.page_id, false);
        }
    }
}
