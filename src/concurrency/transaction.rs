use std::collections::{HashSet, VecDeque};

use crate::buffer::WritePageGuard;
use crate::common::PageId;

/// Per-operation carrier for a tree write: the write-latched ancestors of
/// the current position (root first) and the pages scheduled for deletion
/// once every latch and pin has been released.
///
/// Dropping a guard releases its latch and pin, so draining the page set is
/// all the release logic there is. Deletions must happen after the drain:
/// a page may only be deleted once its pin count has reached zero.
#[derive(Default)]
pub struct Transaction {
    page_set: VecDeque<WritePageGuard>,
    deleted_page_set: HashSet<PageId>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes an ancestor guard acquired during the descent.
    pub fn add_into_page_set(&mut self, guard: WritePageGuard) {
        self.page_set.push_back(guard);
    }

    /// Pops the deepest retained ancestor (the parent of the page currently
    /// being restructured).
    pub fn pop_from_page_set(&mut self) -> Option<WritePageGuard> {
        self.page_set.pop_back()
    }

    /// Releases every retained latch and pin.
    pub fn clear_page_set(&mut self) {
        self.page_set.clear();
    }

    pub fn page_set_len(&self) -> usize {
        self.page_set.len()
    }

    /// Schedules a page for deletion after release.
    pub fn add_into_deleted_page_set(&mut self, page_id: PageId) {
        self.deleted_page_set.insert(page_id);
    }

    /// Takes the pages scheduled for deletion, leaving the set empty.
    pub fn take_deleted_page_set(&mut self) -> HashSet<PageId> {
        std::mem::take(&mut self.deleted_page_set)
    }
}
