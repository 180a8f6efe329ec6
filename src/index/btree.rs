use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::warn;
use parking_lot::RwLock;

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    KeyBytes, PageId, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::concurrency::Transaction;
use crate::storage::page::{
    BTreePageRef, HeaderPage, HeaderPageRef, InternalPage, InternalPageRef, LeafPage, LeafPageRef,
};

use super::{IndexIterator, KeyComparator};

/// Concurrent B+tree index built on buffer-pool pages.
///
/// Readers crab down the tree holding at most two read latches (parent and
/// child). Writers take the root latch exclusively and keep a write latch on
/// every page from the root to the leaf until the operation finishes; the
/// retained ancestors live in the transaction's page set and double as the
/// path used by splits and merges, so pages carry no parent pointers.
///
/// The root page id is persisted in the header page under the index's name.
pub struct BPlusTree<C: KeyComparator> {
    index_name: String,
    /// The "root latch": guards the choice of root for a whole operation
    root_page_id: RwLock<PageId>,
    bpm: Arc<BufferPoolManager>,
    comparator: C,
    leaf_max_size: usize,
    internal_max_size: usize,
    /// Whether the header page already holds a record for this index
    header_recorded: AtomicBool,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Creates an empty index. Nothing is written until the first insert.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Self {
        assert!(leaf_max_size >= 2, "leaf max size must be at least 2");
        assert!(internal_max_size >= 3, "internal max size must be at least 3");
        Self {
            index_name: index_name.into(),
            root_page_id: RwLock::new(INVALID_PAGE_ID),
            bpm,
            comparator,
            leaf_max_size,
            internal_max_size,
            header_recorded: AtomicBool::new(false),
        }
    }

    /// Reopens an index by looking its root up in the header page.
    pub fn open(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        comparator: C,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let index_name = index_name.into();
        let recorded_root = {
            let guard = bpm.checked_read_page(HEADER_PAGE_ID)?;
            HeaderPageRef::new(guard.data()).get_root_page_id(&index_name)
        };

        let tree = Self::new(index_name, bpm, comparator, leaf_max_size, internal_max_size);
        if let Some(root) = recorded_root {
            *tree.root_page_id.write() = root;
            tree.header_recorded.store(true, Ordering::SeqCst);
        }
        Ok(tree)
    }

    pub fn is_empty(&self) -> bool {
        !self.root_page_id.read().is_valid()
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup. `Ok(None)` means the key is absent.
    pub fn get_value(&self, key: &KeyBytes) -> Result<Option<RecordId>> {
        let Some(leaf_guard) = self.find_leaf_page_read(Some(key))? else {
            return Ok(None);
        };
        Ok(LeafPageRef::new(leaf_guard.data()).lookup(key, &self.comparator))
    }

    /// Inserts a key-value pair. Returns false (without mutating anything)
    /// if the key is already present.
    pub fn insert(
        &self,
        key: &KeyBytes,
        value: RecordId,
        transaction: &mut Transaction,
    ) -> Result<bool> {
        let mut root_id = self.root_page_id.write();
        let result = self.insert_inner(key, value, &mut root_id, transaction);
        self.release_transaction(transaction);
        result
    }

    /// Removes a key. Removing an absent key is a silent no-op.
    pub fn remove(&self, key: &KeyBytes, transaction: &mut Transaction) -> Result<()> {
        let mut root_id = self.root_page_id.write();
        let result = self.remove_inner(key, &mut root_id, transaction);
        self.release_transaction(transaction);
        result
    }

    /// Iterator positioned at the leftmost entry.
    pub fn iter(&self) -> Result<IndexIterator> {
        match self.find_leaf_page_read(None)? {
            None => Ok(IndexIterator::end(Arc::clone(&self.bpm))),
            Some(guard) => {
                let page_id = guard.page_id();
                let frame = guard.into_frame();
                Ok(IndexIterator::new(Arc::clone(&self.bpm), frame, page_id, 0))
            }
        }
    }

    /// Iterator positioned at the first entry with key >= `key`.
    pub fn iter_from(&self, key: &KeyBytes) -> Result<IndexIterator> {
        match self.find_leaf_page_read(Some(key))? {
            None => Ok(IndexIterator::end(Arc::clone(&self.bpm))),
            Some(guard) => {
                let index = LeafPageRef::new(guard.data()).key_index(key, &self.comparator);
                let page_id = guard.page_id();
                let frame = guard.into_frame();
                Ok(IndexIterator::new(
                    Arc::clone(&self.bpm),
                    frame,
                    page_id,
                    index,
                ))
            }
        }
    }

    /// The past-the-end sentinel.
    pub fn end(&self) -> IndexIterator {
        IndexIterator::end(Arc::clone(&self.bpm))
    }

    /// Read-latched descent to the leaf responsible for `key` (or the
    /// leftmost leaf when `key` is None), crabbing parent-to-child so at
    /// most two read latches are ever held.
    fn find_leaf_page_read(&self, key: Option<&KeyBytes>) -> Result<Option<ReadPageGuard>> {
        let root_latch = self.root_page_id.read();
        if !root_latch.is_valid() {
            return Ok(None);
        }
        let mut guard = self.bpm.checked_read_page(*root_latch)?;
        drop(root_latch);

        loop {
            let child = {
                let header = BTreePageRef::new(guard.data());
                if header.is_leaf() {
                    break;
                }
                let internal = InternalPageRef::new(guard.data());
                match key {
                    Some(key) => internal.lookup(key, &self.comparator),
                    None => internal.value_at(0),
                }
            };
            // The child latch is acquired before the parent guard drops.
            guard = self.bpm.checked_read_page(child)?;
        }
        Ok(Some(guard))
    }

    /// Write-latched descent for a modifying operation. Every ancestor's
    /// guard is retained in the transaction's page set; the leaf guard is
    /// returned to the caller.
    fn find_leaf_page_write(
        &self,
        key: &KeyBytes,
        root_id: PageId,
        transaction: &mut Transaction,
    ) -> Result<WritePageGuard> {
        let mut guard = self.bpm.checked_write_page(root_id)?;
        loop {
            let child = {
                let header = BTreePageRef::new(guard.data());
                if header.is_leaf() {
                    break;
                }
                InternalPageRef::new(guard.data()).lookup(key, &self.comparator)
            };
            let child_guard = self.bpm.checked_write_page(child)?;
            transaction.add_into_page_set(guard);
            guard = child_guard;
        }
        Ok(guard)
    }

    fn insert_inner(
        &self,
        key: &KeyBytes,
        value: RecordId,
        root_id: &mut PageId,
        transaction: &mut Transaction,
    ) -> Result<bool> {
        if !root_id.is_valid() {
            self.start_new_tree(key, value, root_id)?;
            return Ok(true);
        }

        let mut leaf_guard = self.find_leaf_page_write(key, *root_id, transaction)?;

        if LeafPageRef::new(leaf_guard.data())
            .lookup(key, &self.comparator)
            .is_some()
        {
            return Ok(false);
        }

        let new_size = {
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            leaf.insert(key, value, &self.comparator)
        };

        if new_size >= self.leaf_max_size {
            self.split_leaf(leaf_guard, transaction, root_id)?;
        }
        Ok(true)
    }

    fn start_new_tree(&self, key: &KeyBytes, value: RecordId, root_id: &mut PageId) -> Result<()> {
        let mut guard = self.bpm.checked_new_page()?;
        let page_id = guard.page_id();
        {
            let mut leaf = LeafPage::new(guard.data_mut());
            leaf.init(page_id, self.leaf_max_size);
            leaf.insert(key, value, &self.comparator);
        }
        *root_id = page_id;
        self.update_root_page_id(page_id)
    }

    fn split_leaf(
        &self,
        mut leaf_guard: WritePageGuard,
        transaction: &mut Transaction,
        root_id: &mut PageId,
    ) -> Result<()> {
        let mut new_guard = self.bpm.checked_new_page()?;
        let new_page_id = new_guard.page_id();

        let separator = {
            let mut new_leaf = LeafPage::new(new_guard.data_mut());
            new_leaf.init(new_page_id, self.leaf_max_size);
            let mut old_leaf = LeafPage::new(leaf_guard.data_mut());
            old_leaf.move_half_to(&mut new_leaf);
            new_leaf.key_at(0)
        };

        self.insert_into_parent(leaf_guard, separator, new_guard, transaction, root_id)
    }

    /// Links `new_guard` (the right half of a split) into the parent of
    /// `old_guard`, splitting upward as long as parents overflow. The parent
    /// is the deepest guard retained in the transaction's page set.
    fn insert_into_parent(
        &self,
        old_guard: WritePageGuard,
        separator: KeyBytes,
        new_guard: WritePageGuard,
        transaction: &mut Transaction,
        root_id: &mut PageId,
    ) -> Result<()> {
        if old_guard.page_id() == *root_id {
            let mut root_guard = self.bpm.checked_new_page()?;
            let new_root_id = root_guard.page_id();
            {
                let mut root = InternalPage::new(root_guard.data_mut());
                root.init(new_root_id, self.internal_max_size);
                root.populate_new_root(old_guard.page_id(), &separator, new_guard.page_id());
            }
            *root_id = new_root_id;
            return self.update_root_page_id(new_root_id);
        }

        let mut parent_guard = transaction
            .pop_from_page_set()
            .expect("write descent left no parent on the page set");

        let new_size = {
            let mut parent = InternalPage::new(parent_guard.data_mut());
            parent.insert_node_after(old_guard.page_id(), &separator, new_guard.page_id())
        };
        drop(old_guard);
        drop(new_guard);

        if new_size >= self.internal_max_size {
            let mut new_internal_guard = self.bpm.checked_new_page()?;
            let new_internal_id = new_internal_guard.page_id();
            let separator = {
                let mut new_internal = InternalPage::new(new_internal_guard.data_mut());
                new_internal.init(new_internal_id, self.internal_max_size);
                let mut parent = InternalPage::new(parent_guard.data_mut());
                parent.move_half_to(&mut new_internal);
                new_internal.key_at(0)
            };
            return self.insert_into_parent(
                parent_guard,
                separator,
                new_internal_guard,
                transaction,
                root_id,
            );
        }
        Ok(())
    }

    fn remove_inner(
        &self,
        key: &KeyBytes,
        root_id: &mut PageId,
        transaction: &mut Transaction,
    ) -> Result<()> {
        if !root_id.is_valid() {
            return Ok(());
        }

        let mut leaf_guard = self.find_leaf_page_write(key, *root_id, transaction)?;

        if LeafPageRef::new(leaf_guard.data())
            .lookup(key, &self.comparator)
            .is_none()
        {
            return Ok(());
        }
        {
            let mut leaf = LeafPage::new(leaf_guard.data_mut());
            leaf.remove_record(key, &self.comparator);
        }

        self.coalesce_or_redistribute(leaf_guard, transaction, root_id)
    }

    /// Restores the half-full invariant for an underflowing page: borrow
    /// from the preferred sibling if it has spare entries, merge with it
    /// otherwise, recursing up through the retained ancestors.
    fn coalesce_or_redistribute(
        &self,
        mut node_guard: WritePageGuard,
        transaction: &mut Transaction,
        root_id: &mut PageId,
    ) -> Result<()> {
        if node_guard.page_id() == *root_id {
            return self.adjust_root(node_guard, transaction, root_id);
        }

        let is_leaf = BTreePageRef::new(node_guard.data()).is_leaf();
        let (size, min_size) = if is_leaf {
            let leaf = LeafPageRef::new(node_guard.data());
            (leaf.size(), leaf.min_size())
        } else {
            let internal = InternalPageRef::new(node_guard.data());
            (internal.size(), internal.min_size())
        };
        if size >= min_size {
            return Ok(());
        }

        let mut parent_guard = transaction
            .pop_from_page_set()
            .expect("write descent left no parent on the page set");
        let node_id = node_guard.page_id();
        let index = InternalPageRef::new(parent_guard.data())
            .value_index(node_id)
            .expect("page missing from its parent");

        if index == 0 && InternalPageRef::new(parent_guard.data()).size() == 1 {
            // Minimum-fanout trees can leave an internal page with a single
            // child; there is no sibling to borrow from or merge with.
            return Ok(());
        }

        if index > 0 {
            // Prefer the left sibling.
            let sibling_id = InternalPageRef::new(parent_guard.data()).value_at(index - 1);
            let mut sibling_guard = self.bpm.checked_write_page(sibling_id)?;

            if self.has_spare(&sibling_guard, is_leaf) {
                let new_separator = if is_leaf {
                    let mut node = LeafPage::new(node_guard.data_mut());
                    let mut sibling = LeafPage::new(sibling_guard.data_mut());
                    sibling.move_last_to_front_of(&mut node);
                    node.key_at(0)
                } else {
                    let middle_key = InternalPageRef::new(parent_guard.data()).key_at(index);
                    let mut node = InternalPage::new(node_guard.data_mut());
                    let mut sibling = InternalPage::new(sibling_guard.data_mut());
                    sibling.move_last_to_front_of(&mut node, &middle_key)
                };
                InternalPage::new(parent_guard.data_mut()).set_key_at(index, &new_separator);
                return Ok(());
            }

            // Merge this page into its left sibling.
            if is_leaf {
                let mut node = LeafPage::new(node_guard.data_mut());
                let mut sibling = LeafPage::new(sibling_guard.data_mut());
                node.move_all_to(&mut sibling);
            } else {
                let middle_key = InternalPageRef::new(parent_guard.data()).key_at(index);
                let mut node = InternalPage::new(node_guard.data_mut());
                let mut sibling = InternalPage::new(sibling_guard.data_mut());
                node.move_all_to(&mut sibling, &middle_key);
            }
            InternalPage::new(parent_guard.data_mut()).remove(index);
            transaction.add_into_deleted_page_set(node_id);
            drop(node_guard);
            drop(sibling_guard);

            self.coalesce_or_redistribute(parent_guard, transaction, root_id)
        } else {
            // Leftmost child: work with the right sibling instead.
            let sibling_id = InternalPageRef::new(parent_guard.data()).value_at(index + 1);
            let mut sibling_guard = self.bpm.checked_write_page(sibling_id)?;

            if self.has_spare(&sibling_guard, is_leaf) {
                let new_separator = if is_leaf {
                    let mut node = LeafPage::new(node_guard.data_mut());
                    let mut sibling = LeafPage::new(sibling_guard.data_mut());
                    sibling.move_first_to_end_of(&mut node);
                    sibling.key_at(0)
                } else {
                    let middle_key = InternalPageRef::new(parent_guard.data()).key_at(index + 1);
                    let mut node = InternalPage::new(node_guard.data_mut());
                    let mut sibling = InternalPage::new(sibling_guard.data_mut());
                    sibling.move_first_to_end_of(&mut node, &middle_key)
                };
                InternalPage::new(parent_guard.data_mut()).set_key_at(index + 1, &new_separator);
                return Ok(());
            }

            // Merge the right sibling into this page.
            if is_leaf {
                let mut sibling = LeafPage::new(sibling_guard.data_mut());
                let mut node = LeafPage::new(node_guard.data_mut());
                sibling.move_all_to(&mut node);
            } else {
                let middle_key = InternalPageRef::new(parent_guard.data()).key_at(index + 1);
                let mut sibling = InternalPage::new(sibling_guard.data_mut());
                let mut node = InternalPage::new(node_guard.data_mut());
                sibling.move_all_to(&mut node, &middle_key);
            }
            InternalPage::new(parent_guard.data_mut()).remove(index + 1);
            transaction.add_into_deleted_page_set(sibling_id);
            drop(sibling_guard);
            drop(node_guard);

            self.coalesce_or_redistribute(parent_guard, transaction, root_id)
        }
    }

    fn has_spare(&self, sibling_guard: &WritePageGuard, is_leaf: bool) -> bool {
        if is_leaf {
            let sibling = LeafPageRef::new(sibling_guard.data());
            sibling.size() > sibling.min_size()
        } else {
            let sibling = InternalPageRef::new(sibling_guard.data());
            sibling.size() > sibling.min_size()
        }
    }

    /// Shrinks the tree at the top: an empty leaf root empties the tree, an
    /// internal root with a single child hands the root role to that child.
    fn adjust_root(
        &self,
        root_guard: WritePageGuard,
        transaction: &mut Transaction,
        root_id: &mut PageId,
    ) -> Result<()> {
        let (is_leaf, size) = {
            let header = BTreePageRef::new(root_guard.data());
            (header.is_leaf(), header.size())
        };

        if is_leaf && size == 0 {
            transaction.add_into_deleted_page_set(root_guard.page_id());
            *root_id = INVALID_PAGE_ID;
            return self.update_root_page_id(INVALID_PAGE_ID);
        }

        if !is_leaf && size == 1 {
            let child = InternalPageRef::new(root_guard.data()).value_at(0);
            transaction.add_into_deleted_page_set(root_guard.page_id());
            *root_id = child;
            return self.update_root_page_id(child);
        }

        Ok(())
    }

    /// Writes the current root id through the header page: the first change
    /// inserts a record for this index, later ones update it in place.
    fn update_root_page_id(&self, root_id: PageId) -> Result<()> {
        let mut guard = self.bpm.checked_write_page(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if self.header_recorded.swap(true, Ordering::SeqCst) {
            header.update_record(&self.index_name, root_id);
            Ok(())
        } else {
            header.insert_record(&self.index_name, root_id)
        }
    }

    /// Drops every retained latch and pin, then deletes the pages scheduled
    /// for deletion (their pins are gone by that point).
    fn release_transaction(&self, transaction: &mut Transaction) {
        transaction.clear_page_set();
        for page_id in transaction.take_deleted_page_set() {
            self.bpm.delete_page(page_id);
        }
    }

    /// Renders the tree as a GraphViz digraph. Observability only.
    pub fn to_dot(&self) -> Result<String> {
        let mut out = String::from("digraph btree {\n  node [shape=record];\n");
        let root = self.root_page_id();
        if !root.is_valid() {
            warn!("drawing an empty tree");
        } else {
            self.dot_page(root, &mut out)?;
        }
        out.push_str("}\n");
        Ok(out)
    }

    fn dot_page(&self, page_id: PageId, out: &mut String) -> Result<()> {
        let guard = self.bpm.checked_read_page(page_id)?;
        if BTreePageRef::new(guard.data()).is_leaf() {
            let leaf = LeafPageRef::new(guard.data());
            let keys = (0..leaf.size())
                .map(|i| u64::from_le_bytes(leaf.key_at(i)).to_string())
                .collect::<Vec<_>>()
                .join("|");
            let _ = writeln!(out, "  page_{} [label=\"L{}|{}\"];", page_id.0, page_id.0, keys);
            if leaf.next_page_id().is_valid() {
                let _ = writeln!(
                    out,
                    "  page_{} -> page_{} [style=dashed];",
                    page_id.0,
                    leaf.next_page_id().0
                );
            }
            return Ok(());
        }

        let internal = InternalPageRef::new(guard.data());
        let keys = (1..internal.size())
            .map(|i| u64::from_le_bytes(internal.key_at(i)).to_string())
            .collect::<Vec<_>>()
            .join("|");
        let _ = writeln!(out, "  page_{} [label=\"I{}|{}\"];", page_id.0, page_id.0, keys);
        let children: Vec<PageId> = (0..internal.size()).map(|i| internal.value_at(i)).collect();
        for child in &children {
            let _ = writeln!(out, "  page_{} -> page_{};", page_id.0, child.0);
        }
        drop(guard);

        for child in children {
            self.dot_page(child, out)?;
        }
        Ok(())
    }

    /// Plain-text dump of every page, root first. Observability only.
    pub fn dump(&self) -> Result<String> {
        let mut out = String::new();
        let root = self.root_page_id();
        if root.is_valid() {
            self.dump_page(root, 0, &mut out)?;
        } else {
            out.push_str("(empty tree)\n");
        }
        Ok(out)
    }

    fn dump_page(&self, page_id: PageId, depth: usize, out: &mut String) -> Result<()> {
        let guard = self.bpm.checked_read_page(page_id)?;
        let indent = "  ".repeat(depth);
        if BTreePageRef::new(guard.data()).is_leaf() {
            let leaf = LeafPageRef::new(guard.data());
            let keys = (0..leaf.size())
                .map(|i| u64::from_le_bytes(leaf.key_at(i)).to_string())
                .collect::<Vec<_>>()
                .join(",");
            let _ = writeln!(
                out,
                "{}leaf {} next={}: [{}]",
                indent,
                page_id.0,
                leaf.next_page_id().0,
                keys
            );
            return Ok(());
        }

        let internal = InternalPageRef::new(guard.data());
        let keys = (1..internal.size())
            .map(|i| u64::from_le_bytes(internal.key_at(i)).to_string())
            .collect::<Vec<_>>()
            .join(",");
        let _ = writeln!(out, "{}internal {}: [{}]", indent, page_id.0, keys);
        let children: Vec<PageId> = (0..internal.size()).map(|i| internal.value_at(i)).collect();
        drop(guard);

        for child in children {
            self.dump_page(child, depth + 1, out)?;
        }
        Ok(())
    }
}
