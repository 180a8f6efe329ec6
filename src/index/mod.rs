mod btree;
mod btree_iterator;
mod key_comparator;

pub use btree::BPlusTree;
pub use btree_iterator::IndexIterator;
pub use key_comparator::{BytewiseComparator, IntegerComparator, KeyComparator};
