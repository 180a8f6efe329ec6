mod btree_internal_page;
mod btree_leaf_page;
mod btree_page;
mod header_page;

pub use btree_internal_page::{InternalPage, InternalPageRef};
pub use btree_leaf_page::{LeafPage, LeafPageRef};
pub use btree_page::{BTreePageRef, PageType};
pub use header_page::{HeaderPage, HeaderPageRef};
