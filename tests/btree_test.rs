//! Integration tests for the B+tree index

use std::sync::Arc;
use std::thread;

use burrow::buffer::BufferPoolManager;
use burrow::common::KeyBytes;
use burrow::concurrency::Transaction;
use burrow::index::{BPlusTree, IntegerComparator};
use burrow::storage::disk::DiskManager;
use burrow::{PageId, RecordId, SlotId};
use tempfile::NamedTempFile;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let dm = Arc::new(DiskManager::new(temp_file.path()).unwrap());
    (Arc::new(BufferPoolManager::new(pool_size, 2, dm)), temp_file)
}

fn key(v: u64) -> KeyBytes {
    v.to_le_bytes()
}

fn rid(v: u64) -> RecordId {
    RecordId::new(PageId::new((v / 100) as u32), SlotId::new((v % 100) as u16))
}

fn collect_keys(tree: &BPlusTree<IntegerComparator>) -> Vec<u64> {
    tree.iter()
        .unwrap()
        .map(|entry| u64::from_le_bytes(entry.unwrap().0))
        .collect()
}

#[test]
fn test_empty_tree() {
    let (bpm, _temp) = create_bpm(10);
    let tree = BPlusTree::new("empty", bpm, IntegerComparator, 4, 4);

    assert!(tree.is_empty());
    assert_eq!(tree.get_value(&key(1)).unwrap(), None);
    assert!(tree.iter().unwrap().is_end());

    // Removing from an empty tree is a silent no-op.
    let mut transaction = Transaction::new();
    tree.remove(&key(1), &mut transaction).unwrap();
    assert!(tree.is_empty());
}

#[test]
fn test_insert_and_lookup() {
    let (bpm, _temp) = create_bpm(20);
    let tree = BPlusTree::new("basic", bpm, IntegerComparator, 4, 4);
    let mut transaction = Transaction::new();

    for v in [5u64, 1, 9, 3, 7] {
        assert!(tree.insert(&key(v), rid(v), &mut transaction).unwrap());
    }
    assert!(!tree.is_empty());

    for v in [1u64, 3, 5, 7, 9] {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)), "key {}", v);
    }
    for v in [0u64, 2, 4, 6, 8, 10] {
        assert_eq!(tree.get_value(&key(v)).unwrap(), None, "key {}", v);
    }
}

#[test]
fn test_duplicate_insert_rejected() {
    let (bpm, _temp) = create_bpm(20);
    let tree = BPlusTree::new("dup", bpm, IntegerComparator, 4, 4);
    let mut transaction = Transaction::new();

    assert!(tree.insert(&key(1), rid(1), &mut transaction).unwrap());
    assert!(!tree.insert(&key(1), rid(2), &mut transaction).unwrap());

    // The original value survives.
    assert_eq!(tree.get_value(&key(1)).unwrap(), Some(rid(1)));
}

#[test]
fn test_split_cascade_small_fanout() {
    // Smallest interesting fanout: every few inserts split a page.
    let (bpm, _temp) = create_bpm(30);
    let tree = BPlusTree::new("cascade", Arc::clone(&bpm), IntegerComparator, 3, 3);
    let mut transaction = Transaction::new();

    let first_root = {
        for v in 1u64..=7 {
            assert!(tree.insert(&key(v), rid(v), &mut transaction).unwrap());
        }
        tree.root_page_id()
    };

    // The root must have split away from a single leaf.
    assert!(first_root.is_valid());
    assert_eq!(collect_keys(&tree), (1..=7).collect::<Vec<_>>());
    for v in 1u64..=7 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
    }
}

#[test]
fn test_sequential_inserts_stay_sorted() {
    let (bpm, _temp) = create_bpm(30);
    let tree = BPlusTree::new("seq", bpm, IntegerComparator, 4, 4);
    let mut transaction = Transaction::new();

    for v in 1u64..=300 {
        assert!(tree.insert(&key(v), rid(v), &mut transaction).unwrap());
    }

    assert_eq!(collect_keys(&tree), (1..=300).collect::<Vec<_>>());
    for v in 1u64..=300 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
    }
}

#[test]
fn test_shuffled_inserts_stay_sorted() {
    let (bpm, _temp) = create_bpm(30);
    let tree = BPlusTree::new("shuffled", bpm, IntegerComparator, 4, 5);
    let mut transaction = Transaction::new();

    // Deterministic shuffle of 0..=496 (503 is coprime to 497).
    let keys: Vec<u64> = (0..497u64).map(|i| (i * 503) % 497).collect();
    for &v in &keys {
        assert!(tree.insert(&key(v), rid(v), &mut transaction).unwrap());
    }

    assert_eq!(collect_keys(&tree), (0..497).collect::<Vec<_>>());
}

#[test]
fn test_iter_from_positions_at_lower_bound() {
    let (bpm, _temp) = create_bpm(30);
    let tree = BPlusTree::new("seek", bpm, IntegerComparator, 4, 4);
    let mut transaction = Transaction::new();

    for v in (0u64..100).map(|i| i * 2) {
        tree.insert(&key(v), rid(v), &mut transaction).unwrap();
    }

    // Present key: starts exactly there.
    let keys: Vec<u64> = tree
        .iter_from(&key(50))
        .unwrap()
        .map(|entry| u64::from_le_bytes(entry.unwrap().0))
        .collect();
    assert_eq!(keys, (25..100).map(|i| i * 2).collect::<Vec<_>>());

    // Absent key: starts at the next larger one.
    let keys: Vec<u64> = tree
        .iter_from(&key(51))
        .unwrap()
        .map(|entry| u64::from_le_bytes(entry.unwrap().0))
        .collect();
    assert_eq!(keys, (26..100).map(|i| i * 2).collect::<Vec<_>>());

    // Past the end: empty.
    let mut it = tree.iter_from(&key(1000)).unwrap();
    assert_eq!(it.next_entry().unwrap(), None);
}

#[test]
fn test_remove_redistribute_and_coalesce() {
    let (bpm, _temp) = create_bpm(30);
    let tree = BPlusTree::new("shrink", bpm, IntegerComparator, 4, 4);
    let mut transaction = Transaction::new();

    for v in 1u64..=20 {
        tree.insert(&key(v), rid(v), &mut transaction).unwrap();
    }

    // Removing from the tail first exercises borrow-from-left, then merges.
    for v in (11u64..=20).rev() {
        tree.remove(&key(v), &mut transaction).unwrap();
        let expected: Vec<u64> = (1..v).collect();
        assert_eq!(collect_keys(&tree), expected, "after removing {}", v);
    }

    for v in 1u64..=10 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
    }
    for v in 11u64..=20 {
        assert_eq!(tree.get_value(&key(v)).unwrap(), None);
    }
}

#[test]
fn test_remove_absent_key_is_noop() {
    let (bpm, _temp) = create_bpm(20);
    let tree = BPlusTree::new("noop", bpm, IntegerComparator, 4, 4);
    let mut transaction = Transaction::new();

    for v in 1u64..=5 {
        tree.insert(&key(v), rid(v), &mut transaction).unwrap();
    }
    tree.remove(&key(99), &mut transaction).unwrap();
    assert_eq!(collect_keys(&tree), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_remove_everything_collapses_root() {
    let (bpm, _temp) = create_bpm(30);
    let tree = BPlusTree::new("collapse", bpm, IntegerComparator, 4, 4);
    let mut transaction = Transaction::new();

    for v in 1u64..=30 {
        tree.insert(&key(v), rid(v), &mut transaction).unwrap();
    }
    for v in 1u64..=30 {
        tree.remove(&key(v), &mut transaction).unwrap();
    }

    assert!(tree.is_empty());
    assert!(tree.iter().unwrap().is_end());

    // The emptied tree accepts new inserts.
    for v in 100u64..=110 {
        assert!(tree.insert(&key(v), rid(v), &mut transaction).unwrap());
    }
    assert_eq!(collect_keys(&tree), (100..=110).collect::<Vec<_>>());
}

#[test]
fn test_interleaved_insert_remove() {
    let (bpm, _temp) = create_bpm(30);
    let tree = BPlusTree::new("churn", bpm, IntegerComparator, 4, 4);
    let mut transaction = Transaction::new();

    for round in 0u64..10 {
        for v in 0u64..50 {
            tree.insert(&key(round * 1000 + v), rid(v), &mut transaction)
                .unwrap();
        }
        for v in (0u64..50).filter(|v| v % 2 == 0) {
            tree.remove(&key(round * 1000 + v), &mut transaction).unwrap();
        }
    }

    let expected: Vec<u64> = (0..10)
        .flat_map(|round| (0..50).filter(|v| v % 2 == 1).map(move |v| round * 1000 + v))
        .collect();
    assert_eq!(collect_keys(&tree), expected);
}

#[test]
fn test_root_id_persisted_through_header() {
    let temp_file = NamedTempFile::new().unwrap();
    let path = temp_file.path().to_path_buf();

    {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(30, 2, dm));
        let tree = BPlusTree::new("persisted", Arc::clone(&bpm), IntegerComparator, 4, 4);
        let mut transaction = Transaction::new();
        for v in 1u64..=100 {
            tree.insert(&key(v), rid(v), &mut transaction).unwrap();
        }
        bpm.flush_all_pages().unwrap();
    }

    {
        let dm = Arc::new(DiskManager::new(&path).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(30, 2, dm));
        let tree =
            BPlusTree::open("persisted", Arc::clone(&bpm), IntegerComparator, 4, 4).unwrap();

        assert!(!tree.is_empty());
        assert_eq!(collect_keys(&tree), (1..=100).collect::<Vec<_>>());
        for v in [1u64, 50, 100] {
            assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
        }
    }
}

#[test]
fn test_debug_dump_mentions_every_key() {
    let (bpm, _temp) = create_bpm(30);
    let tree = BPlusTree::new("dump", bpm, IntegerComparator, 4, 4);
    let mut transaction = Transaction::new();

    for v in 1u64..=16 {
        tree.insert(&key(v), rid(v), &mut transaction).unwrap();
    }

    let dot = tree.to_dot().unwrap();
    assert!(dot.starts_with("digraph"));
    let dump = tree.dump().unwrap();
    for v in 1u64..=16 {
        assert!(dump.contains(&v.to_string()), "dump missing key {}", v);
    }
}

#[test]
fn test_concurrent_disjoint_inserts() {
    let (bpm, _temp) = create_bpm(60);
    let tree = Arc::new(BPlusTree::new(
        "parallel",
        bpm,
        IntegerComparator,
        8,
        8,
    ));

    let handles: Vec<_> = (0..4u64)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut transaction = Transaction::new();
                for v in 0..100 {
                    let k = t * 1000 + v;
                    assert!(tree.insert(&key(k), rid(k), &mut transaction).unwrap());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let expected: Vec<u64> = (0..4u64).flat_map(|t| (0..100).map(move |v| t * 1000 + v)).collect();
    assert_eq!(collect_keys(&tree), expected);
}

#[test]
fn test_concurrent_readers_during_writes() {
    let (bpm, _temp) = create_bpm(60);
    let tree = Arc::new(BPlusTree::new("mixed", bpm, IntegerComparator, 8, 8));

    {
        let mut transaction = Transaction::new();
        for v in 0u64..200 {
            tree.insert(&key(v), rid(v), &mut transaction).unwrap();
        }
    }

    let writer = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            let mut transaction = Transaction::new();
            for v in 200u64..400 {
                tree.insert(&key(v), rid(v), &mut transaction).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for _ in 0..50 {
                    // Keys from the initial load are always visible.
                    for v in [0u64, 77, 199] {
                        assert_eq!(tree.get_value(&key(v)).unwrap(), Some(rid(v)));
                    }
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(collect_keys(&tree), (0..400).collect::<Vec<_>>());
}
