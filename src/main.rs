use std::sync::Arc;

use burrow::buffer::BufferPoolManager;
use burrow::concurrency::Transaction;
use burrow::index::{BPlusTree, IntegerComparator};
use burrow::storage::disk::DiskManager;
use burrow::{PageId, RecordId, SlotId};

fn main() {
    println!("Burrow - disk-oriented storage engine core");
    println!("==========================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to create disk manager"));
    println!("Created disk manager for: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
    println!("Created buffer pool with 64 frames\n");

    let tree = BPlusTree::new("demo_index", Arc::clone(&bpm), IntegerComparator, 4, 4);

    let mut transaction = Transaction::new();
    for i in 1u64..=10 {
        let key = i.to_le_bytes();
        let value = RecordId::new(PageId::new(100), SlotId::new(i as u16));
        tree.insert(&key, value, &mut transaction)
            .expect("insert failed");
        println!("Inserted key={}", i);
    }

    println!("\nPoint lookups:");
    for i in [1u64, 5, 10, 11] {
        match tree.get_value(&i.to_le_bytes()).expect("lookup failed") {
            Some(value) => println!("  key={} -> {}", i, value),
            None => println!("  key={} -> (absent)", i),
        }
    }

    println!("\nFull scan:");
    let keys: Vec<u64> = tree
        .iter()
        .expect("iterator failed")
        .map(|entry| u64::from_le_bytes(entry.expect("scan failed").0))
        .collect();
    println!("  {:?}", keys);

    for i in [3u64, 4, 5] {
        tree.remove(&i.to_le_bytes(), &mut transaction)
            .expect("remove failed");
        println!("Removed key={}", i);
    }

    println!("\nTree after removals:");
    print!("{}", tree.dump().expect("dump failed"));

    bpm.flush_all_pages().expect("flush failed");
    println!("\nFlushed all pages to disk");

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully!");
}
