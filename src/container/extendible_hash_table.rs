use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::mem;

use parking_lot::Mutex;

/// A bucket of key-value pairs with a local depth.
struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K: Eq, V> Bucket<K, V> {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            items: Vec::new(),
        }
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &K) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| k == key) {
            self.items.remove(pos);
            true
        } else {
            false
        }
    }

    /// Inserts or overwrites. Returns false if the bucket is full and the
    /// key is not already present.
    fn insert(&mut self, key: K, value: V, capacity: usize) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| *k == key) {
            self.items[pos].1 = value;
            return true;
        }
        if self.items.len() >= capacity {
            return false;
        }
        self.items.push((key, value));
        true
    }
}

struct HashTableInner<K, V> {
    global_depth: usize,
    num_buckets: usize,
    /// Directory of size 2^global_depth. Entries are indices into `buckets`;
    /// several directory slots may share a bucket.
    dir: Vec<usize>,
    /// Bucket arena. Buckets are never removed, only split.
    buckets: Vec<Bucket<K, V>>,
}

/// Extendible hash table with a doubling directory.
///
/// The directory has 2^global_depth entries, each pointing into a bucket
/// arena. When an insert lands in a full bucket the bucket splits: the
/// directory doubles first if the bucket's local depth has caught up with
/// the global depth, then the bucket's items are rehashed on the new
/// distinguishing bit and directory slots are redirected.
///
/// One internal mutex makes every public operation linearizable. This is the
/// in-memory page table of the buffer pool (page id -> frame id).
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    inner: Mutex<HashTableInner<K, V>>,
}

impl<K: Hash + Eq + Clone, V: Clone> ExtendibleHashTable<K, V> {
    /// Creates a table with a single depth-0 bucket of the given capacity.
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            bucket_size,
            inner: Mutex::new(HashTableInner {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![0],
                buckets: vec![Bucket::new(0)],
            }),
        }
    }

    fn hash_key(key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as usize
    }

    fn index_of(global_depth: usize, key: &K) -> usize {
        let mask = (1usize << global_depth) - 1;
        Self::hash_key(key) & mask
    }

    /// Looks up the value stored under `key`.
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let index = Self::index_of(inner.global_depth, key);
        inner.buckets[inner.dir[index]].find(key).cloned()
    }

    /// Removes the entry for `key`. Returns whether anything was removed.
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let index = Self::index_of(inner.global_depth, key);
        let bucket = inner.dir[index];
        inner.buckets[bucket].remove(key)
    }

    /// Inserts `value` under `key`, overwriting any previous value.
    /// Splits buckets (and doubles the directory) as many times as needed.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();

        loop {
            let index = Self::index_of(inner.global_depth, &key);
            let target = inner.dir[index];
            let capacity = self.bucket_size;
            if inner.buckets[target].insert(key.clone(), value.clone(), capacity) {
                return;
            }

            // Bucket is full: split it.
            if inner.buckets[target].depth == inner.global_depth {
                // Double the directory; each old slot replicates its reference.
                let old_len = inner.dir.len();
                for i in 0..old_len {
                    let b = inner.dir[i];
                    inner.dir.push(b);
                }
                inner.global_depth += 1;
            }

            inner.buckets[target].depth += 1;
            let local_depth = inner.buckets[target].depth;

            let sibling = inner.buckets.len();
            inner.buckets.push(Bucket::new(local_depth));
            inner.num_buckets += 1;

            // Rehash: an item stays if bit (local_depth - 1) of its hash is
            // clear, moves to the sibling otherwise.
            let high_bit = 1usize << (local_depth - 1);
            let items = mem::take(&mut inner.buckets[target].items);
            let (stay, moved): (Vec<_>, Vec<_>) = items
                .into_iter()
                .partition(|(k, _)| Self::hash_key(k) & high_bit == 0);
            inner.buckets[target].items = stay;
            inner.buckets[sibling].items = moved;

            // Redirect every directory slot that points at the old bucket and
            // has the distinguishing bit set.
            for i in 0..inner.dir.len() {
                if inner.dir[i] == target && (i >> (local_depth - 1)) & 1 == 1 {
                    inner.dir[i] = sibling;
                }
            }
        }
    }

    /// Current global depth of the directory.
    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    /// Local depth of the bucket behind directory slot `dir_index`.
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].depth
    }

    /// Number of distinct buckets.
    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets
    }

    /// Number of directory entries (2^global_depth).
    pub fn dir_size(&self) -> usize {
        self.inner.lock().dir.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_find() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(4);

        table.insert(1, 10);
        table.insert(2, 20);
        table.insert(3, 30);

        assert_eq!(table.find(&1), Some(10));
        assert_eq!(table.find(&2), Some(20));
        assert_eq!(table.find(&3), Some(30));
        assert_eq!(table.find(&4), None);
    }

    #[test]
    fn test_insert_overwrites() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(4);

        table.insert(1, 10);
        table.insert(1, 11);

        assert_eq!(table.find(&1), Some(11));
    }

    #[test]
    fn test_remove() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(4);

        table.insert(1, 10);
        assert!(table.remove(&1));
        assert!(!table.remove(&1));
        assert_eq!(table.find(&1), None);
    }

    #[test]
    fn test_split_keeps_items_reachable() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);

        for i in 0..64 {
            table.insert(i, i * 100);
        }

        for i in 0..64 {
            assert_eq!(table.find(&i), Some(i * 100), "key {} lost", i);
        }

        // 64 items with bucket capacity 2 force at least 32 buckets.
        assert!(table.num_buckets() >= 32);
        assert!(table.global_depth() >= 5);
    }

    #[test]
    fn test_directory_invariants() {
        let table: ExtendibleHashTable<u32, u32> = ExtendibleHashTable::new(2);

        for i in 0..128 {
            table.insert(i, i);
        }

        let global = table.global_depth();
        assert_eq!(table.dir_size(), 1 << global);
        for i in 0..table.dir_size() {
            assert!(table.local_depth(i) <= global);
        }
    }
}
