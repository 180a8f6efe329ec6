use std::cmp::Ordering;

/// Total order over fixed-width index keys.
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Compares keys as little-endian u64 values.
pub struct IntegerComparator;

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        if a.len() < 8 || b.len() < 8 {
            return a.len().cmp(&b.len());
        }

        let a_val = u64::from_le_bytes(a[..8].try_into().unwrap());
        let b_val = u64::from_le_bytes(b[..8].try_into().unwrap());

        a_val.cmp(&b_val)
    }
}

/// Compares keys as raw byte strings.
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}
