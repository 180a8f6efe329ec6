use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{FrameId, Timestamp};

/// Per-frame replacement state: up to K access timestamps, oldest first.
#[derive(Debug, Default)]
struct LruKNode {
    history: VecDeque<Timestamp>,
    is_evictable: bool,
}

struct ReplacerInner {
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: Timestamp,
    curr_size: usize,
}

/// LRU-K replacement policy.
///
/// Frames with fewer than K recorded accesses are preferred victims,
/// tie-broken by their first recorded access (plain LRU on that subset).
/// Once every evictable frame has K accesses, the victim is the frame whose
/// Kth-most-recent access is oldest.
///
/// A frame is only a candidate while its evictable bit is set; `size()`
/// counts exactly those frames. One internal mutex makes all operations
/// linearizable.
pub struct LruKReplacer {
    k: usize,
    replacer_size: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    /// Creates a replacer tracking up to `replacer_size` frames with history
    /// depth `k`.
    pub fn new(k: usize, replacer_size: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            replacer_size,
            inner: Mutex::new(ReplacerInner {
                node_store: HashMap::new(),
                current_timestamp: 0,
                curr_size: 0,
            }),
        }
    }

    /// Picks and removes a victim frame, or None if nothing is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.curr_size == 0 {
            return None;
        }

        let mut victim: Option<FrameId> = None;
        let mut victim_in_history = false;
        let mut victim_ts: Timestamp = Timestamp::MAX;

        for (&frame_id, node) in inner.node_store.iter() {
            if !node.is_evictable {
                continue;
            }
            // With fewer than k samples nothing has been trimmed, so the
            // front is the first access; with k samples it is the
            // kth-most-recent one. Either way, smaller is a better victim
            // within its class.
            let in_history = node.history.len() < self.k;
            let ts = *node.history.front().unwrap();

            let better = match (victim_in_history, in_history) {
                (true, false) => false,
                (false, true) => true,
                _ => ts < victim_ts,
            };
            if victim.is_none() || better {
                victim = Some(frame_id);
                victim_in_history = in_history;
                victim_ts = ts;
            }
        }

        if let Some(frame_id) = victim {
            inner.node_store.remove(&frame_id);
            inner.curr_size -= 1;
        }
        victim
    }

    /// Appends a monotonic timestamp to the frame's history.
    ///
    /// Panics if `frame_id` is outside the tracked range.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.replacer_size,
            "frame id {} out of range",
            frame_id
        );

        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let timestamp = inner.current_timestamp;
        let k = self.k;

        let node = inner.node_store.entry(frame_id).or_default();
        node.history.push_back(timestamp);
        while node.history.len() > k {
            node.history.pop_front();
        }
    }

    /// Toggles the frame's evictable bit. Frames that have never been
    /// accessed are ignored.
    ///
    /// Panics if `frame_id` is outside the tracked range.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        assert!(
            frame_id.as_usize() < self.replacer_size,
            "frame id {} out of range",
            frame_id
        );

        let mut inner = self.inner.lock();
        let Some(node) = inner.node_store.get_mut(&frame_id) else {
            return;
        };
        if node.is_evictable == evictable {
            return;
        }
        node.is_evictable = evictable;
        if evictable {
            inner.curr_size += 1;
        } else {
            inner.curr_size -= 1;
        }
    }

    /// Purges all state for the frame. Unknown frames are ignored.
    ///
    /// Panics if `frame_id` is outside the tracked range, or if the frame is
    /// known but not evictable.
    pub fn remove(&self, frame_id: FrameId) {
        assert!(
            frame_id.as_usize() < self.replacer_size,
            "frame id {} out of range",
            frame_id
        );

        let mut inner = self.inner.lock();
        let Some(node) = inner.node_store.get(&frame_id) else {
            return;
        };
        assert!(
            node.is_evictable,
            "remove called on non-evictable frame {}",
            frame_id
        );
        inner.node_store.remove(&frame_id);
        inner.curr_size -= 1;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }

    pub fn k(&self) -> usize {
        self.k
    }
}
