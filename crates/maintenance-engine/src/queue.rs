use std::cmp::Ordering;

/// A priority-queue key for one READY action. Ordering (for a max-heap):
/// fast-track beats non-fast-track; within that, higher `priority` first;
/// ties broken by earliest `id`. Mirrors the original's `SharedPtrComparer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueKey {
    pub fast_track: bool,
    pub priority: i32,
    pub id: u64,
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fast_track
            .cmp(&other.fast_track)
            .then_with(|| self.priority.cmp(&other.priority))
            // A `BinaryHeap` is a max-heap; reverse the id comparison so that,
            // among equal fast_track/priority, the *smallest* id surfaces first.
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    #[test]
    fn fast_track_outranks_priority() {
        let mut heap = BinaryHeap::new();
        heap.push(QueueKey { fast_track: false, priority: 3, id: 1 });
        heap.push(QueueKey { fast_track: true, priority: 0, id: 2 });
        assert_eq!(heap.pop().unwrap().id, 2);
    }

    #[test]
    fn higher_priority_before_lower() {
        let mut heap = BinaryHeap::new();
        heap.push(QueueKey { fast_track: false, priority: 1, id: 1 });
        heap.push(QueueKey { fast_track: false, priority: 2, id: 2 });
        assert_eq!(heap.pop().unwrap().id, 2);
    }

    #[test]
    fn ties_broken_by_earliest_id() {
        let mut heap = BinaryHeap::new();
        heap.push(QueueKey { fast_track: false, priority: 1, id: 5 });
        heap.push(QueueKey { fast_track: false, priority: 1, id: 2 });
        assert_eq!(heap.pop().unwrap().id, 2);
    }
}
