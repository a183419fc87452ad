use rustc_hash::FxHashMap;
use tokio::time::Instant;
use crate::timers::TimerId;

struct HeapEntry<V> {
    deadline: Instant,
    timer_id: TimerId,
    payload: V,
}

/// A binary min-heap of timers ordered by deadline, with a back-pointer from timer id to array
///  index so that an arbitrary timer can be removed in O(log n).
///
/// Mutating operations report whether the heap's top changed: that is when a sleeper waiting for
///  the earliest deadline needs to be woken up.
pub struct TimerHeap<V> {
    entries: Vec<HeapEntry<V>>,
    positions: FxHashMap<TimerId, usize>,
}

impl<V> TimerHeap<V> {
    pub fn new() -> TimerHeap<V> {
        TimerHeap {
            entries: Vec::new(),
            positions: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, timer_id: TimerId) -> bool {
        self.positions.contains_key(&timer_id)
    }

    pub fn peek_deadline(&self) -> Option<Instant> {
        self.entries.first()
            .map(|e| e.deadline)
    }

    /// Adds a timer, replacing the entry if the timer is already in the heap
    pub fn insert(&mut self, timer_id: TimerId, deadline: Instant, payload: V) -> bool {
        let top_before = self.top_key();

        if let Some(&idx) = self.positions.get(&timer_id) {
            let entry = &mut self.entries[idx];
            entry.deadline = deadline;
            entry.payload = payload;
            self.restore(idx);
        }
        else {
            self.entries.push(HeapEntry { deadline, timer_id, payload });
            let idx = self.entries.len() - 1;
            self.positions.insert(timer_id, idx);
            self.sift_up(idx);
        }

        self.top_key() != top_before
    }

    /// Removing a timer that is not in the heap is a no-op
    pub fn remove(&mut self, timer_id: TimerId) -> bool {
        let Some(idx) = self.positions.get(&timer_id).copied() else {
            return false;
        };

        let top_before = self.top_key();
        self.remove_at(idx);
        self.top_key() != top_before
    }

    /// Removes and returns all timers with a deadline at or before `now`, earliest first
    pub fn pop_expired(&mut self, now: Instant) -> Vec<(TimerId, V)> {
        let mut result = Vec::new();
        while let Some(first) = self.entries.first() {
            if first.deadline > now {
                break;
            }
            let entry = self.remove_at(0);
            result.push((entry.timer_id, entry.payload));
        }
        result
    }

    fn top_key(&self) -> Option<(TimerId, Instant)> {
        self.entries.first()
            .map(|e| (e.timer_id, e.deadline))
    }

    fn remove_at(&mut self, idx: usize) -> HeapEntry<V> {
        let last = self.entries.len() - 1;
        self.swap(idx, last);

        let Some(entry) = self.entries.pop() else {
            unreachable!("idx is a valid index, so the heap is not empty");
        };
        self.positions.remove(&entry.timer_id);

        if idx < self.entries.len() {
            self.restore(idx);
        }
        entry
    }

    fn restore(&mut self, idx: usize) {
        let idx = self.sift_up(idx);
        self.sift_down(idx);
    }

    fn sift_up(&mut self, mut idx: usize) -> usize {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.entries[parent].deadline <= self.entries[idx].deadline {
                break;
            }
            self.swap(idx, parent);
            idx = parent;
        }
        idx
    }

    fn sift_down(&mut self, mut idx: usize) {
        loop {
            let left = 2*idx + 1;
            let right = left + 1;

            let mut smallest = idx;
            if left < self.entries.len() && self.entries[left].deadline < self.entries[smallest].deadline {
                smallest = left;
            }
            if right < self.entries.len() && self.entries[right].deadline < self.entries[smallest].deadline {
                smallest = right;
            }
            if smallest == idx {
                return;
            }
            self.swap(idx, smallest);
            idx = smallest;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.entries.swap(a, b);
        self.positions.insert(self.entries[a].timer_id, a);
        self.positions.insert(self.entries[b].timer_id, b);
    }

    #[cfg(test)]
    fn assert_heap_invariant(&self) {
        for idx in 1..self.entries.len() {
            let parent = (idx - 1) / 2;
            assert!(self.entries[parent].deadline <= self.entries[idx].deadline);
        }
        assert_eq!(self.positions.len(), self.entries.len());
        for (idx, e) in self.entries.iter().enumerate() {
            assert_eq!(self.positions.get(&e.timer_id), Some(&idx));
        }
    }
}

impl<V> Default for TimerHeap<V> {
    fn default() -> Self {
        TimerHeap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use rstest::rstest;

    fn id(n: u64) -> TimerId {
        TimerId::from_raw(n)
    }

    fn at(base: Instant, millis: u64) -> Instant {
        base + Duration::from_millis(millis)
    }

    #[test]
    fn test_insert_reports_top_change() {
        let base = Instant::now();
        let mut heap = TimerHeap::new();

        assert!(heap.insert(id(1), at(base, 50), "a"));
        assert!(!heap.insert(id(2), at(base, 70), "b"));
        assert!(heap.insert(id(3), at(base, 10), "c"));
        assert!(!heap.insert(id(4), at(base, 10), "d"));

        assert_eq!(heap.peek_deadline(), Some(at(base, 10)));
        heap.assert_heap_invariant();
    }

    #[rstest]
    #[case::top(1, true)]
    #[case::middle(3, false)]
    #[case::leaf(5, false)]
    #[case::absent(99, false)]
    fn test_remove(#[case] removed: u64, #[case] top_changed: bool) {
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        for n in 1..=6 {
            heap.insert(id(n), at(base, n * 10), n);
        }

        assert_eq!(heap.remove(id(removed)), top_changed);
        heap.assert_heap_invariant();
        assert!(!heap.contains(id(removed)));

        let expected = (1..=6)
            .filter(|&n| n != removed)
            .collect::<Vec<_>>();
        let all = heap.pop_expired(at(base, 1000))
            .into_iter()
            .map(|(_, v)| v)
            .collect::<Vec<_>>();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_reinsert_moves_timer() {
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        heap.insert(id(1), at(base, 10), 1);
        heap.insert(id(2), at(base, 20), 2);
        heap.insert(id(3), at(base, 30), 3);

        assert!(heap.insert(id(1), at(base, 40), 1));
        heap.assert_heap_invariant();
        assert_eq!(heap.len(), 3);
        assert_eq!(heap.peek_deadline(), Some(at(base, 20)));

        assert!(heap.insert(id(3), at(base, 5), 3));
        heap.assert_heap_invariant();
        assert_eq!(heap.peek_deadline(), Some(at(base, 5)));
    }

    #[test]
    fn test_pop_expired() {
        let base = Instant::now();
        let mut heap = TimerHeap::new();
        for (n, millis) in [(1, 40), (2, 10), (3, 30), (4, 20), (5, 50)] {
            heap.insert(id(n), at(base, millis), n);
        }

        let expired = heap.pop_expired(at(base, 30));
        assert_eq!(expired, vec![(id(2), 2), (id(4), 4), (id(3), 3)]);
        heap.assert_heap_invariant();

        assert!(heap.pop_expired(at(base, 35)).is_empty());
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.peek_deadline(), Some(at(base, 40)));
    }

    #[test]
    fn test_many_random_operations_keep_invariant() {
        let base = Instant::now();
        let mut heap = TimerHeap::new();

        // deterministic pseudo random sequence
        let mut x: u64 = 12345;
        for _ in 0..1000 {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let timer = id((x >> 33) % 50);
            if (x >> 20) % 3 == 0 {
                heap.remove(timer);
            }
            else {
                heap.insert(timer, at(base, (x >> 40) % 10_000), ());
            }
            heap.assert_heap_invariant();
        }
    }
}
