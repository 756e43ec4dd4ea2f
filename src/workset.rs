//! Bounded in-memory working set used during run generation.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Fixed-capacity set of `p` record slots with heap-indexed min extraction.
///
/// Extraction order matches a linear scan of the slot array: the smallest
/// resident value wins, ties broken by the lowest slot index. New records
/// always occupy the lowest free slot, which keeps the tie-break
/// deterministic across refills. Both operations cost O(log p) instead of
/// the scan's O(p).
pub struct WorkingSet {
    /// Resident records keyed by (value, slot index).
    records: BinaryHeap<Reverse<(i64, usize)>>,
    /// Slots currently holding no record.
    free: BinaryHeap<Reverse<usize>>,
    capacity: usize,
}

impl WorkingSet {
    pub fn new(capacity: usize) -> Self {
        WorkingSet {
            records: BinaryHeap::with_capacity(capacity),
            free: BinaryHeap::from_iter((0..capacity).map(Reverse)),
            capacity,
        }
    }

    /// Places a record into the lowest free slot.
    ///
    /// # Panics
    /// Panics if the working set is full; callers check [`WorkingSet::is_full`]
    /// before reading more input.
    pub fn push(&mut self, value: i64) {
        let Reverse(slot) = self.free.pop().expect("working set overflow");
        self.records.push(Reverse((value, slot)));
    }

    /// Removes and returns the smallest resident record, freeing its slot.
    pub fn pop_min(&mut self) -> Option<i64> {
        let Reverse((value, slot)) = self.records.pop()?;
        self.free.push(Reverse(slot));
        Some(value)
    }

    /// Smallest resident record without removing it.
    pub fn peek_min(&self) -> Option<i64> {
        self.records.peek().map(|Reverse((value, _))| *value)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use super::WorkingSet;

    #[rstest]
    #[case(vec![5, 3, 8], vec![3, 5, 8])]
    #[case(vec![1, 1, 1], vec![1, 1, 1])]
    #[case(vec![-2, 7, 0, -9], vec![-9, -2, 0, 7])]
    fn test_pop_order(#[case] input: Vec<i64>, #[case] expected: Vec<i64>) {
        let mut ws = WorkingSet::new(input.len());
        for value in input {
            ws.push(value);
        }

        let mut drained = Vec::new();
        while let Some(value) = ws.pop_min() {
            drained.push(value);
        }
        assert_eq!(drained, expected);
    }

    #[test]
    fn test_capacity_tracking() {
        let mut ws = WorkingSet::new(2);
        assert!(ws.is_empty());
        assert!(!ws.is_full());

        ws.push(10);
        ws.push(20);
        assert!(ws.is_full());
        assert_eq!(ws.len(), 2);
        assert_eq!(ws.capacity(), 2);

        assert_eq!(ws.pop_min(), Some(10));
        assert!(!ws.is_full());
        assert_eq!(ws.peek_min(), Some(20));
    }

    #[test]
    fn test_slots_are_recycled() {
        let mut ws = WorkingSet::new(2);
        ws.push(5);
        ws.push(3);

        // Interleave pops and pushes the way run generation does.
        assert_eq!(ws.pop_min(), Some(3));
        ws.push(1);
        assert_eq!(ws.pop_min(), Some(1));
        ws.push(9);
        assert_eq!(ws.pop_min(), Some(5));
        assert_eq!(ws.pop_min(), Some(9));
        assert_eq!(ws.pop_min(), None);
    }

    #[test]
    #[should_panic(expected = "working set overflow")]
    fn test_push_past_capacity_panics() {
        let mut ws = WorkingSet::new(1);
        ws.push(1);
        ws.push(2);
    }
}
