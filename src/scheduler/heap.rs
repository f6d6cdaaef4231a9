//! Key-indexed binary min-heap for the Guaranteed queue
//!
//! Reservation laxity changes every time a reservation runs, and a
//! reservation must leave the queue the moment its thread blocks, so the
//! heap supports update and delete *by handle* in O(log n). A side table
//! indexed by the handle's slot records each entry's heap position.
//!
//! ## Ordering
//!
//! Entries are ordered by [`LaxityKey`]: laxity first, then admission
//! sequence, so reservations with equal laxity dispatch in admission order.

use alloc::vec::Vec;

use crate::time::Time;

/// Handle that can be stored in a [`LaxityHeap`]
pub trait HeapHandle: Copy + Eq {
    /// Dense index used for the position table
    fn slot(self) -> usize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct LaxityKey {
    pub laxity: Time,
    pub sequence: u64,
}

impl LaxityKey {
    pub const fn new(laxity: Time, sequence: u64) -> Self {
        Self { laxity, sequence }
    }
}

#[derive(Clone, Copy)]
struct Entry<H> {
    handle: H,
    key: LaxityKey,
}

pub struct LaxityHeap<H> {
    entries: Vec<Entry<H>>,
    positions: Vec<Option<usize>>,
}

impl<H: HeapHandle> LaxityHeap<H> {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut positions = Vec::with_capacity(capacity);
        positions.resize(capacity, None);
        Self {
            entries: Vec::with_capacity(capacity),
            positions,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, handle: H) -> Option<usize> {
        let pos = (*self.positions.get(handle.slot())?)?;
        (self.entries[pos].handle == handle).then_some(pos)
    }

    pub fn contains(&self, handle: H) -> bool {
        self.position(handle).is_some()
    }

    pub fn peek_min(&self) -> Option<(H, LaxityKey)> {
        self.entries.first().map(|entry| (entry.handle, entry.key))
    }

    pub fn insert(&mut self, handle: H, key: LaxityKey) {
        let slot = handle.slot();
        if slot >= self.positions.len() {
            self.positions.resize(slot + 1, None);
        }
        assert!(
            self.positions[slot].is_none(),
            "heap handle inserted twice (slot {})",
            slot
        );

        let pos = self.entries.len();
        self.entries.push(Entry { handle, key });
        self.positions[slot] = Some(pos);
        self.sift_up(pos);
    }

    /// Change the key of an entry. Returns `false` if `handle` is not queued.
    pub fn update(&mut self, handle: H, key: LaxityKey) -> bool {
        let Some(pos) = self.position(handle) else {
            return false;
        };
        let old = self.entries[pos].key;
        self.entries[pos].key = key;
        if key < old {
            self.sift_up(pos);
        } else {
            self.sift_down(pos);
        }
        true
    }

    pub fn remove(&mut self, handle: H) -> Option<LaxityKey> {
        let pos = self.position(handle)?;
        let last = self.entries.len() - 1;
        self.swap(pos, last);
        let Some(removed) = self.entries.pop() else {
            unreachable!()
        };
        self.positions[handle.slot()] = None;

        if pos < self.entries.len() {
            // The moved entry may belong either above or below `pos`.
            self.sift_up(pos);
            self.sift_down(pos);
        }
        Some(removed.key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, LaxityKey)> + '_ {
        self.entries.iter().map(|entry| (entry.handle, entry.key))
    }

    /// Every parent orders at or before its children
    pub fn is_heap_ordered(&self) -> bool {
        (1..self.entries.len()).all(|i| self.entries[(i - 1) / 2].key <= self.entries[i].key)
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.entries.swap(a, b);
        self.positions[self.entries[a].handle.slot()] = Some(a);
        self.positions[self.entries[b].handle.slot()] = Some(b);
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.entries[parent].key <= self.entries[pos].key {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.entries.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.entries[right].key < self.entries[left].key {
                right
            } else {
                left
            };
            if self.entries[pos].key <= self.entries[child].key {
                break;
            }
            self.swap(pos, child);
            pos = child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    struct H(usize);

    impl HeapHandle for H {
        fn slot(self) -> usize {
            self.0
        }
    }

    /// xorshift64*, deterministic across runs
    struct Rng(u64);

    impl Rng {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 >> 12;
            self.0 ^= self.0 << 25;
            self.0 ^= self.0 >> 27;
            self.0.wrapping_mul(0x2545_f491_4f6c_dd1d)
        }

        fn below(&mut self, n: u64) -> u64 {
            self.next() % n
        }
    }

    #[test]
    fn test_pop_order_with_sequence_tiebreak() {
        let mut heap = LaxityHeap::with_capacity(4);
        heap.insert(H(0), LaxityKey::new(5, 0));
        heap.insert(H(1), LaxityKey::new(-5, 1));
        heap.insert(H(2), LaxityKey::new(5, 2));
        heap.insert(H(3), LaxityKey::new(5, 1));

        let order: Vec<usize> = core::iter::from_fn(|| {
            let (handle, _) = heap.peek_min()?;
            heap.remove(handle);
            Some(handle.0)
        })
        .collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_update_and_remove_by_handle() {
        let mut heap = LaxityHeap::with_capacity(3);
        heap.insert(H(0), LaxityKey::new(10, 0));
        heap.insert(H(1), LaxityKey::new(20, 1));
        heap.insert(H(2), LaxityKey::new(30, 2));

        assert!(heap.update(H(2), LaxityKey::new(1, 2)));
        assert_eq!(heap.peek_min().map(|(h, _)| h), Some(H(2)));

        assert_eq!(heap.remove(H(2)), Some(LaxityKey::new(1, 2)));
        assert!(!heap.contains(H(2)));
        assert!(!heap.update(H(2), LaxityKey::new(0, 0)));
        assert_eq!(heap.peek_min().map(|(h, _)| h), Some(H(0)));
        assert!(heap.iter().any(|entry| entry == (H(1), LaxityKey::new(20, 1))));
    }

    #[test]
    fn test_random_operations_keep_heap_order() {
        const SLOTS: usize = 64;
        let mut rng = Rng(0x9e37_79b9_7f4a_7c15);
        let mut heap = LaxityHeap::with_capacity(SLOTS);
        let mut model: Vec<Option<LaxityKey>> = vec![None; SLOTS];
        let mut sequence = 0u64;

        for _ in 0..5_000 {
            let slot = rng.below(SLOTS as u64) as usize;
            let laxity = rng.below(200) as Time - 100;
            match (rng.below(3), model[slot]) {
                (0, None) | (1, None) => {
                    let key = LaxityKey::new(laxity, sequence);
                    sequence += 1;
                    heap.insert(H(slot), key);
                    model[slot] = Some(key);
                }
                (0, Some(old)) => {
                    let key = LaxityKey::new(laxity, old.sequence);
                    assert!(heap.update(H(slot), key));
                    model[slot] = Some(key);
                }
                (_, Some(old)) => {
                    assert_eq!(heap.remove(H(slot)), Some(old));
                    model[slot] = None;
                }
                (_, None) => assert_eq!(heap.remove(H(slot)), None),
            }

            assert!(heap.is_heap_ordered());
            assert_eq!(heap.len(), model.iter().flatten().count());
            let expected_min = model.iter().flatten().min().copied();
            assert_eq!(heap.peek_min().map(|(_, k)| k), expected_min);
        }
    }
}
