//! Generational slot arena
//!
//! Threads, activities and reservations live in fixed-capacity arenas and
//! refer to each other by key. A key names a slot *and* the generation the
//! slot had when the value was inserted, so a key that outlives its value
//! simply stops resolving instead of aliasing whatever reuses the slot.
//! Keys are therefore the scheduler's weak references.
//!
//! Capacity is reserved up front; `insert` never grows the backing vector
//! past the configured limit, so allocation happens only at construction.

use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};

/// Raw slot key
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    #[inline]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Typed handle stored in an [`Arena`]
pub trait ArenaId: Copy + Eq {
    fn from_key(key: Key) -> Self;
    fn key(self) -> Key;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaError {
    /// Every slot up to the configured capacity is occupied
    Full,
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

pub struct Arena<I, T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
    capacity: usize,
    _id: PhantomData<fn() -> I>,
}

impl<I: ArenaId, T> Arena<I, T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
            capacity,
            _id: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len >= self.capacity
    }

    pub fn insert(&mut self, value: T) -> Result<I, ArenaError> {
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match *slot {
                Slot::Vacant {
                    generation,
                    next_free,
                } => (generation, next_free),
                Slot::Occupied { .. } => panic!("arena free list points at occupied slot {}", index),
            };
            *slot = Slot::Occupied { generation, value };
            self.free_head = next_free;
            self.len += 1;
            return Ok(I::from_key(Key { index, generation }));
        }

        if self.slots.len() >= self.capacity {
            return Err(ArenaError::Full);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            generation: 0,
            value,
        });
        self.len += 1;
        Ok(I::from_key(Key {
            index,
            generation: 0,
        }))
    }

    /// Remove the value; the slot's generation is bumped so outstanding
    /// copies of `id` no longer resolve.
    pub fn remove(&mut self, id: I) -> Option<T> {
        let key = id.key();
        let slot = self.slots.get_mut(key.index())?;
        match slot {
            Slot::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }

        let vacant = Slot::Vacant {
            generation: key.generation.wrapping_add(1),
            next_free: self.free_head,
        };
        let Slot::Occupied { value, .. } = core::mem::replace(slot, vacant) else {
            unreachable!()
        };
        self.free_head = Some(key.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, id: I) -> Option<&T> {
        let key = id.key();
        match self.slots.get(key.index())? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        let key = id.key();
        match self.slots.get_mut(key.index())? {
            Slot::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    #[inline]
    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { generation, value } => Some((
                    I::from_key(Key {
                        index: index as u32,
                        generation: *generation,
                    }),
                    value,
                )),
                Slot::Vacant { .. } => None,
            })
    }

    pub fn ids(&self) -> impl Iterator<Item = I> + '_ {
        self.iter().map(|(id, _)| id)
    }
}

impl<I: ArenaId, T> Index<I> for Arena<I, T> {
    type Output = T;

    fn index(&self, id: I) -> &T {
        match self.get(id) {
            Some(value) => value,
            None => panic!("stale arena key {:?}", id.key()),
        }
    }
}

impl<I: ArenaId, T> IndexMut<I> for Arena<I, T> {
    fn index_mut(&mut self, id: I) -> &mut T {
        match self.get_mut(id) {
            Some(value) => value,
            None => panic!("stale arena key {:?}", id.key()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    struct Id(Key);

    impl ArenaId for Id {
        fn from_key(key: Key) -> Self {
            Id(key)
        }
        fn key(self) -> Key {
            self.0
        }
    }

    #[test]
    fn test_insert_get_remove() {
        let mut arena: Arena<Id, &str> = Arena::with_capacity(4);
        let a = arena.insert("a").unwrap();
        let b = arena.insert("b").unwrap();
        assert_eq!(arena.len(), 2);
        assert_eq!(arena[a], "a");
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.get(a), None);
        assert_eq!(arena[b], "b");
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_stale_key_does_not_alias_reused_slot() {
        let mut arena: Arena<Id, u32> = Arena::with_capacity(1);
        let old = arena.insert(1).unwrap();
        arena.remove(old);
        let new = arena.insert(2).unwrap();

        assert_eq!(old.key().index(), new.key().index());
        assert_ne!(old, new);
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena[new], 2);
    }

    #[test]
    fn test_capacity_limit() {
        let mut arena: Arena<Id, u8> = Arena::with_capacity(2);
        arena.insert(0).unwrap();
        let last = arena.insert(1).unwrap();
        assert!(arena.is_full());
        assert_eq!(arena.insert(2), Err(ArenaError::Full));

        arena.remove(last);
        assert!(arena.insert(3).is_ok());
    }

    #[test]
    #[should_panic(expected = "stale arena key")]
    fn test_index_stale_key_panics() {
        let mut arena: Arena<Id, u8> = Arena::with_capacity(1);
        let id = arena.insert(0).unwrap();
        arena.remove(id);
        let _ = arena[id];
    }

    #[test]
    fn test_iter_skips_vacant() {
        let mut arena: Arena<Id, u8> = Arena::with_capacity(3);
        let a = arena.insert(10).unwrap();
        let b = arena.insert(20).unwrap();
        let c = arena.insert(30).unwrap();
        arena.remove(b);
        let seen: Vec<_> = arena.iter().map(|(id, v)| (id, *v)).collect();
        assert_eq!(seen, vec![(a, 10), (c, 30)]);
    }
}
