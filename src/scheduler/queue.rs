//! Index-linked circular lists
//!
//! The scheduler keeps threads, activities and reservations on several
//! queues at once (runnable ring, sleep queue, round-robin ring, idle list).
//! Each queue is a doubly linked circular list whose links live inside the
//! arena element itself, addressed by arena key instead of raw pointer.
//! Insert and remove are O(1) and never allocate.
//!
//! A tag type picks which link field of the element a list uses, so one
//! element can sit on several lists of different kinds. Membership in lists
//! of the same kind is exclusive: linking an already linked element panics.

use core::marker::PhantomData;

use super::arena::{Arena, ArenaId};
use crate::time::Time;

/// Neighbours of a linked element
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Link<I> {
    pub prev: I,
    pub next: I,
}

/// Selects the link field a [`List`] threads through
pub trait ListTag {
    type Id: ArenaId;
    type Node;

    fn link(node: &Self::Node) -> &Option<Link<Self::Id>>;
    fn link_mut(node: &mut Self::Node) -> &mut Option<Link<Self::Id>>;
}

type Nodes<T> = Arena<<T as ListTag>::Id, <T as ListTag>::Node>;

pub struct List<T: ListTag> {
    head: Option<T::Id>,
    len: usize,
    _tag: PhantomData<fn() -> T>,
}

impl<T: ListTag> Default for List<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ListTag> List<T> {
    pub const fn new() -> Self {
        Self {
            head: None,
            len: 0,
            _tag: PhantomData,
        }
    }

    #[inline]
    pub fn head(&self) -> Option<T::Id> {
        self.head
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn link(nodes: &Nodes<T>, id: T::Id) -> Link<T::Id> {
        match T::link(&nodes[id]) {
            Some(link) => *link,
            None => panic!("list element {:?} is not linked", id.key()),
        }
    }

    pub fn next(&self, nodes: &Nodes<T>, id: T::Id) -> T::Id {
        Self::link(nodes, id).next
    }

    pub fn prev(&self, nodes: &Nodes<T>, id: T::Id) -> T::Id {
        Self::link(nodes, id).prev
    }

    fn set_next(nodes: &mut Nodes<T>, id: T::Id, next: T::Id) {
        match T::link_mut(&mut nodes[id]) {
            Some(link) => link.next = next,
            None => panic!("list element {:?} is not linked", id.key()),
        }
    }

    fn set_prev(nodes: &mut Nodes<T>, id: T::Id, prev: T::Id) {
        match T::link_mut(&mut nodes[id]) {
            Some(link) => link.prev = prev,
            None => panic!("list element {:?} is not linked", id.key()),
        }
    }

    fn claim(nodes: &mut Nodes<T>, id: T::Id, link: Link<T::Id>) {
        let slot = T::link_mut(&mut nodes[id]);
        assert!(
            slot.is_none(),
            "list element {:?} is already linked",
            id.key()
        );
        *slot = Some(link);
    }

    /// Link `id` between `prev` and `next`, which must be adjacent
    fn splice(&mut self, nodes: &mut Nodes<T>, id: T::Id, prev: T::Id, next: T::Id) {
        Self::claim(nodes, id, Link { prev, next });
        Self::set_next(nodes, prev, id);
        Self::set_prev(nodes, next, id);
        self.len += 1;
    }

    fn push_first(&mut self, nodes: &mut Nodes<T>, id: T::Id) {
        Self::claim(nodes, id, Link { prev: id, next: id });
        self.head = Some(id);
        self.len = 1;
    }

    pub fn push_back(&mut self, nodes: &mut Nodes<T>, id: T::Id) {
        match self.head {
            None => self.push_first(nodes, id),
            Some(head) => {
                let tail = Self::link(nodes, head).prev;
                self.splice(nodes, id, tail, head);
            }
        }
    }

    /// Link `id` directly after `at`
    pub fn insert_after(&mut self, nodes: &mut Nodes<T>, at: T::Id, id: T::Id) {
        let next = Self::link(nodes, at).next;
        self.splice(nodes, id, at, next);
    }

    /// Link `id` directly before `at`; inserting before the head makes `id`
    /// the new head.
    pub fn insert_before(&mut self, nodes: &mut Nodes<T>, at: T::Id, id: T::Id) {
        let prev = Self::link(nodes, at).prev;
        self.splice(nodes, id, prev, at);
        if self.head == Some(at) {
            self.head = Some(id);
        }
    }

    pub fn remove(&mut self, nodes: &mut Nodes<T>, id: T::Id) {
        let link = Self::link(nodes, id);
        debug_assert!(self.len > 0, "remove from empty list");

        if self.len == 1 {
            assert!(self.head == Some(id), "element is linked on another list");
            self.head = None;
        } else {
            Self::set_next(nodes, link.prev, link.next);
            Self::set_prev(nodes, link.next, link.prev);
            if self.head == Some(id) {
                self.head = Some(link.next);
            }
        }

        *T::link_mut(&mut nodes[id]) = None;
        self.len -= 1;
    }

    pub fn pop_front(&mut self, nodes: &mut Nodes<T>) -> Option<T::Id> {
        let head = self.head?;
        self.remove(nodes, head);
        Some(head)
    }

    /// Make `id`, which must be on this list, the head.
    pub fn set_head(&mut self, id: T::Id) {
        debug_assert!(self.len > 0);
        self.head = Some(id);
    }

    /// Walk the list once from the head
    pub fn iter<'a>(&self, nodes: &'a Nodes<T>) -> Iter<'a, T> {
        Iter {
            nodes,
            cursor: self.head,
            remaining: self.len,
        }
    }

    /// Insert keeping the list sorted by `key`, equal keys in arrival order.
    ///
    /// Appending at the tail and prepending at the head are checked before
    /// falling back to a linear scan.
    pub fn insert_sorted<F>(&mut self, nodes: &mut Nodes<T>, id: T::Id, key: F)
    where
        F: Fn(&T::Node) -> Time,
    {
        let new_key = key(&nodes[id]);
        let Some(head) = self.head else {
            self.push_first(nodes, id);
            return;
        };

        let tail = Self::link(nodes, head).prev;
        if new_key >= key(&nodes[tail]) {
            self.splice(nodes, id, tail, head);
            return;
        }
        if new_key < key(&nodes[head]) {
            self.splice(nodes, id, tail, head);
            self.head = Some(id);
            return;
        }

        let mut cursor = Self::link(nodes, head).next;
        while key(&nodes[cursor]) <= new_key {
            cursor = Self::link(nodes, cursor).next;
        }
        self.insert_before(nodes, cursor, id);
    }
}

pub struct Iter<'a, T: ListTag> {
    nodes: &'a Nodes<T>,
    cursor: Option<T::Id>,
    remaining: usize,
}

impl<T: ListTag> Iterator for Iter<'_, T> {
    type Item = T::Id;

    fn next(&mut self) -> Option<T::Id> {
        if self.remaining == 0 {
            return None;
        }
        let id = self.cursor?;
        self.remaining -= 1;
        self.cursor = T::link(&self.nodes[id]).map(|link| link.next);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::arena::Key;
    use alloc::vec::Vec;

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

    struct Node {
        value: Time,
        link: Option<Link<Id>>,
    }

    struct Tag;

    impl ListTag for Tag {
        type Id = Id;
        type Node = Node;

        fn link(node: &Node) -> &Option<Link<Id>> {
            &node.link
        }
        fn link_mut(node: &mut Node) -> &mut Option<Link<Id>> {
            &mut node.link
        }
    }

    fn nodes(values: &[Time]) -> (Arena<Id, Node>, Vec<Id>) {
        let mut arena = Arena::with_capacity(values.len());
        let ids = values
            .iter()
            .map(|&value| arena.insert(Node { value, link: None }).unwrap())
            .collect();
        (arena, ids)
    }

    fn values(list: &List<Tag>, arena: &Arena<Id, Node>) -> Vec<Time> {
        list.iter(arena).map(|id| arena[id].value).collect()
    }

    fn assert_circular(list: &List<Tag>, arena: &Arena<Id, Node>) {
        let Some(head) = list.head() else {
            assert_eq!(list.len(), 0);
            return;
        };
        let mut cursor = head;
        for _ in 0..list.len() {
            let next = list.next(arena, cursor);
            assert_eq!(list.prev(arena, next), cursor);
            cursor = next;
        }
        assert_eq!(cursor, head, "ring does not close after len steps");
    }

    #[test]
    fn test_push_and_remove() {
        let (mut arena, ids) = nodes(&[1, 2, 3]);
        let mut list: List<Tag> = List::new();
        for &id in &ids {
            list.push_back(&mut arena, id);
        }
        assert_eq!(values(&list, &arena), vec![1, 2, 3]);
        assert_circular(&list, &arena);

        list.remove(&mut arena, ids[0]);
        assert_eq!(list.head(), Some(ids[1]));
        assert_eq!(values(&list, &arena), vec![2, 3]);
        assert!(arena[ids[0]].link.is_none());

        list.remove(&mut arena, ids[2]);
        list.remove(&mut arena, ids[1]);
        assert!(list.is_empty());
        assert_eq!(list.head(), None);
    }

    #[test]
    fn test_insert_after_head_runs_second() {
        let (mut arena, ids) = nodes(&[1, 2, 3, 9]);
        let mut list: List<Tag> = List::new();
        for &id in &ids[..3] {
            list.push_back(&mut arena, id);
        }
        list.insert_after(&mut arena, ids[0], ids[3]);
        assert_eq!(values(&list, &arena), vec![1, 9, 2, 3]);
        assert_circular(&list, &arena);
    }

    #[test]
    fn test_set_head_rotates_and_pop() {
        let (mut arena, ids) = nodes(&[1, 2, 3]);
        let mut list: List<Tag> = List::new();
        for &id in &ids {
            list.push_back(&mut arena, id);
        }
        let next = list.next(&arena, ids[0]);
        list.set_head(next);
        assert_eq!(list.head(), Some(ids[1]));
        assert_eq!(values(&list, &arena), vec![2, 3, 1]);
        assert_eq!(list.pop_front(&mut arena), Some(ids[1]));
        assert_eq!(values(&list, &arena), vec![3, 1]);
        assert_eq!(list.prev(&arena, ids[2]), ids[0]);
    }

    #[test]
    fn test_insert_sorted_is_stable() {
        let (mut arena, ids) = nodes(&[50, 10, 30, 30, 70, 5, 30]);
        let mut list: List<Tag> = List::new();
        for &id in &ids {
            list.insert_sorted(&mut arena, id, |node| node.value);
        }
        assert_eq!(values(&list, &arena), vec![5, 10, 30, 30, 30, 50, 70]);
        let thirties: Vec<Id> = list
            .iter(&arena)
            .filter(|&id| arena[id].value == 30)
            .collect();
        assert_eq!(thirties, vec![ids[2], ids[3], ids[6]]);
        assert_circular(&list, &arena);
    }

    #[test]
    #[should_panic(expected = "already linked")]
    fn test_double_link_panics() {
        let (mut arena, ids) = nodes(&[1]);
        let mut a: List<Tag> = List::new();
        let mut b: List<Tag> = List::new();
        a.push_back(&mut arena, ids[0]);
        b.push_back(&mut arena, ids[0]);
    }
}
