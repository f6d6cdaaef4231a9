//! Activities: the unit of round-robin fairness
//!
//! Every activity sits on the global round-robin ring from creation until
//! its last reference is dropped, even while it has nothing runnable, so
//! the ring cursor always has somewhere valid to point. References are held
//! by the creator (until `release_activity`), by each member thread, and by
//! each reservation handed over to it.

use super::arena::Arena;
use super::queue::{Link, List, ListTag};
use super::reservation::OwnerLink;
use super::thread::RunLink;
use super::types::{ActivityId, RefCount};
use crate::time::Time;

pub struct Activity {
    pub refs: RefCount,
    /// Member threads, runnable or not
    pub threads: usize,
    pub runnable: List<RunLink>,
    /// Reservations inherited from threads that left
    pub reservations: List<OwnerLink>,
    pub execution_time: Time,
    /// Creator reference dropped
    pub released: bool,
    pub(super) ring_link: Option<Link<ActivityId>>,
}

impl Activity {
    pub fn new() -> Self {
        Self {
            refs: RefCount::new(1),
            threads: 0,
            runnable: List::new(),
            reservations: List::new(),
            execution_time: 0,
            released: false,
            ring_link: None,
        }
    }

    #[inline]
    pub fn has_runnable(&self) -> bool {
        !self.runnable.is_empty()
    }
}

/// Membership in the global round-robin ring
pub struct RingLink;

impl ListTag for RingLink {
    type Id = ActivityId;
    type Node = Activity;

    fn link(node: &Activity) -> &Option<Link<ActivityId>> {
        &node.ring_link
    }

    fn link_mut(node: &mut Activity) -> &mut Option<Link<ActivityId>> {
        &mut node.ring_link
    }
}

pub type ActivityTable = Arena<ActivityId, Activity>;
