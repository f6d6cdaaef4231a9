//! Scheduler view of a thread

use super::arena::Arena;
use super::queue::{Link, ListTag};
use super::types::{ActivityId, ConstraintRequest, ReservationId, ThreadId, ThreadState};
use crate::time::{Time, TIME_INFINITE};

/// Constraint requested with `begin_delayed_constraint`, admitted when the
/// thread next wakes
#[derive(Clone, Copy, Debug)]
pub struct PendingConstraint {
    /// Preallocated so admission at wake time cannot fail
    pub reservation: ReservationId,
    pub request: ConstraintRequest,
}

pub struct Thread {
    /// `None` only after cleanup of a thread that is still running
    pub activity: Option<ActivityId>,
    pub state: ThreadState,
    pub execution_time: Time,
    /// Innermost active constraint; outer ones chain through
    /// `Reservation::surrounding`
    pub constraint: Option<ReservationId>,
    pub depth: usize,
    pub free_reservation: Option<ReservationId>,
    pub pending: Option<PendingConstraint>,
    pub sleep_start: Time,
    pub wake_time: Time,
    /// Set exactly while the thread is running
    pub active_processor: Option<usize>,
    pub(super) run_link: Option<Link<ThreadId>>,
    pub(super) sleep_link: Option<Link<ThreadId>>,
}

impl Thread {
    pub fn new(activity: ActivityId) -> Self {
        Self {
            activity: Some(activity),
            state: ThreadState::Unstarted,
            execution_time: 0,
            constraint: None,
            depth: 0,
            free_reservation: None,
            pending: None,
            sleep_start: 0,
            wake_time: TIME_INFINITE,
            active_processor: None,
            run_link: None,
            sleep_link: None,
        }
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.state == ThreadState::Runnable
    }

    #[inline]
    pub fn on_sleep_queue(&self) -> bool {
        self.sleep_link.is_some()
    }
}

/// Membership in an activity's runnable ring
pub struct RunLink;

impl ListTag for RunLink {
    type Id = ThreadId;
    type Node = Thread;

    fn link(node: &Thread) -> &Option<Link<ThreadId>> {
        &node.run_link
    }

    fn link_mut(node: &mut Thread) -> &mut Option<Link<ThreadId>> {
        &mut node.run_link
    }
}

/// Membership in the global sleep queue
pub struct SleepLink;

impl ListTag for SleepLink {
    type Id = ThreadId;
    type Node = Thread;

    fn link(node: &Thread) -> &Option<Link<ThreadId>> {
        &node.sleep_link
    }

    fn link_mut(node: &mut Thread) -> &mut Option<Link<ThreadId>> {
        &mut node.sleep_link
    }
}

pub type ThreadTable = Arena<ThreadId, Thread>;
