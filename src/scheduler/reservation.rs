//! Reservations and the reservation queues
//!
//! A reservation is an admitted one-shot constraint: `estimate` nanoseconds
//! of CPU to be delivered between `start` and `deadline`. It sits on at most
//! one queue, named by its [`QueueTag`]:
//!
//! - `Idle`: start time still in the future; on the start-ordered idle list.
//! - `Guaranteed`: eligible now; in the laxity heap while it has a runnable
//!   beneficiary, off-heap (but still tagged) otherwise.
//! - `None`: exhausted, missed, suspended under a nested constraint, or free.
//!
//! ## Reference counting
//!
//! Strong holders are the owner (thread constraint stack, activity list, or
//! a pending delayed admission) and the queue tag. The object is recycled
//! when the last holder lets go, always after it has been unlinked from
//! every queue. A recycled reservation goes back to its thread's one-entry
//! cache under a fresh key, so stale task handles never resolve. Cached
//! reservations occupy pool slots, so a thread that finds the pool full
//! takes one from another thread's cache.

use super::arena::Arena;
use super::heap::LaxityKey;
use super::policy::SchedPolicy;
use super::queue::{Link, List, ListTag};
use super::table::SchedState;
use super::types::{ActivityId, Owner, QueueTag, RefCount, ReservationId, ThreadId, ThreadState};
use crate::error::SchedError;
use crate::time::{ns_to_us, Time, TIME_INFINITE};

pub struct Reservation {
    pub start: Time,
    pub deadline: Time,
    /// Remaining estimate; may go negative once overrun
    pub estimate: Time,
    pub initial_estimate: Time,
    pub owner: Owner,
    pub tag: QueueTag,
    pub refs: RefCount,
    /// Next-outer constraint of the same thread
    pub surrounding: Option<ReservationId>,
    /// Admitted (false while free or pending a delayed admission)
    pub valid: bool,
    pub missed: bool,
    /// Admission order; breaks laxity ties
    pub sequence: u64,
    /// Processor currently charging this reservation
    pub active: Option<usize>,
    pub(super) idle_link: Option<Link<ReservationId>>,
    pub(super) owner_link: Option<Link<ReservationId>>,
}

impl Reservation {
    pub const fn free() -> Self {
        Self {
            start: 0,
            deadline: 0,
            estimate: 0,
            initial_estimate: 0,
            owner: Owner::Detached,
            tag: QueueTag::None,
            refs: RefCount::new(0),
            surrounding: None,
            valid: false,
            missed: false,
            sequence: 0,
            active: None,
            idle_link: None,
            owner_link: None,
        }
    }

    /// `deadline - remaining estimate`
    #[inline]
    pub fn laxity(&self) -> Time {
        self.deadline.saturating_sub(self.estimate)
    }

    #[inline]
    pub fn key(&self) -> LaxityKey {
        LaxityKey::new(self.laxity(), self.sequence)
    }
}

/// Membership in the idle (not yet started) list
pub struct IdleLink;

impl ListTag for IdleLink {
    type Id = ReservationId;
    type Node = Reservation;

    fn link(node: &Reservation) -> &Option<Link<ReservationId>> {
        &node.idle_link
    }

    fn link_mut(node: &mut Reservation) -> &mut Option<Link<ReservationId>> {
        &mut node.idle_link
    }
}

/// Membership in an activity's inherited-reservation list
pub struct OwnerLink;

impl ListTag for OwnerLink {
    type Id = ReservationId;
    type Node = Reservation;

    fn link(node: &Reservation) -> &Option<Link<ReservationId>> {
        &node.owner_link
    }

    fn link_mut(node: &mut Reservation) -> &mut Option<Link<ReservationId>> {
        &mut node.owner_link
    }
}

pub type ReservationTable = Arena<ReservationId, Reservation>;

// ============================================================================
// Allocation and recycling
// ============================================================================

impl<P: SchedPolicy> SchedState<P> {
    /// Whether `thread` could get a reservation right now
    pub(super) fn can_allocate_reservation(&self, thread: ThreadId) -> bool {
        self.threads[thread].free_reservation.is_some()
            || !self.reservations.is_full()
            || self.cache_holder().is_some()
    }

    /// Some thread sitting on a cached free reservation
    fn cache_holder(&self) -> Option<ThreadId> {
        self.threads
            .iter()
            .find(|(_, t)| t.free_reservation.is_some())
            .map(|(id, _)| id)
    }

    /// Take the thread's cached reservation or a fresh one from the pool.
    /// With the pool used up, another thread's cached reservation is taken
    /// instead. The caller becomes the owner and holds the only reference.
    pub(super) fn allocate_reservation(
        &mut self,
        thread: ThreadId,
    ) -> Result<ReservationId, SchedError> {
        let id = match self.threads[thread].free_reservation.take() {
            Some(cached) => cached,
            None => match self.reservations.insert(Reservation::free()) {
                Ok(fresh) => fresh,
                Err(_) => {
                    let holder = self.cache_holder().ok_or(SchedError::PoolExhausted)?;
                    let cached = self.threads[holder].free_reservation.take();
                    crate::ktrace!("sched: {} takes the cached reservation of {}", thread, holder);
                    cached.ok_or(SchedError::PoolExhausted)?
                }
            },
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let reservation = &mut self.reservations[id];
        *reservation = Reservation::free();
        reservation.owner = Owner::Thread(thread);
        reservation.refs = RefCount::new(1);
        reservation.sequence = sequence;
        Ok(id)
    }

    /// Drop one strong reference
    pub(super) fn release_reservation(&mut self, id: ReservationId) {
        if self.reservations[id].refs.decrement() {
            self.recycle_reservation(id);
        }
    }

    fn recycle_reservation(&mut self, id: ReservationId) {
        let reservation = &self.reservations[id];
        assert!(
            reservation.tag == QueueTag::None
                && reservation.idle_link.is_none()
                && reservation.owner_link.is_none()
                && !self.guaranteed.contains(id),
            "recycling queued reservation {}",
            id
        );

        if let Some(cpu) = reservation.active {
            let dispatch = &mut self.cpus[cpu];
            if dispatch.current_reservation == Some(id) {
                dispatch.current_reservation = None;
            }
        }

        let cache_for = match reservation.owner {
            Owner::Thread(thread) => self
                .threads
                .get(thread)
                .filter(|t| t.free_reservation.is_none() && t.state != ThreadState::Stopped)
                .map(|_| thread),
            _ => None,
        };

        self.reservations.remove(id);
        if let Some(thread) = cache_for {
            // The slot just freed is reused, under a new generation.
            if let Ok(fresh) = self.reservations.insert(Reservation::free()) {
                self.threads[thread].free_reservation = Some(fresh);
            }
        }
    }

    // ========================================================================
    // Queue placement
    // ========================================================================

    /// Put an unqueued reservation on the idle list or the Guaranteed queue
    pub(super) fn enqueue_reservation(&mut self, id: ReservationId, now: Time) {
        let a_few = self.config.a_few_slice;
        let reservation = &mut self.reservations[id];
        assert_eq!(reservation.tag, QueueTag::None, "{} queued twice", id);
        reservation.refs.increment();

        if reservation.start > now.saturating_add(a_few) {
            reservation.tag = QueueTag::Idle;
            self.idle
                .insert_sorted(&mut self.reservations, id, |r| r.start);
            if let Owner::Thread(thread) = self.reservations[id].owner {
                self.sync_deferral(thread);
            }
        } else {
            reservation.tag = QueueTag::Guaranteed;
            P::enqueue_guaranteed(self, id);
        }
    }

    /// Take a reservation off whichever queue holds it and drop the queue's
    /// reference. The owner's reference keeps it alive.
    pub(super) fn dequeue_reservation(&mut self, id: ReservationId) {
        match self.reservations[id].tag {
            QueueTag::None => return,
            QueueTag::Guaranteed => {
                self.guaranteed.remove(id);
            }
            QueueTag::Idle => self.idle.remove(&mut self.reservations, id),
        }
        self.reservations[id].tag = QueueTag::None;
        self.release_reservation(id);
    }

    /// Start time of the earliest idle reservation
    pub(super) fn idle_head_start(&self) -> Time {
        self.idle
            .head()
            .map_or(TIME_INFINITE, |head| self.reservations[head].start)
    }

    /// Move idle reservations whose start has (nearly) arrived to the
    /// Guaranteed queue
    pub(super) fn promote_idle(&mut self, now: Time) {
        let limit = now.saturating_add(self.config.a_few_slice);
        while let Some(head) = self.idle.head() {
            if self.reservations[head].start > limit {
                break;
            }
            self.idle.remove(&mut self.reservations, head);
            self.reservations[head].tag = QueueTag::Guaranteed;
            crate::ktrace!("sched: {} reached its start time", head);

            P::enqueue_guaranteed(self, head);
            if let Owner::Thread(thread) = self.reservations[head].owner {
                self.sync_deferral(thread);
            }
        }
    }

    /// Thread that would run on behalf of `id` if it were dispatched now
    pub(super) fn runnable_beneficiary(&self, id: ReservationId) -> Option<ThreadId> {
        let reservation = self.reservations.get(id)?;
        if reservation.active.is_some() || reservation.estimate <= 0 {
            return None;
        }
        match reservation.owner {
            Owner::Thread(thread) => self
                .threads
                .get(thread)
                .filter(|t| t.is_runnable() && t.constraint == Some(id))
                .map(|_| thread),
            Owner::Activity(activity) => self.activities.get(activity)?.runnable.head(),
            Owner::Detached => None,
        }
    }

    /// No thread can ever benefit from `id` again
    pub(super) fn is_orphaned(&self, id: ReservationId) -> bool {
        match self.reservations[id].owner {
            Owner::Thread(thread) => !self.threads.contains(thread),
            Owner::Activity(activity) => self
                .activities
                .get(activity)
                .map_or(true, |a| a.threads == 0),
            Owner::Detached => true,
        }
    }

    // ========================================================================
    // Accounting
    // ========================================================================

    /// Charge `elapsed` of CPU to a reservation that was just running
    pub(super) fn charge_reservation(&mut self, id: ReservationId, elapsed: Time, now: Time) {
        let Some(reservation) = self.reservations.get_mut(id) else {
            return;
        };
        reservation.active = None;
        reservation.estimate = reservation.estimate.saturating_sub(elapsed);

        if reservation.estimate <= 0 {
            if reservation.tag != QueueTag::None {
                crate::kdebug!(
                    "sched: {} exhausted ({}us granted)",
                    id,
                    ns_to_us(reservation.initial_estimate)
                );
                self.dequeue_reservation(id);
                self.retire_inherited(id);
            }
        } else if now >= reservation.deadline && !reservation.missed {
            self.record_miss(id, now);
        }
    }

    /// Deadline passed with estimate left: count it and stop guaranteeing
    pub(super) fn record_miss(&mut self, id: ReservationId, now: Time) {
        let reservation = &mut self.reservations[id];
        reservation.missed = true;
        self.stats.deadline_misses += 1;
        crate::kwarn!(
            "sched: {} missed its deadline by {}us with {}us unserved",
            id,
            ns_to_us(now - reservation.deadline),
            ns_to_us(reservation.estimate)
        );
        self.dequeue_reservation(id);
        self.retire_inherited(id);
    }

    /// Activity-owned reservations are dropped once they stop being useful
    pub(super) fn retire_inherited(&mut self, id: ReservationId) {
        let Some(reservation) = self.reservations.get(id) else {
            return;
        };
        if let Owner::Activity(activity) = reservation.owner {
            self.drop_inherited(activity, id);
        }
    }

    /// Unlink an inherited reservation from its activity and release it
    pub(super) fn drop_inherited(&mut self, activity: ActivityId, id: ReservationId) {
        self.dequeue_reservation(id);
        self.activities[activity]
            .reservations
            .remove(&mut self.reservations, id);
        self.reservations[id].owner = Owner::Detached;
        self.release_reservation(id);
        self.release_activity_ref(activity);
    }

    /// Dequeue a reservation nobody can benefit from any more
    pub(super) fn drop_orphan(&mut self, id: ReservationId) {
        crate::kdebug!("sched: dropping orphaned {}", id);
        match self.reservations[id].owner {
            Owner::Activity(activity) if self.activities.contains(activity) => {
                self.drop_inherited(activity, id)
            }
            _ => self.dequeue_reservation(id),
        }
    }
}
