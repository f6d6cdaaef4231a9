//! Scheduling policies
//!
//! Admission, accounting and the round-robin ring are shared; a policy only
//! decides how eligible reservations are queued and which one (if any) the
//! dispatcher prefers over round-robin work. The policy is a type parameter
//! of [`Scheduler`](super::Scheduler), chosen once when the kernel is built.

use super::table::SchedState;
use super::types::{QueueTag, ReservationId, ThreadId};
use crate::time::Time;

pub trait SchedPolicy: Sized + 'static {
    const NAME: &'static str;

    /// Called for a reservation that is tagged Guaranteed and may have just
    /// gained a runnable beneficiary. Must be idempotent; an entry that is
    /// already queued only has its key refreshed.
    fn enqueue_guaranteed(state: &mut SchedState<Self>, reservation: ReservationId);

    /// Reservation to dispatch ahead of round-robin work, with the thread
    /// that runs on its behalf. The entry stays queued until committed.
    fn pick_reserved(state: &mut SchedState<Self>, now: Time) -> Option<(ReservationId, ThreadId)>;
}

/// Earliest-laxity-first over admitted reservations, round-robin otherwise
pub struct LaxityPolicy;

impl SchedPolicy for LaxityPolicy {
    const NAME: &'static str = "laxity";

    fn enqueue_guaranteed(state: &mut SchedState<Self>, reservation: ReservationId) {
        let Some(entry) = state.reservations.get(reservation) else {
            return;
        };
        if entry.tag != QueueTag::Guaranteed {
            return;
        }
        let key = entry.key();
        if state.guaranteed.update(reservation, key) {
            return;
        }
        if state.runnable_beneficiary(reservation).is_none() {
            // Retained off-heap until a beneficiary becomes runnable.
            return;
        }

        state.guaranteed.insert(reservation, key);
        // Round-robin slices never outlast newly eligible reserved work.
        if state.requeuing != Some(reservation) {
            state.forfeit_robin_slices();
        }
    }

    fn pick_reserved(state: &mut SchedState<Self>, now: Time) -> Option<(ReservationId, ThreadId)> {
        loop {
            let (reservation, _) = state.guaranteed.peek_min()?;

            let Some(entry) = state.reservations.get(reservation) else {
                state.guaranteed.remove(reservation);
                continue;
            };

            if entry.deadline <= now && entry.estimate > 0 {
                state.record_miss(reservation, now);
                continue;
            }

            if let Some(thread) = state.runnable_beneficiary(reservation) {
                return Some((reservation, thread));
            }

            state.guaranteed.remove(reservation);
            if state.is_orphaned(reservation) {
                state.drop_orphan(reservation);
            }
        }
    }
}

/// Round-robin only. Constraints are still admitted and accounted (stack,
/// folding, deferred start) but never dispatched ahead of the ring.
pub struct RoundRobinPolicy;

impl SchedPolicy for RoundRobinPolicy {
    const NAME: &'static str = "round-robin";

    fn enqueue_guaranteed(_state: &mut SchedState<Self>, _reservation: ReservationId) {}

    fn pick_reserved(_state: &mut SchedState<Self>, _now: Time) -> Option<(ReservationId, ThreadId)> {
        None
    }
}
