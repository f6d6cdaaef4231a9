//! Consistency checker
//!
//! Walks the whole locked state and reports the first broken invariant.
//! O(n) in the number of threads, activities and reservations; meant for
//! tests and debug kernels, not for the interrupt path.

use super::activity::RingLink;
use super::core::Scheduler;
use super::policy::SchedPolicy;
use super::queue::ListTag;
use super::reservation::{IdleLink, OwnerLink};
use super::table::SchedState;
use super::thread::{RunLink, SleepLink};
use super::types::{Owner, QueueTag, ThreadState};
use crate::hal::Platform;
use crate::time::{Time, TIME_INFINITE};

pub type CheckResult = Result<(), &'static str>;

fn ensure(condition: bool, message: &'static str) -> CheckResult {
    if condition {
        Ok(())
    } else {
        Err(message)
    }
}

impl<P: SchedPolicy> SchedState<P> {
    pub fn check_invariants(&self) -> CheckResult {
        self.check_ring()?;
        self.check_runnable()?;
        self.check_reservation_queues()?;
        self.check_refcounts()?;
        self.check_threads()?;
        self.check_sleep_queue()
    }

    /// The round-robin ring is circular and holds every activity
    fn check_ring(&self) -> CheckResult {
        ensure(
            self.ring.len() == self.activities.len(),
            "ring length differs from activity count",
        )?;
        let Some(head) = self.ring.head() else {
            return Ok(());
        };
        let mut cursor = head;
        for _ in 0..self.ring.len() {
            let link = RingLink::link(&self.activities[cursor]).ok_or("activity off the ring")?;
            let back = RingLink::link(&self.activities[link.next]).ok_or("ring link dangles")?;
            ensure(back.prev == cursor, "ring prev/next mismatch")?;
            cursor = link.next;
        }
        ensure(cursor == head, "ring does not close")
    }

    /// Runnable rings hold exactly the Runnable threads of their activity
    fn check_runnable(&self) -> CheckResult {
        let mut linked = 0;
        for (id, activity) in self.activities.iter() {
            for thread in activity.runnable.iter(&self.threads) {
                let entry = self.threads.get(thread).ok_or("stale thread on runnable ring")?;
                ensure(entry.state == ThreadState::Runnable, "non-runnable thread on ring")?;
                ensure(entry.activity == Some(id), "thread on another activity's ring")?;
                ensure(entry.active_processor.is_none(), "running thread on ring")?;
                ensure(entry.sleep_link.is_none(), "runnable thread on sleep queue")?;
                linked += 1;
            }
        }
        let runnable = self
            .threads
            .iter()
            .filter(|(_, t)| t.state == ThreadState::Runnable)
            .count();
        ensure(linked == runnable, "runnable thread missing from its ring")
    }

    fn check_reservation_queues(&self) -> CheckResult {
        ensure(self.guaranteed.is_heap_ordered(), "laxity heap out of order")?;
        for (id, key) in self.guaranteed.iter() {
            let reservation = self.reservations.get(id).ok_or("stale reservation in heap")?;
            ensure(reservation.tag == QueueTag::Guaranteed, "heap entry not tagged Guaranteed")?;
            ensure(key == reservation.key(), "heap key out of date")?;
            ensure(
                self.runnable_beneficiary(id).is_some(),
                "heap entry without runnable beneficiary",
            )?;
        }

        let mut previous_start = Time::MIN;
        for id in self.idle.iter(&self.reservations) {
            let reservation = self.reservations.get(id).ok_or("stale reservation on idle list")?;
            ensure(reservation.tag == QueueTag::Idle, "idle entry not tagged Idle")?;
            ensure(reservation.start >= previous_start, "idle list out of order")?;
            previous_start = reservation.start;
        }

        for (id, reservation) in self.reservations.iter() {
            let in_heap = self.guaranteed.contains(id);
            let on_idle = IdleLink::link(reservation).is_some();
            let placement_ok = match reservation.tag {
                QueueTag::None => !in_heap && !on_idle,
                QueueTag::Guaranteed => !on_idle,
                QueueTag::Idle => !in_heap && on_idle,
            };
            ensure(placement_ok, "reservation placement disagrees with its tag")?;
            if reservation.tag != QueueTag::None {
                ensure(reservation.valid, "queued reservation not admitted")?;
            }
        }
        Ok(())
    }

    /// Strong references are the owner plus the queue tag
    fn check_refcounts(&self) -> CheckResult {
        for (_, reservation) in self.reservations.iter() {
            let expected = u32::from(reservation.owner != Owner::Detached)
                + u32::from(reservation.tag != QueueTag::None);
            ensure(reservation.refs.get() == expected, "reservation refcount mismatch")?;
            if let Owner::Activity(activity) = reservation.owner {
                ensure(self.activities.contains(activity), "reservation owned by dead activity")?;
                ensure(
                    OwnerLink::link(reservation).is_some(),
                    "inherited reservation off its activity list",
                )?;
            }
        }

        for (id, activity) in self.activities.iter() {
            let members = self
                .threads
                .iter()
                .filter(|(_, t)| t.activity == Some(id))
                .count();
            ensure(members == activity.threads, "activity thread count mismatch")?;
            let expected = activity.threads + activity.reservations.len() + usize::from(!activity.released);
            ensure(
                activity.refs.get() as usize == expected,
                "activity refcount mismatch",
            )?;
        }
        Ok(())
    }

    fn check_threads(&self) -> CheckResult {
        for (id, thread) in self.threads.iter() {
            match thread.active_processor {
                Some(cpu) => {
                    let dispatch = self.cpus.get(cpu).ok_or("thread on unknown cpu")?;
                    ensure(dispatch.running == Some(id), "cpu does not know its thread")?;
                    ensure(RunLink::link(thread).is_none(), "running thread on ring")?;
                    ensure(SleepLink::link(thread).is_none(), "running thread asleep")?;
                }
                None => ensure(thread.state != ThreadState::Running, "Running thread without cpu")?,
            }

            let mut depth = 0;
            let mut cursor = thread.constraint;
            while let Some(reservation) = cursor {
                let entry = self.reservations.get(reservation).ok_or("stale constraint")?;
                ensure(entry.owner == Owner::Thread(id), "constraint owned by someone else")?;
                ensure(entry.valid, "constraint on stack not admitted")?;
                if depth > 0 {
                    ensure(entry.tag == QueueTag::None, "enclosing constraint still queued")?;
                    ensure(entry.active.is_none(), "enclosing constraint still charged")?;
                }
                depth += 1;
                cursor = entry.surrounding;
            }
            ensure(depth == thread.depth, "constraint depth mismatch")?;
        }

        for (cpu, dispatch) in self.cpus.iter().enumerate() {
            if let Some(thread) = dispatch.running {
                let entry = self.threads.get(thread).ok_or("cpu runs a dead thread")?;
                ensure(entry.active_processor == Some(cpu), "thread does not know its cpu")?;
                ensure(!dispatch.idle, "idle cpu with a running thread")?;
            }
            if let Some(reservation) = dispatch.current_reservation {
                let entry = self
                    .reservations
                    .get(reservation)
                    .ok_or("cpu charges a dead reservation")?;
                ensure(entry.active == Some(cpu), "charged reservation does not know its cpu")?;
                ensure(!self.guaranteed.contains(reservation), "charged reservation still queued")?;
            }
        }
        for (id, reservation) in self.reservations.iter() {
            if let Some(cpu) = reservation.active {
                let dispatch = self.cpus.get(cpu).ok_or("reservation charged on unknown cpu")?;
                ensure(
                    dispatch.current_reservation == Some(id),
                    "cpu does not know its charged reservation",
                )?;
            }
        }
        Ok(())
    }

    /// Sleep queue ordered by wake time with an accurate cached timeout
    fn check_sleep_queue(&self) -> CheckResult {
        let mut previous = Time::MIN;
        let mut first = None;
        for thread in self.sleep.iter(&self.threads) {
            let entry = self.threads.get(thread).ok_or("stale thread on sleep queue")?;
            ensure(entry.state == ThreadState::Waiting, "sleeper not waiting")?;
            ensure(entry.active_processor.is_none(), "sleeper still on a cpu")?;
            ensure(entry.wake_time >= previous, "sleep queue out of order")?;
            previous = entry.wake_time;
            first.get_or_insert(entry.wake_time);
        }
        ensure(
            self.sleep.timeout() == first.unwrap_or(TIME_INFINITE),
            "cached sleep timeout is stale",
        )
    }
}

impl<P: SchedPolicy, H: Platform> Scheduler<P, H> {
    /// Validate the scheduler's internal invariants
    pub fn check_invariants(&self) -> CheckResult {
        self.state.lock().check_invariants()
    }
}
