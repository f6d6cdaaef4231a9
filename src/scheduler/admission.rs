//! Admission control for one-shot constraints
//!
//! `begin_constraint` reserves CPU time for the calling thread: `estimate`
//! nanoseconds to be delivered between `start` and `deadline`. Constraints
//! nest. A nested constraint never outlives its parent (its deadline is
//! clamped to the parent's), the parent is suspended while the child is
//! active, and whatever the child leaves unused flows back to the parent
//! when it ends.
//!
//! A rejected request changes nothing.

use super::core::Scheduler;
use super::policy::SchedPolicy;
use super::table::SchedState;
use super::thread::PendingConstraint;
use super::types::{
    ConstraintEnd, ConstraintRequest, Owner, QueueTag, ReservationId, TaskHandle, ThreadId,
    ThreadState,
};
use crate::error::SchedError;
use crate::hal::Platform;
use crate::time::{ns_to_us, Time};

impl<P: SchedPolicy> SchedState<P> {
    pub fn begin_constraint(
        &mut self,
        thread: ThreadId,
        request: ConstraintRequest,
        now: Time,
    ) -> Result<TaskHandle, SchedError> {
        let result = self.try_begin(thread, &request, now);
        if let Err(err) = result {
            self.stats.rejections += 1;
            crate::kdebug!("sched: {} constraint rejected: {}", thread, err);
        }
        result
    }

    fn try_begin(
        &mut self,
        thread: ThreadId,
        request: &ConstraintRequest,
        now: Time,
    ) -> Result<TaskHandle, SchedError> {
        let entry = self.threads.get(thread).ok_or(SchedError::UnknownThread)?;
        if entry.state == ThreadState::Stopped {
            return Err(SchedError::InvalidState);
        }
        if request.estimate < 0 {
            return Err(SchedError::NegativeEstimate);
        }
        match (request.end_previous, entry.constraint) {
            (Some(_), None) => return Err(SchedError::NoActiveConstraint),
            (Some(previous), Some(top)) if previous != top => return Err(SchedError::InvalidTask),
            // Ending the previous constraint frees a reservation for this one.
            (Some(_), Some(_)) => {}
            (None, _) => {
                if !self.can_allocate_reservation(thread) {
                    return Err(SchedError::PoolExhausted);
                }
            }
        }

        if let Some(previous) = request.end_previous {
            self.finish_constraint(thread, previous, now);
        }
        let id = self.allocate_reservation(thread)?;
        self.install_constraint(thread, id, request, now);
        Ok(id)
    }

    /// Push an allocated reservation on the thread's constraint stack and
    /// queue it
    fn install_constraint(
        &mut self,
        thread: ThreadId,
        id: ReservationId,
        request: &ConstraintRequest,
        now: Time,
    ) {
        let enclosing = self.threads[thread].constraint;
        let start = request.start.map_or(now, |start| start.max(now));
        let mut deadline = request.deadline.resolve(now);
        let mut handover = None;
        if let Some(outer) = enclosing {
            deadline = deadline.min(self.reservations[outer].deadline);
            // Suspended from here on; the running slice moves to the new one.
            handover = self.stop_charging(thread, outer, now);
            self.dequeue_reservation(outer);
        }

        let reservation = &mut self.reservations[id];
        reservation.start = start;
        reservation.deadline = deadline;
        reservation.estimate = request.estimate;
        reservation.initial_estimate = request.estimate;
        reservation.surrounding = enclosing;
        reservation.owner = Owner::Thread(thread);
        reservation.valid = true;
        let laxity = reservation.laxity();

        let entry = &mut self.threads[thread];
        entry.constraint = Some(id);
        entry.depth += 1;
        let depth = entry.depth;
        self.stats.admissions += 1;

        crate::kdebug!(
            "sched: {} admitted {} estimate={}us deadline={} laxity={}us depth={}",
            thread,
            id,
            ns_to_us(request.estimate),
            deadline,
            ns_to_us(laxity),
            depth
        );

        self.enqueue_reservation(id, now);
        if let Some(cpu) = handover {
            self.start_charging(cpu, id);
        }
        self.sync_deferral(thread);
        self.kick_thread(thread);
    }

    pub fn end_constraint(
        &mut self,
        task: TaskHandle,
        now: Time,
    ) -> Result<ConstraintEnd, SchedError> {
        let reservation = self
            .reservations
            .get(task)
            .filter(|r| r.valid)
            .ok_or(SchedError::InvalidTask)?;
        let Owner::Thread(thread) = reservation.owner else {
            return Err(SchedError::InvalidTask);
        };
        if self.threads.get(thread).and_then(|t| t.constraint) != Some(task) {
            return Err(SchedError::InvalidTask);
        }
        Ok(self.finish_constraint(thread, task, now))
    }

    /// Pop the innermost constraint, fold its unused time into the
    /// enclosing one and recycle it
    fn finish_constraint(&mut self, thread: ThreadId, id: ReservationId, now: Time) -> ConstraintEnd {
        let handover = self.stop_charging(thread, id, now);

        let reservation = &self.reservations[id];
        let unused = reservation.estimate.max(0);
        let late = now > reservation.deadline;
        let surrounding = reservation.surrounding;
        if late {
            self.stats.late_completions += 1;
            crate::kwarn!(
                "sched: {} finished {} {}us past its deadline",
                thread,
                id,
                ns_to_us(now - reservation.deadline)
            );
        }

        let entry = &mut self.threads[thread];
        entry.constraint = surrounding;
        entry.depth -= 1;
        self.dequeue_reservation(id);

        if let Some(outer) = surrounding {
            let parent = &mut self.reservations[outer];
            parent.estimate = parent.estimate.saturating_add(unused);
            if parent.valid && !parent.missed && parent.tag == QueueTag::None && parent.estimate > 0 {
                self.enqueue_reservation(outer, now);
                if let Some(cpu) = handover {
                    self.start_charging(cpu, outer);
                }
            }
        }

        self.release_reservation(id);
        self.sync_deferral(thread);
        crate::kdebug!(
            "sched: {} ended {} unused={}us late={}",
            thread,
            id,
            ns_to_us(unused),
            late
        );
        ConstraintEnd { late, unused }
    }

    /// Charge the slice in progress to `id` and stop charging it. Returns
    /// the processor that was running it, which is asked to reschedule.
    fn stop_charging(&mut self, thread: ThreadId, id: ReservationId, now: Time) -> Option<usize> {
        let cpu = self.reservations[id].active?;
        let elapsed = now.saturating_sub(self.cpus[cpu].sched_clock).max(0);
        self.cpus[cpu].sched_clock = now;
        self.cpus[cpu].current_reservation = None;
        self.charge_thread(thread, elapsed);

        let reservation = &mut self.reservations[id];
        reservation.estimate = reservation.estimate.saturating_sub(elapsed);
        reservation.active = None;
        self.kick(cpu);
        Some(cpu)
    }

    /// Let `cpu` keep running its thread on behalf of `id`, which just
    /// became the thread's innermost constraint
    fn start_charging(&mut self, cpu: usize, id: ReservationId) {
        let reservation = &self.reservations[id];
        if reservation.tag != QueueTag::Guaranteed || reservation.estimate <= 0 {
            return;
        }
        self.guaranteed.remove(id);
        self.reservations[id].active = Some(cpu);
        self.cpus[cpu].current_reservation = Some(id);
    }

    /// Reserve a constraint now, admit it when the thread next wakes.
    /// The thread is put to sleep until `wake_at`.
    pub fn begin_delayed_constraint(
        &mut self,
        thread: ThreadId,
        request: ConstraintRequest,
        wake_at: Time,
        now: Time,
    ) -> Result<TaskHandle, SchedError> {
        let result = self.try_begin_delayed(thread, request, wake_at, now);
        if let Err(err) = result {
            self.stats.rejections += 1;
            crate::kdebug!("sched: {} delayed constraint rejected: {}", thread, err);
        }
        result
    }

    fn try_begin_delayed(
        &mut self,
        thread: ThreadId,
        request: ConstraintRequest,
        wake_at: Time,
        now: Time,
    ) -> Result<TaskHandle, SchedError> {
        let entry = self.threads.get(thread).ok_or(SchedError::UnknownThread)?;
        if request.estimate < 0 {
            return Err(SchedError::NegativeEstimate);
        }
        if request.end_previous.is_some() {
            return Err(SchedError::InvalidTask);
        }
        if entry.pending.is_some() {
            return Err(SchedError::DelayedConstraintPending);
        }
        if !matches!(entry.state, ThreadState::Running | ThreadState::Runnable) {
            return Err(SchedError::InvalidState);
        }
        if !self.can_allocate_reservation(thread) {
            return Err(SchedError::PoolExhausted);
        }

        let reservation = self.allocate_reservation(thread)?;
        self.threads[thread].pending = Some(PendingConstraint {
            reservation,
            request,
        });
        self.set_state_waiting(thread, Some(wake_at), now)?;
        crate::kdebug!("sched: {} will admit {} at wake-up", thread, reservation);
        Ok(reservation)
    }

    /// Admit the constraint deferred by `begin_delayed_constraint`
    pub(super) fn resolve_pending(&mut self, thread: ThreadId, now: Time) {
        let Some(pending) = self.threads[thread].pending.take() else {
            return;
        };
        if !self.reservations.contains(pending.reservation) {
            return;
        }
        self.install_constraint(thread, pending.reservation, &pending.request, now);
    }

    // ========================================================================
    // Ownership hand-off
    // ========================================================================

    /// Detach a thread from its activity. Unexpired reservations on its
    /// stack pass to the activity if other members remain; the rest are
    /// released. An activity left without threads drops what it inherited.
    pub(super) fn detach_from_activity(&mut self, thread: ThreadId, now: Time) {
        let Some(activity) = self.threads[thread].activity else {
            return;
        };
        let others_remain = self.activities[activity].threads > 1;

        let mut cursor = self.threads[thread].constraint.take();
        self.threads[thread].depth = 0;
        while let Some(id) = cursor {
            let reservation = &mut self.reservations[id];
            cursor = reservation.surrounding.take();
            let keep = others_remain
                && reservation.valid
                && !reservation.missed
                && reservation.estimate > 0
                && reservation.deadline > now;

            self.dequeue_reservation(id);
            if keep {
                self.reservations[id].owner = Owner::Activity(activity);
                let target = &mut self.activities[activity];
                target.reservations.push_back(&mut self.reservations, id);
                target.refs.increment();
                crate::kdebug!("sched: {} handed {} to {}", thread, id, activity);
                self.enqueue_reservation(id, now);
            } else {
                self.release_reservation(id);
            }
        }

        let target = &mut self.activities[activity];
        target.threads -= 1;
        if target.threads == 0 {
            while let Some(id) = self.activities[activity].reservations.head() {
                self.drop_inherited(activity, id);
            }
        }

        self.threads[thread].activity = None;
        self.release_activity_ref(activity);
    }
}

// ============================================================================
// Kernel entry points
// ============================================================================

impl<P: SchedPolicy, H: Platform> Scheduler<P, H> {
    /// `BeginConstraint`
    pub fn begin_constraint(
        &self,
        thread: ThreadId,
        request: ConstraintRequest,
    ) -> Result<TaskHandle, SchedError> {
        self.with_state(|state, now| state.begin_constraint(thread, request, now))
    }

    /// `EndConstraint`
    pub fn end_constraint(&self, task: TaskHandle) -> Result<ConstraintEnd, SchedError> {
        self.with_state(|state, now| state.end_constraint(task, now))
    }

    /// `BeginDelayedConstraint`: sleep until `wake_at`, then admit `request`
    /// with relative deadlines measured from the wake-up
    pub fn begin_delayed_constraint(
        &self,
        thread: ThreadId,
        request: ConstraintRequest,
        wake_at: Time,
    ) -> Result<TaskHandle, SchedError> {
        self.with_state(|state, now| state.begin_delayed_constraint(thread, request, wake_at, now))
    }
}
