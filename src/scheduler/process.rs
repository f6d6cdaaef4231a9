//! Thread and activity management
//!
//! Creation, activity membership, start/cleanup, and the wait/wake paths,
//! plus the runnable-ring maintenance they share with the dispatcher.

use super::activity::Activity;
use super::core::Scheduler;
use super::policy::SchedPolicy;
use super::table::SchedState;
use super::thread::Thread;
use super::types::{ActivityId, Owner, QueueTag, ThreadId, ThreadState};
use crate::error::SchedError;
use crate::hal::Platform;
use crate::time::{is_infinite, Time, TIME_INFINITE};

// ============================================================================
// Runnable ring maintenance
// ============================================================================

impl<P: SchedPolicy> SchedState<P> {
    pub(super) fn activity_of(&self, thread: ThreadId) -> ActivityId {
        match self.threads[thread].activity {
            Some(activity) => activity,
            None => panic!("thread {} has no activity", thread),
        }
    }

    /// Put a runnable thread on its activity's ring.
    ///
    /// A thread coming back from sleep goes second from the head so it runs
    /// soon; a preempted thread goes to the tail. Every processor is asked
    /// to reconsider, since the new work may change any of their decisions.
    pub(super) fn enqueue_run_thread(&mut self, thread: ThreadId, from_sleeping: bool) {
        let activity = self.activity_of(thread);
        let runnable = &mut self.activities[activity].runnable;
        match runnable.head() {
            Some(head) if from_sleeping => runnable.insert_after(&mut self.threads, head, thread),
            _ => runnable.push_back(&mut self.threads, thread),
        }

        self.reevaluate_reservations(thread, activity);
        self.kick_all();
    }

    /// Take a thread off its activity's ring. Reservations that just lost
    /// their last runnable beneficiary leave the heap.
    pub(super) fn dequeue_run_thread(&mut self, thread: ThreadId) {
        let activity = self.activity_of(thread);
        self.activities[activity]
            .runnable
            .remove(&mut self.threads, thread);

        if let Some(top) = self.threads[thread].constraint {
            self.guaranteed.remove(top);
        }
        if !self.activities[activity].has_runnable() {
            let inherited = &self.activities[activity].reservations;
            let mut cursor = inherited.head();
            for _ in 0..inherited.len() {
                let Some(id) = cursor else { break };
                cursor = Some(inherited.next(&self.reservations, id));
                self.guaranteed.remove(id);
            }
        }
    }

    /// Offer a thread's reservations (its own innermost one and any its
    /// activity inherited) to the policy's Guaranteed queue
    fn reevaluate_reservations(&mut self, thread: ThreadId, activity: ActivityId) {
        if let Some(top) = self.threads[thread].constraint {
            P::enqueue_guaranteed(self, top);
        }

        let count = self.activities[activity].reservations.len();
        let mut cursor = self.activities[activity].reservations.head();
        for _ in 0..count {
            let Some(id) = cursor else { break };
            cursor = Some(
                self.activities[activity]
                    .reservations
                    .next(&self.reservations, id),
            );
            P::enqueue_guaranteed(self, id);
        }
    }

    fn top_is_idle(&self, thread: ThreadId) -> bool {
        self.threads[thread]
            .constraint
            .map_or(false, |top| self.reservations[top].tag == QueueTag::Idle)
    }

    /// Ready a thread, unless its innermost constraint has not started yet
    pub(super) fn make_runnable(&mut self, thread: ThreadId, from_sleeping: bool) {
        if self.top_is_idle(thread) {
            self.threads[thread].state = ThreadState::Deferred;
            return;
        }
        self.threads[thread].state = ThreadState::Runnable;
        self.enqueue_run_thread(thread, from_sleeping);
    }

    /// Re-derive Deferred after the innermost constraint changed
    pub(super) fn sync_deferral(&mut self, thread: ThreadId) {
        let top_idle = self.top_is_idle(thread);
        match (self.threads[thread].state, top_idle) {
            (ThreadState::Deferred, false) => {
                if self.threads[thread].active_processor.is_some() {
                    // Not descheduled yet; keep the processor.
                    self.threads[thread].state = ThreadState::Running;
                } else {
                    self.threads[thread].state = ThreadState::Runnable;
                    self.enqueue_run_thread(thread, true);
                }
            }
            (ThreadState::Runnable, true) => {
                self.dequeue_run_thread(thread);
                self.threads[thread].state = ThreadState::Deferred;
            }
            (ThreadState::Running, true) => {
                self.threads[thread].state = ThreadState::Deferred;
                self.kick_thread(thread);
            }
            _ => {}
        }
    }

    /// Account CPU time to a thread and its activity
    pub(super) fn charge_thread(&mut self, thread: ThreadId, elapsed: Time) {
        let Some(entry) = self.threads.get_mut(thread) else {
            return;
        };
        entry.execution_time = entry.execution_time.saturating_add(elapsed);
        if let Some(activity) = entry.activity {
            if let Some(activity) = self.activities.get_mut(activity) {
                activity.execution_time = activity.execution_time.saturating_add(elapsed);
            }
        }
    }
}

// ============================================================================
// Activities
// ============================================================================

impl<P: SchedPolicy> SchedState<P> {
    pub fn create_activity(&mut self) -> Result<ActivityId, SchedError> {
        let id = self.activities.insert(Activity::new())?;
        self.ring.push_back(&mut self.activities, id);
        crate::kdebug!("sched: created activity {}", id);
        Ok(id)
    }

    /// Drop the creator's reference. The activity lives on while member
    /// threads or inherited reservations still hold it.
    pub fn release_activity(&mut self, activity: ActivityId) -> Result<(), SchedError> {
        let entry = self
            .activities
            .get_mut(activity)
            .ok_or(SchedError::UnknownActivity)?;
        if entry.released {
            return Err(SchedError::InvalidState);
        }
        entry.released = true;
        self.release_activity_ref(activity);
        Ok(())
    }

    pub(super) fn release_activity_ref(&mut self, activity: ActivityId) {
        if self.activities[activity].refs.decrement() {
            self.destroy_activity(activity);
        }
    }

    fn destroy_activity(&mut self, activity: ActivityId) {
        let entry = &self.activities[activity];
        assert!(
            entry.threads == 0 && entry.runnable.is_empty() && entry.reservations.is_empty(),
            "destroying activity {} that is still in use",
            activity
        );

        self.ring.remove(&mut self.activities, activity);
        for dispatch in self.cpus.iter_mut() {
            if dispatch.current_activity == Some(activity) {
                dispatch.current_activity = None;
                dispatch.slice_left = 0;
            }
        }
        self.activities.remove(activity);
        crate::kdebug!("sched: destroyed activity {}", activity);
    }
}

// ============================================================================
// Threads
// ============================================================================

impl<P: SchedPolicy> SchedState<P> {
    pub fn create_thread(&mut self, activity: ActivityId) -> Result<ThreadId, SchedError> {
        if !self.activities.get(activity).map_or(false, |a| !a.released) {
            return Err(SchedError::UnknownActivity);
        }
        let id = self.threads.insert(Thread::new(activity))?;

        let entry = &mut self.activities[activity];
        entry.threads += 1;
        entry.refs.increment();
        crate::kdebug!("sched: created thread {} in {}", id, activity);
        Ok(id)
    }

    /// Move a thread to another activity. Unexpired reservations it holds
    /// stay behind with the old activity.
    pub fn set_activity(
        &mut self,
        thread: ThreadId,
        activity: ActivityId,
        now: Time,
    ) -> Result<(), SchedError> {
        let entry = self.threads.get(thread).ok_or(SchedError::UnknownThread)?;
        if entry.state == ThreadState::Stopped {
            return Err(SchedError::InvalidState);
        }
        if !self.activities.get(activity).map_or(false, |a| !a.released) {
            return Err(SchedError::UnknownActivity);
        }
        if entry.activity == Some(activity) {
            return Ok(());
        }

        let was_runnable = entry.is_runnable();
        if was_runnable {
            self.dequeue_run_thread(thread);
        }
        self.detach_from_activity(thread, now);

        self.threads[thread].activity = Some(activity);
        let target = &mut self.activities[activity];
        target.threads += 1;
        target.refs.increment();

        if was_runnable {
            self.enqueue_run_thread(thread, false);
        }
        self.sync_deferral(thread);
        crate::kdebug!("sched: moved {} to {}", thread, activity);
        Ok(())
    }

    pub fn start_thread(&mut self, thread: ThreadId) -> Result<(), SchedError> {
        let entry = self.threads.get(thread).ok_or(SchedError::UnknownThread)?;
        if entry.state != ThreadState::Unstarted {
            return Err(SchedError::InvalidState);
        }
        self.make_runnable(thread, false);
        Ok(())
    }

    /// Remove a thread from the scheduler. Its unexpired reservations are
    /// handed to its activity. A thread that is still running is reclaimed
    /// when its processor next reschedules.
    pub fn cleanup_thread(&mut self, thread: ThreadId, now: Time) -> Result<(), SchedError> {
        let entry = self.threads.get(thread).ok_or(SchedError::UnknownThread)?;
        if entry.state == ThreadState::Stopped {
            return Err(SchedError::InvalidState);
        }

        if entry.is_runnable() {
            self.dequeue_run_thread(thread);
        } else if entry.on_sleep_queue() {
            self.sleep.remove(&mut self.threads, thread);
        }

        if let Some(pending) = self.threads[thread].pending.take() {
            if self.reservations.contains(pending.reservation) {
                self.reservations[pending.reservation].owner = Owner::Detached;
                self.release_reservation(pending.reservation);
            }
        }

        self.detach_from_activity(thread, now);

        if let Some(cached) = self.threads[thread].free_reservation.take() {
            self.reservations.remove(cached);
        }

        match self.threads[thread].active_processor {
            Some(cpu) => {
                self.threads[thread].state = ThreadState::Stopped;
                self.kick(cpu);
            }
            None => {
                self.threads.remove(thread);
            }
        }
        crate::kdebug!("sched: cleaned up thread {}", thread);
        Ok(())
    }
}

// ============================================================================
// Waiting and waking
// ============================================================================

impl<P: SchedPolicy> SchedState<P> {
    /// Block a thread until [`wake`](Self::wake) or until `wake_at`.
    ///
    /// A running thread keeps its processor until the next reschedule,
    /// which is requested here; it joins the sleep queue only then.
    pub fn set_state_waiting(
        &mut self,
        thread: ThreadId,
        wake_at: Option<Time>,
        now: Time,
    ) -> Result<(), SchedError> {
        let entry = self.threads.get(thread).ok_or(SchedError::UnknownThread)?;
        let state = entry.state;
        let on_cpu = entry.active_processor.is_some();
        if !matches!(
            state,
            ThreadState::Running | ThreadState::Runnable | ThreadState::Deferred
        ) {
            return Err(SchedError::InvalidState);
        }

        if state == ThreadState::Runnable {
            self.dequeue_run_thread(thread);
        }

        let entry = &mut self.threads[thread];
        entry.state = ThreadState::Waiting;
        entry.sleep_start = now;
        entry.wake_time = wake_at.unwrap_or(TIME_INFINITE);

        if on_cpu {
            self.kick_thread(thread);
        } else if !is_infinite(self.threads[thread].wake_time) {
            self.sleep.insert(&mut self.threads, thread);
        }
        Ok(())
    }

    /// Make a waiting thread runnable. Returns `false` if it was not
    /// waiting. A thread that declared a wait but has not been descheduled
    /// yet simply keeps running.
    pub fn wake(&mut self, thread: ThreadId, now: Time) -> Result<bool, SchedError> {
        let entry = self.threads.get(thread).ok_or(SchedError::UnknownThread)?;
        if entry.state != ThreadState::Waiting {
            return Ok(false);
        }

        if entry.active_processor.is_some() {
            self.threads[thread].state = ThreadState::Running;
            self.threads[thread].wake_time = TIME_INFINITE;
            self.resolve_pending(thread, now);
            self.sync_deferral(thread);
            return Ok(true);
        }

        if entry.on_sleep_queue() {
            self.sleep.remove(&mut self.threads, thread);
        }
        self.ready_sleeper(thread, now);
        Ok(true)
    }

    fn ready_sleeper(&mut self, thread: ThreadId, now: Time) {
        self.threads[thread].wake_time = TIME_INFINITE;
        self.resolve_pending(thread, now);
        self.make_runnable(thread, true);
        self.stats.wakeups += 1;
    }

    /// Ready every sleeper due by `now` plus the guard interval, in wake order
    pub(super) fn wake_sleepers(&mut self, now: Time) {
        let limit = now.saturating_add(self.config.a_few_slice);
        while let Some(thread) = self.sleep.pop_expired(&mut self.threads, limit) {
            crate::ktrace!("sched: {} woke from sleep", thread);
            self.ready_sleeper(thread, now);
        }
    }
}

// ============================================================================
// Kernel entry points
// ============================================================================

impl<P: SchedPolicy, H: Platform> Scheduler<P, H> {
    /// `CreateActivity`
    pub fn create_activity(&self) -> Result<ActivityId, SchedError> {
        self.with_state(|state, _| state.create_activity())
    }

    /// `ReleaseActivity`
    pub fn release_activity(&self, activity: ActivityId) -> Result<(), SchedError> {
        self.with_state(|state, _| state.release_activity(activity))
    }

    /// `CreateThread`
    pub fn create_thread(&self, activity: ActivityId) -> Result<ThreadId, SchedError> {
        self.with_state(|state, _| state.create_thread(activity))
    }

    /// `SetActivity`
    pub fn set_activity(&self, thread: ThreadId, activity: ActivityId) -> Result<(), SchedError> {
        self.with_state(|state, now| state.set_activity(thread, activity, now))
    }

    /// `StartThread`
    pub fn start_thread(&self, thread: ThreadId) -> Result<(), SchedError> {
        self.with_state(|state, _| state.start_thread(thread))
    }

    /// `CleanupThread`
    pub fn cleanup_thread(&self, thread: ThreadId) -> Result<(), SchedError> {
        self.with_state(|state, now| state.cleanup_thread(thread, now))
    }

    /// `SetStateWaiting`: `wake_at` is an absolute kernel time, `None` to
    /// wait for an explicit [`wake`](Self::wake)
    pub fn set_state_waiting(&self, thread: ThreadId, wake_at: Option<Time>) -> Result<(), SchedError> {
        self.with_state(|state, now| state.set_state_waiting(thread, wake_at, now))
    }

    /// `Wake`
    pub fn wake(&self, thread: ThreadId) -> Result<bool, SchedError> {
        self.with_state(|state, now| state.wake(thread, now))
    }
}
