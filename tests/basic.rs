//! Basic scheduler tests
//!
//! Construction, thread/activity lifecycle, error paths and the
//! round-robin dispatcher on a single processor.

mod common;

use common::{decide, fire_timer, laxity, round_robin, run_on, spawn, MockPlatform};
use nexa_sched::scheduler::ThreadState;
use nexa_sched::time::{ms_to_ns, TIME_INFINITE};
use nexa_sched::{LaxityScheduler, NextThread, SchedConfig, SchedError, Scheduler};

// =========================================================================
// Construction
// =========================================================================

#[test]
fn test_new_rejects_bad_cpu_count() {
    let result: Result<LaxityScheduler<MockPlatform>, _> =
        Scheduler::new(MockPlatform::new(1), SchedConfig::DEFAULT, 0);
    assert_eq!(result.err(), Some(SchedError::InvalidCpu));
}

#[test]
fn test_new_rejects_bad_config() {
    let config = SchedConfig::DEFAULT.with_robin_slice(0);
    let result: Result<LaxityScheduler<MockPlatform>, _> =
        Scheduler::new(MockPlatform::new(1), config, 1);
    assert_eq!(result.err(), Some(SchedError::InvalidConfig));
}

#[test]
fn test_invalid_cpu_index() {
    let sched = laxity(1);
    assert_eq!(sched.next_thread(1), Err(SchedError::InvalidCpu));
    assert_eq!(sched.on_timer_interrupt(4), Err(SchedError::InvalidCpu));
    assert!(!sched.should_reschedule(7));
}

// =========================================================================
// Lifecycle
// =========================================================================

#[test]
fn test_empty_scheduler_halts_without_timer() {
    let sched = laxity(1);
    assert_eq!(decide(&sched, 0), NextThread::Halt { wake_at: TIME_INFINITE });
    assert!(sched.is_idle(0).unwrap());
    assert_eq!(sched.platform().timer(0), TIME_INFINITE);
    assert_eq!(sched.get_stats().idle_entries, 1);
}

#[test]
fn test_unstarted_thread_is_not_dispatched() {
    let sched = laxity(1);
    let activity = sched.create_activity().unwrap();
    let thread = sched.create_thread(activity).unwrap();

    assert_eq!(sched.thread_state(thread), Some(ThreadState::Unstarted));
    assert!(decide(&sched, 0).is_halt());

    sched.start_thread(thread).unwrap();
    assert_eq!(sched.thread_state(thread), Some(ThreadState::Runnable));
    assert_eq!(sched.start_thread(thread), Err(SchedError::InvalidState));
}

#[test]
fn test_single_thread_runs_with_robin_slice() {
    let sched = laxity(1);
    let activity = sched.create_activity().unwrap();
    let thread = spawn(&sched, activity);

    assert_eq!(run_on(&sched, 0), thread);
    assert_eq!(sched.thread_state(thread), Some(ThreadState::Running));
    assert_eq!(sched.current_thread(0), Ok(Some(thread)));
    assert_eq!(sched.platform().timer(0), ms_to_ns(10));

    // Alone on the ring it just gets another slice.
    assert_eq!(fire_timer(&sched, 0), NextThread::Run(thread));
    assert_eq!(sched.platform().timer(0), ms_to_ns(20));
    assert_eq!(sched.thread_execution_time(thread), Some(ms_to_ns(10)));

    let percpu = sched.get_percpu_stats(0).unwrap();
    assert_eq!(percpu.dispatches, 2);
    assert_eq!(percpu.context_switches, 1);
}

#[test]
fn test_two_activities_alternate_each_slice() {
    let sched = laxity(1);
    let first = sched.create_activity().unwrap();
    let second = sched.create_activity().unwrap();
    let a = spawn(&sched, first);
    let b = spawn(&sched, second);

    assert_eq!(run_on(&sched, 0), a);
    assert_eq!(sched.platform().timer(0), ms_to_ns(10));

    let mut order = Vec::new();
    for turn in 1..=5 {
        order.push(fire_timer(&sched, 0));
        assert_eq!(sched.platform().timer(0), ms_to_ns(10 * (turn + 1)));
    }
    assert_eq!(
        order,
        vec![
            NextThread::Run(b),
            NextThread::Run(a),
            NextThread::Run(b),
            NextThread::Run(a),
            NextThread::Run(b),
        ]
    );
    assert_eq!(sched.thread_execution_time(a), Some(ms_to_ns(30)));
    assert_eq!(sched.thread_execution_time(b), Some(ms_to_ns(20)));
    assert_eq!(sched.get_stats().robin_dispatches, 6);
}

#[test]
fn test_early_timer_interrupt_keeps_decision() {
    let sched = laxity(1);
    let activity = sched.create_activity().unwrap();
    spawn(&sched, activity);
    run_on(&sched, 0);

    sched.platform().set_time(ms_to_ns(3));
    assert_eq!(sched.on_timer_interrupt(0), Ok(None));
    assert_eq!(sched.get_percpu_stats(0).unwrap().interrupts, 1);
}

#[test]
fn test_yield_passes_to_sibling() {
    let sched = laxity(1);
    let activity = sched.create_activity().unwrap();
    let first = spawn(&sched, activity);
    let second = spawn(&sched, activity);

    assert_eq!(run_on(&sched, 0), first);
    assert_eq!(sched.yield_now(0), Ok(NextThread::Run(second)));
    assert_eq!(sched.thread_state(first), Some(ThreadState::Runnable));
    sched.check_invariants().unwrap();
}

#[test]
fn test_io_interrupt_reschedules_only_on_request() {
    let sched = laxity(1);
    let activity = sched.create_activity().unwrap();
    let worker = spawn(&sched, activity);
    let reader = spawn(&sched, activity);

    assert_eq!(run_on(&sched, 0), worker);
    sched.set_state_waiting(reader, None).unwrap();
    assert_eq!(sched.on_io_interrupt(0), Ok(None));

    // The device handler wakes the reader; it goes near the front.
    assert_eq!(sched.wake(reader), Ok(true));
    assert!(sched.should_reschedule(0));
    assert_eq!(sched.on_io_interrupt(0), Ok(Some(NextThread::Run(reader))));
    sched.check_invariants().unwrap();
}

#[test]
fn test_cleanup_running_thread_is_reclaimed_on_reschedule() {
    let sched = laxity(1);
    let activity = sched.create_activity().unwrap();
    let thread = spawn(&sched, activity);
    run_on(&sched, 0);

    sched.cleanup_thread(thread).unwrap();
    assert_eq!(sched.thread_state(thread), Some(ThreadState::Stopped));
    assert_eq!(sched.cleanup_thread(thread), Err(SchedError::InvalidState));
    assert!(sched.should_reschedule(0));
    sched.check_invariants().unwrap();

    assert!(decide(&sched, 0).is_halt());
    assert_eq!(sched.thread_state(thread), None);
    assert_eq!(sched.cleanup_thread(thread), Err(SchedError::UnknownThread));
}

#[test]
fn test_activity_lives_until_last_reference() {
    let sched = laxity(1);
    let activity = sched.create_activity().unwrap();
    let thread = sched.create_thread(activity).unwrap();

    sched.release_activity(activity).unwrap();
    assert_eq!(sched.release_activity(activity), Err(SchedError::InvalidState));
    assert_eq!(sched.create_thread(activity), Err(SchedError::UnknownActivity));

    let info = sched.activity_info(activity).unwrap();
    assert_eq!(info.threads, 1);
    assert_eq!(info.refs, 1);

    sched.cleanup_thread(thread).unwrap();
    assert_eq!(sched.activity_info(activity), None);
    sched.check_invariants().unwrap();
}

#[test]
fn test_wake_of_non_waiting_thread() {
    let sched = laxity(1);
    let activity = sched.create_activity().unwrap();
    let thread = spawn(&sched, activity);
    assert_eq!(sched.wake(thread), Ok(false));
}

#[test]
fn test_wait_before_deschedule_is_cancelled_by_wake() {
    let sched = laxity(1);
    let activity = sched.create_activity().unwrap();
    let thread = spawn(&sched, activity);
    run_on(&sched, 0);

    sched.set_state_waiting(thread, None).unwrap();
    assert_eq!(sched.thread_state(thread), Some(ThreadState::Waiting));
    assert_eq!(sched.wake(thread), Ok(true));
    assert_eq!(sched.thread_state(thread), Some(ThreadState::Running));
    sched.check_invariants().unwrap();

    assert_eq!(decide(&sched, 0), NextThread::Run(thread));
}

#[test]
fn test_set_activity_moves_runnable_thread() {
    let sched = laxity(1);
    let first = sched.create_activity().unwrap();
    let second = sched.create_activity().unwrap();
    let thread = spawn(&sched, first);

    sched.set_activity(thread, second).unwrap();
    assert_eq!(sched.activity_info(first).unwrap().threads, 0);
    let info = sched.activity_info(second).unwrap();
    assert_eq!(info.threads, 1);
    assert_eq!(info.runnable, 1);
    sched.check_invariants().unwrap();

    assert_eq!(run_on(&sched, 0), thread);
}

#[test]
fn test_thread_table_full() {
    let config = SchedConfig::DEFAULT.with_max_threads(2);
    let sched = common::laxity_with(config, 1);
    let activity = sched.create_activity().unwrap();
    sched.create_thread(activity).unwrap();
    sched.create_thread(activity).unwrap();
    assert_eq!(sched.create_thread(activity), Err(SchedError::TableFull));
}

#[test]
fn test_round_robin_scheduler_runs_threads() {
    let sched = round_robin(1);
    let activity = sched.create_activity().unwrap();
    let thread = spawn(&sched, activity);
    assert_eq!(run_on(&sched, 0), thread);
}
