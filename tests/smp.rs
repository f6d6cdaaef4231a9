//! Multiprocessor tests
//!
//! Cross-processor wake signalling and freeze/thaw on the mock platform.

#![cfg(feature = "smp")]

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use common::{decide, fire_timer, laxity, run_on, spawn};
use nexa_sched::scheduler::{ConstraintRequest, Deadline, ThreadState};
use nexa_sched::time::ms_to_ns;
use nexa_sched::{CpuMask, NextThread};

#[test]
fn test_processors_take_different_activities() {
    let sched = laxity(2);
    let editor = sched.create_activity().unwrap();
    let compiler = sched.create_activity().unwrap();
    let first = spawn(&sched, editor);
    let second = spawn(&sched, compiler);

    assert_eq!(run_on(&sched, 0), first);
    assert_eq!(run_on(&sched, 1), second);
    assert_eq!(sched.current_thread(0), Ok(Some(first)));
    assert_eq!(sched.current_thread(1), Ok(Some(second)));
}

#[test]
fn test_running_thread_is_not_picked_twice() {
    let sched = laxity(2);
    let activity = sched.create_activity().unwrap();
    let thread = spawn(&sched, activity);

    assert_eq!(run_on(&sched, 0), thread);
    assert!(decide(&sched, 1).is_halt());
    assert!(sched.is_idle(1).unwrap());
}

#[test]
fn test_halted_processor_is_signalled_for_new_work() {
    let sched = laxity(2);
    assert!(decide(&sched, 0).is_halt());
    assert!(decide(&sched, 1).is_halt());
    sched.platform().take_signals();

    let activity = sched.create_activity().unwrap();
    spawn(&sched, activity);

    let mut expected = CpuMask::empty();
    expected.set(0);
    expected.set(1);
    assert_eq!(sched.platform().take_signals(), vec![expected]);
    assert!(sched.should_reschedule(0));
    assert!(sched.should_reschedule(1));
}

#[test]
fn test_busy_processor_is_not_signalled() {
    let sched = laxity(2);
    let activity = sched.create_activity().unwrap();
    spawn(&sched, activity);
    run_on(&sched, 0);
    assert!(decide(&sched, 1).is_halt());
    sched.platform().take_signals();

    let other = sched.create_activity().unwrap();
    spawn(&sched, other);

    let mut expected = CpuMask::empty();
    expected.set(1);
    assert_eq!(sched.platform().take_signals(), vec![expected]);
}

#[test]
fn test_constraint_on_remote_thread_kicks_its_processor() {
    let sched = laxity(2);
    let activity = sched.create_activity().unwrap();
    let thread = spawn(&sched, activity);
    assert_eq!(run_on(&sched, 1), thread);
    assert!(!sched.should_reschedule(1));

    sched
        .begin_constraint(
            thread,
            ConstraintRequest::new(ms_to_ns(1), Deadline::Relative(ms_to_ns(4))),
        )
        .unwrap();
    assert!(sched.should_reschedule(1));
    assert_eq!(decide(&sched, 1), NextThread::Run(thread));
    assert_eq!(sched.get_stats().reservation_dispatches, 1);
}

#[test]
fn test_requeued_reservation_leaves_other_slices_alone() {
    let sched = laxity(2);
    let background = sched.create_activity().unwrap();
    let media = sched.create_activity().unwrap();
    let busy = spawn(&sched, background);
    let player = spawn(&sched, media);

    sched
        .begin_constraint(
            player,
            ConstraintRequest::new(ms_to_ns(6), Deadline::Absolute(ms_to_ns(50))),
        )
        .unwrap();
    assert_eq!(run_on(&sched, 0), player);
    assert_eq!(run_on(&sched, 1), busy);
    assert_eq!(sched.platform().timer(1), ms_to_ns(10));

    // The player goes back on the queue and is picked again right away.
    sched.platform().set_time(ms_to_ns(2));
    assert_eq!(sched.yield_now(0), Ok(NextThread::Run(player)));
    assert_eq!(sched.platform().timer(0), ms_to_ns(6));
    sched.check_invariants().unwrap();

    // cpu1 keeps the rest of its round-robin turn.
    assert_eq!(decide(&sched, 1), NextThread::Run(busy));
    assert_eq!(sched.platform().timer(1), ms_to_ns(10));
}

#[test]
fn test_woken_thread_moves_to_idle_processor() {
    let sched = laxity(2);
    let activity = sched.create_activity().unwrap();
    let thread = spawn(&sched, activity);
    assert_eq!(run_on(&sched, 0), thread);

    sched
        .set_state_waiting(thread, Some(ms_to_ns(2)))
        .unwrap();
    assert!(decide(&sched, 0).is_halt());
    assert!(decide(&sched, 1).is_halt());
    assert_eq!(sched.thread_state(thread), Some(ThreadState::Waiting));

    // Whichever processor's timer fires first picks the sleeper up.
    assert_eq!(fire_timer(&sched, 1), NextThread::Run(thread));
    assert_eq!(sched.current_thread(1), Ok(Some(thread)));
}

#[test]
fn test_freeze_parks_every_processor() {
    let sched = laxity(2);
    let activity = sched.create_activity().unwrap();
    spawn(&sched, activity);
    spawn(&sched, activity);
    run_on(&sched, 0);
    run_on(&sched, 1);

    assert_eq!(sched.park_point(0), Ok(false));
    sched.request_freeze();
    assert!(sched.freeze_requested());
    assert!(sched.should_reschedule(0));
    assert!(sched.should_reschedule(1));

    let resumed = AtomicBool::new(false);
    thread::scope(|scope| {
        let workers: Vec<_> = (0..2)
            .map(|cpu| {
                let sched = &sched;
                let resumed = &resumed;
                scope.spawn(move || {
                    let parked = sched.park_point(cpu).unwrap();
                    assert!(resumed.load(Ordering::SeqCst));
                    parked
                })
            })
            .collect();

        while !sched.is_frozen() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sched.parked_cpus().count(), 2);

        resumed.store(true, Ordering::SeqCst);
        sched.thaw();
        for worker in workers {
            assert!(worker.join().unwrap());
        }
    });

    assert!(!sched.freeze_requested());
    assert!(sched.parked_cpus().is_empty());
    assert!(sched.should_reschedule(0));
    sched.check_invariants().unwrap();
}
