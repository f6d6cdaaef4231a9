//! Shared fixtures for the integration tests

#![allow(dead_code)]

pub mod mock;

use nexa_sched::scheduler::{ActivityId, ThreadId};
use nexa_sched::time::Time;
use nexa_sched::{
    LaxityScheduler, NextThread, RoundRobinScheduler, SchedConfig, SchedPolicy, Scheduler,
};

pub use mock::MockPlatform;

pub type TestScheduler<P> = Scheduler<P, MockPlatform>;

pub fn laxity(num_cpus: usize) -> LaxityScheduler<MockPlatform> {
    laxity_with(SchedConfig::DEFAULT, num_cpus)
}

pub fn laxity_with(config: SchedConfig, num_cpus: usize) -> LaxityScheduler<MockPlatform> {
    Scheduler::new(MockPlatform::new(num_cpus), config, num_cpus).unwrap()
}

pub fn round_robin(num_cpus: usize) -> RoundRobinScheduler<MockPlatform> {
    Scheduler::new(MockPlatform::new(num_cpus), SchedConfig::DEFAULT, num_cpus).unwrap()
}

/// Create and start a thread in `activity`
pub fn spawn<P: SchedPolicy>(sched: &TestScheduler<P>, activity: ActivityId) -> ThreadId {
    let thread = sched.create_thread(activity).unwrap();
    sched.start_thread(thread).unwrap();
    thread
}

/// Ask for a decision on `cpu` and check the state stayed consistent
pub fn decide<P: SchedPolicy>(sched: &TestScheduler<P>, cpu: usize) -> NextThread {
    let next = sched.next_thread(cpu).unwrap();
    sched.check_invariants().unwrap();
    next
}

pub fn run_on<P: SchedPolicy>(sched: &TestScheduler<P>, cpu: usize) -> ThreadId {
    match decide(sched, cpu) {
        NextThread::Run(thread) => thread,
        NextThread::Halt { wake_at } => panic!("cpu{} halted until {}", cpu, wake_at),
    }
}

/// Move the clock to `cpu`'s programmed timer and deliver the interrupt
pub fn fire_timer<P: SchedPolicy>(sched: &TestScheduler<P>, cpu: usize) -> NextThread {
    let at = sched.platform().timer(cpu);
    sched.platform().set_time(at);
    let next = sched
        .on_timer_interrupt(cpu)
        .unwrap()
        .expect("timer interrupt at the programmed deadline must reschedule");
    sched.check_invariants().unwrap();
    next
}

pub fn now<P: SchedPolicy>(sched: &TestScheduler<P>) -> Time {
    sched.platform().now()
}
