//! Scheduler subsystem
//!
//! Deadline- and reservation-aware CPU scheduling for NexaOS.
//!
//! Threads are grouped into activities, and activities share the CPU
//! round-robin with a fixed slice each. On top of that a thread may declare
//! a one-shot constraint ("I need `estimate` of CPU before `deadline`").
//! Admitted constraints become reservations, which the policy may dispatch
//! ahead of the round-robin ring. With [`LaxityPolicy`] that is
//! earliest-laxity-first, laxity being `deadline - remaining estimate`.
//!
//! ## Concurrency
//!
//! All shared state sits in one [`SchedState`] behind an interrupt-masking
//! spinlock. Per-processor flags that other processors poke (need-resched,
//! idle, parked) are atomics outside the lock. Entry points never block;
//! cross-processor effects are delivered as reschedule requests and IPIs
//! after the lock is dropped.
//!
//! ## Module Organization
//!
//! - `arena`: generational slot storage; keys double as weak references
//! - `queue`: index-linked circular lists
//! - `heap`: laxity min-heap with removal by handle
//! - `types`: handles, states, request/report types
//! - `thread`, `activity`, `reservation`: the three scheduled objects
//! - `sleep`: wake-time ordered sleep queue
//! - `table`: global locked state
//! - `percpu`: per-processor dispatch context and lock-free counters
//! - `policy`: the [`SchedPolicy`] seam and its two policies
//! - `admission`: constraint admission, end, folding and hand-off
//! - `process`: thread/activity lifecycle, wait and wake
//! - `core`: the reschedule algorithm and interrupt entry points
//! - `smp`: freeze/thaw
//! - `stats`: counters, queries and debug dumps
//! - `invariants`: consistency checker

mod activity;
mod admission;
mod arena;
mod core;
mod heap;
mod invariants;
pub mod percpu;
mod policy;
mod process;
mod queue;
mod reservation;
mod sleep;
#[cfg(feature = "smp")]
mod smp;
mod stats;
mod table;
mod thread;
mod types;

pub use self::core::{LaxityScheduler, RoundRobinScheduler, Scheduler};
pub use arena::ArenaError;
pub use heap::LaxityKey;
pub use invariants::CheckResult;
pub use percpu::PerCpuStats;
pub use policy::{LaxityPolicy, RoundRobinPolicy, SchedPolicy};
pub use stats::SchedulerStats;
pub use table::SchedState;
pub use types::{
    ActivityId, ActivityInfo, ConstraintEnd, ConstraintRequest, CpuMask, Deadline, NextThread,
    Owner, QueueTag, ReservationId, ReservationInfo, TaskHandle, ThreadId, ThreadState, MAX_CPUS,
};
