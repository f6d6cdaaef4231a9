//! NexaOS scheduling core
//!
//! Deadline- and reservation-aware CPU scheduler for the NexaOS kernel.
//! The crate decides, on every timer/IO interrupt and every explicit yield,
//! which thread runs next on each processor.
//!
//! ## Scheduling classes
//!
//! - **Round-robin**: threads are grouped into activities; activities share
//!   the CPU in a ring with a fixed slice each.
//! - **One-shot constraints**: a thread may reserve an amount of CPU time
//!   before a deadline. Admitted reservations are dispatched
//!   earliest-laxity-first ahead of the round-robin ring.
//!
//! Hardware access (clock, timer programming, IPIs, context switch) is
//! consumed through the [`hal::Platform`] trait, so the same code runs in the
//! kernel and in host-side tests.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod hal;
pub mod logger;
pub mod scheduler;
pub mod sync;
pub mod time;

pub use config::SchedConfig;
pub use error::SchedError;
pub use hal::Platform;
pub use scheduler::{
    CpuMask, LaxityPolicy, LaxityScheduler, NextThread, RoundRobinPolicy, RoundRobinScheduler,
    SchedPolicy, Scheduler,
};
pub use time::Time;

// ===========================================================================
// Logging macros
// ===========================================================================

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::logger::log($level, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::FATAL, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::ERROR, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::WARN, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::INFO, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::DEBUG, $($arg)*);
    }};
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::TRACE, $($arg)*);
    }};
}
