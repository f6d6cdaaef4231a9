//! Kernel-style leveled logging for the scheduling core
//!
//! The scheduler has no console of its own. The kernel registers a sink
//! (serial, framebuffer, ring buffer...) with [`set_sink`] and, optionally, a
//! clock with [`set_clock`] for timestamps. Until a sink is registered every
//! message is dropped after the level check.

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use spin::Mutex;

use crate::time::{Time, NS_PER_SEC, NS_PER_US};

/// Receives every message that passes the level filter
pub type LogSink = fn(LogLevel, Time, fmt::Arguments<'_>);

/// Monotonic clock used to timestamp messages
pub type LogClock = fn() -> Time;

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::INFO.priority());
static SINK: Mutex<Option<LogSink>> = Mutex::new(None);
static CLOCK: Mutex<Option<LogClock>> = Mutex::new(None);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    PANIC,
    FATAL,
    ERROR,
    WARN,
    INFO,
    DEBUG,
    TRACE,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::PANIC => "PANIC",
            LogLevel::FATAL => "FATAL",
            LogLevel::ERROR => "ERROR",
            LogLevel::WARN => "WARN",
            LogLevel::INFO => "INFO",
            LogLevel::DEBUG => "DEBUG",
            LogLevel::TRACE => "TRACE",
        }
    }

    const fn priority(self) -> u8 {
        match self {
            LogLevel::PANIC => 0,
            LogLevel::FATAL => 1,
            LogLevel::ERROR => 2,
            LogLevel::WARN => 3,
            LogLevel::INFO => 4,
            LogLevel::DEBUG => 5,
            LogLevel::TRACE => 6,
        }
    }

    fn from_priority(value: u8) -> Self {
        match value {
            0 => LogLevel::PANIC,
            1 => LogLevel::FATAL,
            2 => LogLevel::ERROR,
            3 => LogLevel::WARN,
            4 => LogLevel::INFO,
            5 => LogLevel::DEBUG,
            _ => LogLevel::TRACE,
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        if value.eq_ignore_ascii_case("panic") {
            Some(LogLevel::PANIC)
        } else if value.eq_ignore_ascii_case("fatal") {
            Some(LogLevel::FATAL)
        } else if value.eq_ignore_ascii_case("error") {
            Some(LogLevel::ERROR)
        } else if value.eq_ignore_ascii_case("warn") || value.eq_ignore_ascii_case("warning") {
            Some(LogLevel::WARN)
        } else if value.eq_ignore_ascii_case("info") {
            Some(LogLevel::INFO)
        } else if value.eq_ignore_ascii_case("debug") {
            Some(LogLevel::DEBUG)
        } else if value.eq_ignore_ascii_case("trace") {
            Some(LogLevel::TRACE)
        } else {
            None
        }
    }
}

/// Whether a message at `level` would currently be emitted
#[inline]
pub fn enabled(level: LogLevel) -> bool {
    level.priority() <= LOG_LEVEL.load(Ordering::Relaxed)
}

pub fn log(level: LogLevel, args: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }

    // Copy the hooks out so a sink that logs cannot deadlock on them.
    let sink = *SINK.lock();
    let Some(sink) = sink else {
        return;
    };
    let clock = *CLOCK.lock();
    let timestamp = clock.map(|now| now()).unwrap_or(0);

    sink(level, timestamp, args);
}

pub fn set_max_level(level: LogLevel) {
    LOG_LEVEL.store(level.priority(), Ordering::Relaxed);
}

pub fn max_level() -> LogLevel {
    LogLevel::from_priority(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Install the output sink. Returns the previous sink.
pub fn set_sink(sink: Option<LogSink>) -> Option<LogSink> {
    core::mem::replace(&mut *SINK.lock(), sink)
}

/// Install the timestamp clock. Returns the previous clock.
pub fn set_clock(clock: Option<LogClock>) -> Option<LogClock> {
    core::mem::replace(&mut *CLOCK.lock(), clock)
}

/// Find a `log=` / `loglevel=` directive on the kernel command line
pub fn parse_level_directive(cmdline: &str) -> Option<LogLevel> {
    for token in cmdline.split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            if key.eq_ignore_ascii_case("log") || key.eq_ignore_ascii_case("loglevel") {
                if let Some(level) = LogLevel::from_str(value) {
                    return Some(level);
                }
            }
        }
    }
    None
}

/// One formatted log line: `[    1.000250] [INFO ] message`
pub struct LogLine<'a> {
    pub level: LogLevel,
    pub timestamp: Time,
    pub args: fmt::Arguments<'a>,
}

impl fmt::Display for LogLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}] {}",
            TimestampDisplay {
                nanoseconds: self.timestamp
            },
            LevelDisplay(self.level),
            self.args
        )
    }
}

struct TimestampDisplay {
    nanoseconds: Time,
}

impl fmt::Display for TimestampDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ns = self.nanoseconds.max(0);
        let seconds = ns / NS_PER_SEC;
        let micros = (ns % NS_PER_SEC) / NS_PER_US;
        write!(f, "{:>5}.{:06}", seconds, micros)
    }
}

struct LevelDisplay(LogLevel);

impl fmt::Display for LevelDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<5}", self.0.as_str())
    }
}
