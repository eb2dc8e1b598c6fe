//! A small leveled-logging facility: a `log!(LogLevel, "...")` call site
//! gated by an environment variable, rather than a dependency on the
//! `log` crate.

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};

#[repr(usize)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum LogLevel {
    LogFatal = 0,
    LogError = 1,
    LogWarn = 2,
    LogInfo = 3,
    LogDebug = 4,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::LogFatal => "FATAL",
            LogLevel::LogError => "ERROR",
            LogLevel::LogWarn => "WARN",
            LogLevel::LogInfo => "INFO",
            LogLevel::LogDebug => "DEBUG",
        }
    }
}

static THRESHOLD: AtomicUsize = AtomicUsize::new(LogLevel::LogWarn as usize);

/// Reads `TRACEHOUND_LOG` (one of fatal/error/warn/info/debug) once and
/// raises the in-process threshold. Called from the example driver when
/// `-v` flags are present; the library itself defaults to `LogWarn`.
pub fn init_from_env() {
    if let Ok(val) = env::var("TRACEHOUND_LOG") {
        set_level(match val.to_lowercase().as_str() {
            "fatal" => LogLevel::LogFatal,
            "error" => LogLevel::LogError,
            "warn" => LogLevel::LogWarn,
            "info" => LogLevel::LogInfo,
            "debug" => LogLevel::LogDebug,
            _ => return,
        });
    }
}

pub fn set_level(level: LogLevel) {
    THRESHOLD.store(level as usize, Ordering::Relaxed);
}

pub fn raise_level() {
    let cur = THRESHOLD.load(Ordering::Relaxed);
    if cur < LogLevel::LogDebug as usize {
        THRESHOLD.store(cur + 1, Ordering::Relaxed);
    }
}

#[doc(hidden)]
pub fn enabled(level: LogLevel) -> bool {
    (level as usize) <= THRESHOLD.load(Ordering::Relaxed)
}

#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        if $crate::log::enabled($level) {
            eprintln!("[{}] {}", $crate::log::level_tag($level), format!($($arg)*));
        }
    };
}

#[doc(hidden)]
pub fn level_tag(level: LogLevel) -> &'static str {
    level.as_str()
}
