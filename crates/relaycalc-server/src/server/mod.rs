pub mod client;
pub mod config;
pub mod exchange_log;
pub mod listener;
pub mod pool;
pub mod service;
pub mod telemetry;

use std::time::Instant;

/// Whole milliseconds elapsed since `start`, saturating at `u64::MAX`.
pub(crate) fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
