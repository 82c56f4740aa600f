//! Wall-clock and process-time natives.
//!
//! The reference VM's native table names these the opposite of what a
//! reader expects: `clock()` returns wall-clock seconds since the epoch
//! (C's `time()`), while `wallClock()` returns process CPU seconds (C's
//! `clock() / CLOCKS_PER_SEC`). Kept as-is rather than "fixed" since the
//! accompanying fixtures assert on this exact naming.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

use crate::value::Value;

static PROCESS_START: Lazy<Instant> = Lazy::new(Instant::now);

pub fn clock(_args: &[Value]) -> Result<Value, String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| "System clock is before the Unix epoch.".to_string())?;
    Ok(Value::Number(now.as_secs_f64()))
}

/// Rust's standard library has no portable per-process CPU-time clock, so
/// this approximates it with wall-clock elapsed time since process start.
pub fn wall_clock(_args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(PROCESS_START.elapsed().as_secs_f64()))
}
