//! System Clock Adapter
//!
//! Implements the `TimeSource` port on top of the operating system clock.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::ports::outbound::TimeSource;

/// Wall clock backed by `SystemTime`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_millis(&self) -> u64 {
        // A clock set before 1970 reads as the epoch.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}
