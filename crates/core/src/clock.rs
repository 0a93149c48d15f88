use std::time::{SystemTime, UNIX_EPOCH};

use crate::CoreError;

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// Produces `created_time`/`last_edited_time` stamps that never go backwards
/// within one client, even when two edits land in the same millisecond.
#[derive(Debug, Default)]
pub struct EditClock {
    last_ms: u64,
}

impl EditClock {
    pub fn new() -> Self {
        Self { last_ms: 0 }
    }

    pub fn starting_at(last_ms: u64) -> Self {
        Self { last_ms }
    }

    pub fn tick(&mut self) -> Result<u64, CoreError> {
        let now = physical_now()?;
        self.last_ms = if now > self.last_ms { now } else { self.last_ms + 1 };
        Ok(self.last_ms)
    }

    /// The stamp right after the last one, without reading the wall clock.
    /// Records created by one edit take consecutive stamps in creation order.
    pub fn follow(&mut self) -> u64 {
        self.last_ms += 1;
        self.last_ms
    }

    pub fn last(&self) -> u64 {
        self.last_ms
    }
}
