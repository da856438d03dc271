//! Device timestamp unwrapping
//!
//! Boards stamp every notification with a 16-bit counter that rolls over.
//! The unwrapper counts rollovers so the SDK exposes a monotonic 64-bit
//! timestamp. The state must be reset whenever the board reconnects because
//! its clock restarts from zero.

/// Counter span of the device clock
pub const TIMESTAMP_SPAN: u64 = 1 << 16;

/// A previous value above this threshold followed by a smaller one is a rollover.
pub const NEAR_TO_END_THRESHOLD: u16 = (TIMESTAMP_SPAN - 100) as u16;

#[derive(Debug, Clone, Default)]
pub struct TimestampUnwrapper {
    last_timestamp: u16,
    wrap_count: u64,
}

impl TimestampUnwrapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw device timestamp and return its unwrapped value.
    pub fn unwrap(&mut self, timestamp: u16) -> u64 {
        if self.last_timestamp > NEAR_TO_END_THRESHOLD && self.last_timestamp > timestamp {
            self.wrap_count += 1;
        }
        self.last_timestamp = timestamp;
        self.wrap_count * TIMESTAMP_SPAN + u64::from(timestamp)
    }

    /// Forget all history (new connection).
    pub fn reset(&mut self) {
        self.last_timestamp = 0;
        self.wrap_count = 0;
    }

    pub fn wrap_count(&self) -> u64 {
        self.wrap_count
    }
}
