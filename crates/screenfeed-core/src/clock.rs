//! Monotonic timestamp source shared by all capturers.

use std::sync::OnceLock;
use std::time::Instant;

static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Millisecond clock measured from a fixed epoch.
///
/// Video capturers stamp frames against the process-wide epoch, the audio
/// capturer against the moment its session started. Both read the same
/// monotonic source, so the two bases differ only by a constant offset.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    /// A clock whose epoch is shared by every `Clock::process()` in the
    /// process. The epoch is fixed the first time this is called.
    pub fn process() -> Self {
        Self {
            epoch: *PROCESS_EPOCH.get_or_init(Instant::now),
        }
    }

    /// A clock whose epoch is now.
    pub fn starting_now() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the epoch.
    pub fn now_ms(&self) -> u64 {
        self.ms_at(Instant::now())
    }

    /// Milliseconds between the epoch and `instant`, zero if `instant`
    /// precedes the epoch.
    pub fn ms_at(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(self.epoch).as_millis() as u64
    }

    /// The instant this clock counts from.
    pub fn epoch(&self) -> Instant {
        self.epoch
    }
}
