//! Frame-rate pacing for polled capture loops.

use std::time::{Duration, Instant};

/// Schedules capture ticks at a fixed period.
///
/// When a tick runs late the schedule restarts from the current time
/// instead of bursting catch-up ticks, so a stall never produces frames
/// faster than the target rate.
#[derive(Debug, Clone)]
pub struct FramePacer {
    period: Duration,
    next_tick: Instant,
}

impl FramePacer {
    /// A pacer for `fps` ticks per second, starting now.
    pub fn new(fps: u32) -> Self {
        Self::starting_at(fps, Instant::now())
    }

    pub fn starting_at(fps: u32, start: Instant) -> Self {
        Self {
            period: Duration::from_micros(1_000_000 / u64::from(fps.max(1))),
            next_tick: start,
        }
    }

    /// Length of one tick.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Advance the schedule by one period and return how long to sleep
    /// from `now`, or `None` (after resetting the schedule to `now`) if
    /// the next tick is already due.
    pub fn next_delay(&mut self, now: Instant) -> Option<Duration> {
        self.next_tick += self.period;
        if self.next_tick > now {
            Some(self.next_tick - now)
        } else {
            self.next_tick = now;
            None
        }
    }

    /// Sleep until the next tick.
    pub fn wait(&mut self) {
        if let Some(delay) = self.next_delay(Instant::now()) {
            std::thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_from_fps() {
        let start = Instant::now();
        assert_eq!(FramePacer::starting_at(30, start).period(), Duration::from_micros(33_333));
        assert_eq!(FramePacer::starting_at(120, start).period(), Duration::from_micros(8_333));
    }

    #[test]
    fn test_sleeps_remainder_of_period() {
        let start = Instant::now();
        let mut pacer = FramePacer::starting_at(50, start);

        // Work took 5ms of a 20ms tick.
        let delay = pacer.next_delay(start + Duration::from_millis(5));
        assert_eq!(delay, Some(Duration::from_millis(15)));

        // Second tick, work finished at 31ms; next tick is at 40ms.
        let delay = pacer.next_delay(start + Duration::from_millis(31));
        assert_eq!(delay, Some(Duration::from_millis(9)));
    }

    #[test]
    fn test_resets_after_stall_without_bursting() {
        let start = Instant::now();
        let mut pacer = FramePacer::starting_at(50, start);

        // A 500ms stall: behind schedule, so no sleep and a reset.
        let stalled = start + Duration::from_millis(500);
        assert_eq!(pacer.next_delay(stalled), None);

        // The following tick is a full period after the stall, not a
        // catch-up tick at 40ms.
        let delay = pacer.next_delay(stalled + Duration::from_millis(2));
        assert_eq!(delay, Some(Duration::from_millis(18)));
    }

    #[test]
    fn test_zero_fps_is_clamped() {
        let pacer = FramePacer::starting_at(0, Instant::now());
        assert_eq!(pacer.period(), Duration::from_secs(1));
    }
}
