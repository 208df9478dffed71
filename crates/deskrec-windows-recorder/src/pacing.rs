//! Drift-free frame pacing.
//!
//! Deadlines are anchored to the start instant: `deadline(n) = start + n·interval`.
//! An iteration that overruns its slot just gets a zero sleep; later
//! deadlines do not move.

use std::time::{Duration, Instant};

/// Outcome of one [`FrameClock::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub slept: Duration,
    /// How far past the deadline the loop already was (zero when on time).
    pub lag:   Duration,
}

#[derive(Debug, Clone)]
pub struct FrameClock {
    start:    Instant,
    interval: Duration,
    frame:    u64,
}

impl FrameClock {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self { start, interval, frame: 0 }
    }

    pub fn start_now(interval: Duration) -> Self {
        Self::new(Instant::now(), interval)
    }

    /// Number of deadlines passed so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn deadline(&self, n: u64) -> Instant {
        let nanos = (self.interval.as_nanos()).saturating_mul(n as u128);
        self.start + Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }

    /// Advance to the next deadline and return it.
    pub fn tick(&mut self) -> Instant {
        self.frame += 1;
        self.deadline(self.frame)
    }

    /// Block until the next deadline.
    pub fn wait(&mut self) -> Pacing {
        let deadline = self.tick();
        let now = Instant::now();
        if deadline > now {
            let slept = deadline - now;
            std::thread::sleep(slept);
            Pacing { slept, lag: Duration::ZERO }
        } else {
            Pacing { slept: Duration::ZERO, lag: now - deadline }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlines_are_anchored_to_start() {
        let start = Instant::now();
        let interval = Duration::from_nanos(33_333_333);
        let mut clock = FrameClock::new(start, interval);

        for n in 1..=90u64 {
            assert_eq!(clock.tick(), start + Duration::from_nanos(33_333_333 * n));
        }
        assert_eq!(clock.frame(), 90);
        assert_eq!(clock.deadline(0), start);
    }

    #[test]
    fn overrun_does_not_shift_later_deadlines() {
        let interval = Duration::from_millis(10);
        let start = Instant::now()
            .checked_sub(Duration::from_millis(500))
            .expect("monotonic clock older than 500ms");
        let mut clock = FrameClock::new(start, interval);

        // Deadline 1 was 490ms ago: no sleep, lag reported.
        let pacing = clock.wait();
        assert_eq!(pacing.slept, Duration::ZERO);
        assert!(pacing.lag >= Duration::from_millis(490));

        // Schedule is unchanged by the overrun.
        assert_eq!(clock.deadline(2), start + Duration::from_millis(20));
        assert_eq!(clock.tick(), start + Duration::from_millis(20));
    }

    #[test]
    fn sleeps_until_future_deadline() {
        let interval = Duration::from_millis(20);
        let mut clock = FrameClock::start_now(interval);

        let pacing = clock.wait();
        assert!(pacing.slept <= interval);
        assert!(Instant::now() >= clock.deadline(1));
    }
}
