use std::time::Duration;

use tokio::time::Instant;

/// Wall-clock pacer for a fixed-period control loop.
///
/// Each call to [`Clock::tick`] reports the time elapsed since the previous
/// tick, which is what the resource physics integrate over. The sleep before
/// the next tick is the period minus the time spent processing, so slow ticks
/// do not stretch the loop.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use vpp_dispatch::sim::clock::Clock;
///
/// let clock = Clock::new(Duration::from_millis(500));
/// assert_eq!(clock.sleep_after(Duration::from_millis(120)), Duration::from_millis(380));
/// assert_eq!(clock.sleep_after(Duration::from_secs(2)), Duration::ZERO);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    /// Target time between ticks.
    period: Duration,
    /// Instant of the previous tick.
    last: Instant,
}

impl Clock {
    /// Creates a clock whose first tick measures from now.
    ///
    /// # Arguments
    ///
    /// * `period` - Target time between ticks
    pub fn new(period: Duration) -> Self {
        Self::starting_at(period, Instant::now())
    }

    pub fn starting_at(period: Duration, start: Instant) -> Self {
        Self { period, last: start }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Marks a tick at `now` and returns the time since the previous one.
    ///
    /// A `now` earlier than the previous tick counts as zero elapsed time.
    pub fn tick(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last);
        self.last = self.last.max(now);
        elapsed
    }

    /// Sleep needed after spending `busy` on a tick.
    pub fn sleep_after(&self, busy: Duration) -> Duration {
        self.period.saturating_sub(busy)
    }

    /// When the next tick is due.
    pub fn deadline(&self) -> Instant {
        self.last + self.period
    }
}
