use std::time::Duration;

/// Tick counter and busy-time accumulator behind the load ratio.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LoadAccumulator {
    pub(crate) ticks: u64,
    pub(crate) busy: Duration,
    pub(crate) skipped: u64,
    pub(crate) interval: Duration,
    /// Sum of the interval in force at each recorded tick.
    scheduled: Duration,
}

impl LoadAccumulator {
    /// Zero every counter and adopt `interval`. Used when a scheduler first starts.
    pub(crate) fn reset(&mut self, interval: Duration) {
        *self = Self {
            interval,
            ..Self::default()
        };
    }

    /// Adopt a new interval for ticks recorded from now on; counters are kept.
    pub(crate) fn retime(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Record one fully processed tick.
    pub(crate) fn record_tick(&mut self, busy: Duration) {
        self.ticks += 1;
        self.busy += busy;
        self.scheduled = self.scheduled.saturating_add(self.interval);
    }

    pub(crate) fn record_skipped(&mut self, skipped: u64) {
        self.skipped = self.skipped.saturating_add(skipped);
    }

    /// Tick time elapsed: `interval × ticks` while the interval is unchanged,
    /// each tick counted at the interval it was recorded under otherwise.
    pub(crate) fn elapsed(&self) -> Duration {
        self.scheduled
    }

    /// Busy time over elapsed time; 0 when no time has elapsed.
    pub(crate) fn ratio(&self) -> f64 {
        let elapsed = self.elapsed();
        if elapsed.is_zero() {
            return 0.0;
        }
        self.busy.as_secs_f64() / elapsed.as_secs_f64()
    }
}
