use std::collections::VecDeque;

/// Samples older than this (relative to the newest) fall out of the window.
pub const WINDOW_SECS: f64 = 2.0;

/// Minimum spacing between rate/ETA refreshes delivered to a renderer.
pub const NOTIFY_INTERVAL_SECS: f64 = 0.25;

/// Time-bounded window of (seconds, cumulative bytes) samples.
///
/// Timestamps are seconds relative to an arbitrary per-transfer epoch and
/// must be non-decreasing, as must the byte counts. The transport produces
/// both from a single reader, so this holds by construction; out-of-order
/// input is not defended against.
pub struct RateWindow {
    window_secs: f64,
    samples: VecDeque<(f64, u64)>,
}

impl RateWindow {
    pub fn new() -> Self {
        Self::with_window(WINDOW_SECS)
    }

    pub fn with_window(window_secs: f64) -> Self {
        Self {
            window_secs,
            samples: VecDeque::with_capacity(64),
        }
    }

    /// Append a sample, then trim everything older than the window from
    /// the front. Samples arrive time-ordered, so eviction is a prefix trim.
    pub fn record(&mut self, timestamp: f64, cumulative_bytes: u64) {
        self.samples.push_back((timestamp, cumulative_bytes));
        let cutoff = timestamp - self.window_secs;
        while let Some(&(t, _)) = self.samples.front() {
            if t < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Smoothed throughput in bytes/sec over the retained span.
    ///
    /// None with fewer than two samples, or when the span covers zero
    /// elapsed time (a burst of events can share a timestamp).
    pub fn current(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return None;
        }
        let (t_first, b_first) = *self.samples.front().unwrap();
        let (t_last, b_last) = *self.samples.back().unwrap();
        let elapsed = t_last - t_first;
        if elapsed <= 0.0 {
            return None;
        }
        Some((b_last - b_first) as f64 / elapsed)
    }
}

/// Rate-limits consumer notifications independent of how often raw
/// progress events arrive (which can be sub-millisecond).
pub struct NotifyThrottle {
    interval_secs: f64,
    last_fire: Option<f64>,
}

impl NotifyThrottle {
    pub fn new() -> Self {
        Self::with_interval(NOTIFY_INTERVAL_SECS)
    }

    pub fn with_interval(interval_secs: f64) -> Self {
        Self {
            interval_secs,
            last_fire: None,
        }
    }

    /// True at most once per interval; the first call always fires.
    pub fn should_fire(&mut self, now: f64) -> bool {
        match self.last_fire {
            Some(last) if now - last < self.interval_secs => false,
            _ => {
                self.last_fire = Some(now);
                true
            }
        }
    }
}

/// Seconds left at the current rate. None when the rate is unavailable or
/// non-positive, or when the total size is unknown; a sentinel, not an error.
pub fn estimate_remaining(rate: Option<f64>, total_bytes: Option<u64>, bytes_sent: u64) -> Option<f64> {
    let rate = rate?;
    let total = total_bytes?;
    if rate <= 0.0 {
        return None;
    }
    Some(total.saturating_sub(bytes_sent) as f64 / rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_over_two_samples() {
        let mut w = RateWindow::new();
        w.record(0.0, 0);
        w.record(1.0, 1_000_000);
        assert_eq!(w.current(), Some(1_000_000.0));
    }

    #[test]
    fn single_sample_has_no_rate() {
        let mut w = RateWindow::new();
        w.record(0.5, 4096);
        assert_eq!(w.current(), None);
    }

    #[test]
    fn same_timestamp_burst_has_no_rate() {
        let mut w = RateWindow::new();
        w.record(1.0, 100);
        w.record(1.0, 200);
        assert_eq!(w.current(), None);
    }

    #[test]
    fn rate_is_non_negative_for_monotonic_input() {
        let mut w = RateWindow::new();
        let samples = [(0.0, 0u64), (0.3, 10), (0.3, 10), (0.9, 500), (1.4, 500), (1.9, 9001)];
        for (t, b) in samples {
            w.record(t, b);
            if let Some(rate) = w.current() {
                assert!(rate >= 0.0);
            }
        }
    }

    #[test]
    fn eviction_keeps_samples_within_window() {
        let mut w = RateWindow::new();
        for i in 0..50u64 {
            let t = i as f64 * 0.1;
            w.record(t, i * 1000);
            let newest = w.samples.back().unwrap().0;
            for &(sample_t, _) in &w.samples {
                assert!(newest - sample_t <= WINDOW_SECS + 1e-9);
            }
        }
        assert!(w.samples.len() >= 2);
    }

    #[test]
    fn stall_longer_than_window_drops_the_rate() {
        let mut w = RateWindow::new();
        w.record(0.0, 0);
        w.record(0.5, 10_000);
        assert!(w.current().is_some());
        w.record(5.0, 10_000);
        // everything before the stall is outside the window now
        assert_eq!(w.current(), None);
    }

    #[test]
    fn throttle_first_call_fires() {
        let mut th = NotifyThrottle::new();
        assert!(th.should_fire(17.0));
    }

    #[test]
    fn throttle_fires_at_most_once_per_interval() {
        let mut th = NotifyThrottle::new();
        assert!(th.should_fire(0.0));
        assert!(!th.should_fire(0.1));
        assert!(!th.should_fire(0.249));
        assert!(th.should_fire(0.25));
        assert!(!th.should_fire(0.4));
        assert!(th.should_fire(0.51));
    }

    #[test]
    fn throttle_fire_times_are_spaced_for_any_sequence() {
        let mut th = NotifyThrottle::new();
        let mut fires: Vec<f64> = Vec::new();
        for i in 0..400 {
            let now = i as f64 * 0.01;
            if th.should_fire(now) {
                fires.push(now);
            }
        }
        for pair in fires.windows(2) {
            assert!(pair[1] - pair[0] >= NOTIFY_INTERVAL_SECS - 1e-9);
        }
        assert!(!fires.is_empty());
    }

    #[test]
    fn remaining_from_rate_and_total() {
        let remaining = estimate_remaining(Some(1_000_000.0), Some(5_000_000), 1_000_000);
        assert_eq!(remaining, Some(4.0));
    }

    #[test]
    fn remaining_unknown_without_total() {
        assert_eq!(estimate_remaining(Some(1e6), None, 123), None);
    }

    #[test]
    fn remaining_unknown_without_positive_rate() {
        assert_eq!(estimate_remaining(None, Some(1000), 0), None);
        assert_eq!(estimate_remaining(Some(0.0), Some(1000), 0), None);
    }

    #[test]
    fn remaining_is_zero_once_total_is_reached() {
        assert_eq!(estimate_remaining(Some(100.0), Some(1000), 1000), Some(0.0));
    }
}
