//! Batch progress and ETA
//!
//! ETA = remaining items × rolling mean latency of the last
//! [`ETA_WINDOW`] completed inferences ÷ worker count.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Completed-item latencies kept for the rolling ETA
pub const ETA_WINDOW: usize = 20;

#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    completed: usize,
    concurrency: usize,
    window: VecDeque<Duration>,
    latency_sum: Duration,
    latency_samples: u32,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize, concurrency: usize) -> Self {
        Self {
            total,
            completed: 0,
            concurrency: concurrency.max(1),
            window: VecDeque::with_capacity(ETA_WINDOW),
            latency_sum: Duration::ZERO,
            latency_samples: 0,
            started: Instant::now(),
        }
    }

    /// Count one finished item; `latency` is `None` for items that made no
    /// inference call (skipped, already done)
    pub fn record(&mut self, latency: Option<Duration>) {
        self.completed += 1;
        if let Some(latency) = latency {
            if self.window.len() == ETA_WINDOW {
                self.window.pop_front();
            }
            self.window.push_back(latency);
            self.latency_sum += latency;
            self.latency_samples += 1;
        }
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.completed)
    }

    /// Mean latency over every recorded inference
    pub fn mean_latency(&self) -> Option<Duration> {
        (self.latency_samples > 0).then(|| self.latency_sum / self.latency_samples)
    }

    fn rolling_latency(&self) -> Option<Duration> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.window.iter().sum::<Duration>() / self.window.len() as u32)
    }

    /// Estimated seconds to completion; `None` until a latency is known
    pub fn eta_seconds(&self) -> Option<u64> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Some(0);
        }
        let per_item = self.rolling_latency()?;
        let secs = per_item.as_secs_f64() * remaining as f64 / self.concurrency as f64;
        Some(secs.ceil() as u64)
    }

    pub fn items_per_second(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.completed as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Whether a periodic progress line is due after the latest record
    pub fn should_report(&self, interval: usize) -> bool {
        self.completed == self.total || (interval > 0 && self.completed % interval == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eta_unknown_until_first_latency() {
        let mut tracker = ProgressTracker::new(10, 2);
        assert_eq!(tracker.eta_seconds(), None);
        tracker.record(None);
        assert_eq!(tracker.eta_seconds(), None);
        tracker.record(Some(Duration::from_secs(4)));
        // 8 remaining × 4s ÷ 2 workers
        assert_eq!(tracker.eta_seconds(), Some(16));
    }

    #[test]
    fn test_eta_uses_rolling_window() {
        let mut tracker = ProgressTracker::new(100, 1);
        for _ in 0..ETA_WINDOW {
            tracker.record(Some(Duration::from_secs(10)));
        }
        for _ in 0..ETA_WINDOW {
            tracker.record(Some(Duration::from_secs(1)));
        }
        // Old slow samples have rolled out: 60 remaining × 1s
        assert_eq!(tracker.eta_seconds(), Some(60));
        assert_eq!(tracker.mean_latency(), Some(Duration::from_millis(5500)));
    }

    #[test]
    fn test_complete_has_zero_eta() {
        let mut tracker = ProgressTracker::new(1, 4);
        tracker.record(Some(Duration::from_millis(10)));
        assert_eq!(tracker.eta_seconds(), Some(0));
        assert!(tracker.should_report(10));
    }

    #[test]
    fn test_report_interval() {
        let mut tracker = ProgressTracker::new(25, 1);
        let mut due = Vec::new();
        for _ in 0..25 {
            tracker.record(None);
            if tracker.should_report(10) {
                due.push(tracker.completed());
            }
        }
        assert_eq!(due, vec![10, 20, 25]);
    }
}
