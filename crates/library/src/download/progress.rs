//! Progress reporting for bundle transfers.

use std::time::{Duration, Instant};

/// Snapshot of a running transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub downloaded: u64,
    /// Expected size, when the server announced one.
    pub total: Option<u64>,
}

impl Progress {
    /// Fraction done, if the total is known and non-zero.
    pub fn ratio(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.downloaded as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

/// Rate limiter for progress callbacks.
pub(crate) struct ProgressThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub(crate) const fn new(min_interval: Duration) -> Self {
        Self { last_emit: None, min_interval }
    }

    /// `true` if enough time has passed since the last emitted update.
    pub(crate) fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            },
        }
    }
}

/// Accumulates transferred bytes and forwards throttled updates.
pub(crate) struct Tracker<'a> {
    progress: Progress,
    throttle: ProgressThrottle,
    callback: &'a (dyn Fn(Progress) + Send + Sync),
}

impl<'a> Tracker<'a> {
    pub(crate) fn new(total: Option<u64>, interval: Duration, callback: &'a (dyn Fn(Progress) + Send + Sync)) -> Self {
        Self { progress: Progress { downloaded: 0, total }, throttle: ProgressThrottle::new(interval), callback }
    }

    pub(crate) fn set_total_if_unknown(&mut self, total: Option<u64>) {
        if self.progress.total.is_none() {
            self.progress.total = total;
        }
    }

    pub(crate) fn advance(&mut self, bytes: usize) {
        self.progress.downloaded += bytes as u64;
        if self.throttle.should_emit() {
            (self.callback)(self.progress);
        }
    }

    /// Emit the final state regardless of the throttle.
    pub(crate) fn finish(&self) -> Progress {
        (self.callback)(self.progress);
        self.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Mutex;

    #[test]
    fn test_throttle_respects_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(50));
        assert!(throttle.should_emit());
        assert!(!throttle.should_emit());
        std::thread::sleep(Duration::from_millis(60));
        assert!(throttle.should_emit());
    }

    #[test]
    fn test_tracker_always_reports_final_state() {
        let seen = Mutex::new(Vec::new());
        let callback = |progress: Progress| seen.lock().unwrap().push(progress);
        let mut tracker = Tracker::new(None, Duration::from_secs(60), &callback);
        tracker.set_total_if_unknown(Some(30));
        tracker.advance(10);
        tracker.advance(10);
        tracker.advance(10);
        let last = tracker.finish();

        assert_eq!(last, Progress { downloaded: 30, total: Some(30) });
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.first(), Some(&Progress { downloaded: 10, total: Some(30) }));
        assert_eq!(seen.last(), Some(&last));
        assert_eq!(seen.len(), 2);
    }

    #[rstest]
    #[case(Progress { downloaded: 5, total: Some(10) }, Some(0.5))]
    #[case(Progress { downloaded: 15, total: Some(10) }, Some(1.0))]
    #[case(Progress { downloaded: 5, total: Some(0) }, None)]
    #[case(Progress { downloaded: 5, total: None }, None)]
    fn test_ratio(#[case] progress: Progress, #[case] expected: Option<f64>) {
        assert_eq!(progress.ratio(), expected);
    }
}
