//! Edge-triggered staleness alerting over submission idle time.

use std::time::Duration;

/// Emitted once per contiguous idle episode that crosses the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogAlert {
    pub idle_secs: i64,
    pub threshold_secs: i64,
}

/// Tracks the time since the last successful submission and transitions into
/// an alerted state exactly once while the idle time stays over threshold.
#[derive(Debug)]
pub struct BacklogWatchdog {
    threshold: Duration,
    last_success_at: i64,
    alerted: bool,
}

impl BacklogWatchdog {
    pub fn new(threshold: Duration, now: i64) -> Self {
        Self {
            threshold,
            last_success_at: now,
            alerted: false,
        }
    }

    /// Records a successful submission, clearing any active alert state so the
    /// next sustained backlog episode alerts again.
    pub fn record_success(&mut self, now: i64) {
        self.last_success_at = self.last_success_at.max(now);
        self.alerted = false;
    }

    /// Returns an alert only on the healthy-to-backlogged transition.
    pub fn evaluate(&mut self, now: i64) -> Option<BacklogAlert> {
        let idle_secs = self.backlog_secs(now);
        let threshold_secs = self.threshold.as_secs() as i64;

        if idle_secs >= threshold_secs {
            if !self.alerted {
                self.alerted = true;
                return Some(BacklogAlert {
                    idle_secs,
                    threshold_secs,
                });
            }
        } else {
            self.alerted = false;
        }

        None
    }

    pub fn backlog_secs(&self, now: i64) -> i64 {
        (now - self.last_success_at).max(0)
    }

    pub fn alert_active(&self) -> bool {
        self.alerted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watchdog() -> BacklogWatchdog {
        BacklogWatchdog::new(Duration::from_secs(300), 1000)
    }

    #[test]
    fn alerts_once_per_episode() {
        let mut dog = watchdog();

        assert_eq!(dog.evaluate(1100), None);
        let alert = dog.evaluate(1300).expect("threshold crossed");
        assert_eq!(alert.idle_secs, 300);
        assert_eq!(alert.threshold_secs, 300);

        // Still backlogged; no re-alert however many iterations pass.
        assert_eq!(dog.evaluate(1400), None);
        assert_eq!(dog.evaluate(9000), None);
        assert!(dog.alert_active());
    }

    #[test]
    fn success_clears_alert_and_rearms() {
        let mut dog = watchdog();

        assert!(dog.evaluate(1300).is_some());
        dog.record_success(1310);
        assert!(!dog.alert_active());
        assert_eq!(dog.backlog_secs(1320), 10);

        // A fresh episode alerts again.
        assert!(dog.evaluate(1610).is_some());
    }

    #[test]
    fn successes_within_threshold_never_alert() {
        let mut dog = watchdog();

        for step in 1..50 {
            let now = 1000 + step * 100;
            dog.record_success(now);
            assert_eq!(dog.evaluate(now + 50), None);
        }
    }

    #[test]
    fn backlog_never_goes_negative() {
        let dog = watchdog();
        assert_eq!(dog.backlog_secs(500), 0);
    }
}
