// # Failure Tracker
//
// Per-subscriber health state machine driven by check results:
//
// ```text
// Healthy ──fail──▶ Failing(now)
// Failing(t) ──fail, now - t < threshold──▶ Failing(t)
// Failing(t) ──fail, now - t ≥ threshold──▶ Removed
// Healthy | Failing(t) ──success──▶ Healthy
// ```
//
// The failure start is stored in `RuntimeState::failing_since`, so the
// tracker itself holds nothing but the threshold.

use chrono::{DateTime, Duration, Utc};

use crate::model::RuntimeState;

/// Result of recording one failed check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureVerdict {
    /// First failure after a healthy period
    NewFailure,
    /// Still inside the threshold
    StillFailing { since: DateTime<Utc> },
    /// Failing for at least the threshold; the subscriber must be removed
    OverThreshold { since: DateTime<Utc> },
}

impl FailureVerdict {
    pub fn should_remove(&self) -> bool {
        matches!(self, Self::OverThreshold { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FailureTracker {
    threshold: Duration,
}

impl FailureTracker {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn record_failure(&self, state: &mut RuntimeState, now: DateTime<Utc>) -> FailureVerdict {
        match state.failing_since {
            None => {
                state.failing_since = Some(now);
                FailureVerdict::NewFailure
            }
            Some(since) if now - since >= self.threshold => FailureVerdict::OverThreshold { since },
            Some(since) => FailureVerdict::StillFailing { since },
        }
    }

    /// Returns the start of the failure streak that just ended, if any
    pub fn record_success(&self, state: &mut RuntimeState) -> Option<DateTime<Utc>> {
        state.failing_since.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tracker() -> FailureTracker {
        FailureTracker::new(Duration::hours(24))
    }

    #[test]
    fn test_failure_threshold_boundaries() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut state = RuntimeState::default();

        assert_eq!(tracker().record_failure(&mut state, t0), FailureVerdict::NewFailure);
        assert_eq!(state.failing_since, Some(t0));

        let almost = t0 + Duration::hours(23) + Duration::minutes(59);
        assert_eq!(
            tracker().record_failure(&mut state, almost),
            FailureVerdict::StillFailing { since: t0 }
        );

        let verdict = tracker().record_failure(&mut state, t0 + Duration::hours(24));
        assert!(verdict.should_remove());
        assert_eq!(verdict, FailureVerdict::OverThreshold { since: t0 });
    }

    #[test]
    fn test_success_resets_to_healthy() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut state = RuntimeState::default();
        assert_eq!(tracker().record_success(&mut state), None);

        tracker().record_failure(&mut state, t0);
        assert_eq!(tracker().record_success(&mut state), Some(t0));
        assert!(state.is_healthy());

        let later = t0 + Duration::hours(30);
        assert_eq!(tracker().record_failure(&mut state, later), FailureVerdict::NewFailure);
        assert_eq!(state.failing_since, Some(later));
    }
}
