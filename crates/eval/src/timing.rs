//! Duration accumulation and time-limit checks.
//!
//! Time limits are logical: sessions are told the current time by their
//! caller and compare accumulated durations against declared limits. Nothing
//! here interrupts a running evaluation.

use time::OffsetDateTime;

use crate::types::TimeLimits;

/// Accumulates the seconds spent between `start` and `stop` calls.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Timer {
    accumulated: f64,
    running_since: Option<OffsetDateTime>,
}

fn elapsed(from: OffsetDateTime, to: OffsetDateTime) -> f64 {
    (to - from).as_seconds_f64().max(0.0)
}

impl Timer {
    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn start(&mut self, at: OffsetDateTime) {
        if self.running_since.is_none() {
            self.running_since = Some(at);
        }
    }

    /// Fold the running interval into the total and keep running from `at`.
    pub fn touch(&mut self, at: OffsetDateTime) {
        if let Some(since) = self.running_since {
            self.accumulated += elapsed(since, at);
            self.running_since = Some(at);
        }
    }

    pub fn stop(&mut self, at: OffsetDateTime) {
        self.touch(at);
        self.running_since = None;
    }

    /// Accumulated seconds, up to the last `touch` or `stop`.
    pub fn seconds(&self) -> f64 {
        self.accumulated
    }
}

/// A control object's time limits paired with the time spent in it.
#[derive(Debug, Clone, Copy)]
pub struct TimedControl<'a> {
    pub limits: Option<&'a TimeLimits>,
    pub seconds: f64,
}

/// Check maximum time limits from the innermost control object outwards.
///
/// A control object fails once its own duration reaches its `maxTime`;
/// otherwise its parent decides. The outermost parent of all passes.
pub fn pass_maximum_time_limit(chain: &[TimedControl<'_>]) -> bool {
    let Some((own, parents)) = chain.split_first() else {
        return true;
    };
    if let Some(max) = own.limits.and_then(|l| l.max_time) {
        if own.seconds >= max {
            return false;
        }
    }
    pass_maximum_time_limit(parents)
}

/// Minimum time limits are not enforced.
pub fn pass_minimum_time_limit(_chain: &[TimedControl<'_>]) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn limits(max: f64) -> TimeLimits {
        TimeLimits {
            max_time: Some(max),
            ..Default::default()
        }
    }

    #[test]
    fn timer_accumulates_intervals() {
        let mut t = Timer::default();
        t.start(datetime!(2024-01-01 10:00:00 UTC));
        t.touch(datetime!(2024-01-01 10:00:30 UTC));
        assert_eq!(t.seconds(), 30.0);
        t.stop(datetime!(2024-01-01 10:01:00 UTC));
        assert!(!t.is_running());
        // Stopped timers ignore further touches.
        t.touch(datetime!(2024-01-01 11:00:00 UTC));
        assert_eq!(t.seconds(), 60.0);
        t.start(datetime!(2024-01-01 12:00:00 UTC));
        t.stop(datetime!(2024-01-01 12:00:10 UTC));
        assert_eq!(t.seconds(), 70.0);
    }

    #[test]
    fn maximum_limit_recurses_to_parents() {
        let item = limits(60.0);
        let part = limits(100.0);
        let ok = [
            TimedControl { limits: Some(&item), seconds: 59.0 },
            TimedControl { limits: None, seconds: 500.0 },
            TimedControl { limits: Some(&part), seconds: 99.0 },
        ];
        assert!(pass_maximum_time_limit(&ok));

        let at_limit = [TimedControl { limits: Some(&item), seconds: 60.0 }];
        assert!(!pass_maximum_time_limit(&at_limit));

        let parent_over = [
            TimedControl { limits: Some(&item), seconds: 10.0 },
            TimedControl { limits: Some(&part), seconds: 100.0 },
        ];
        assert!(!pass_maximum_time_limit(&parent_over));
        assert!(pass_maximum_time_limit(&[]));
    }

    #[test]
    fn minimum_limit_always_passes() {
        let min = TimeLimits {
            min_time: Some(30.0),
            ..Default::default()
        };
        assert!(pass_minimum_time_limit(&[TimedControl {
            limits: Some(&min),
            seconds: 1.0
        }]));
    }
}
