//! Evaluation time.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in time for execution.
///
/// `frame == None` is the *default time*, which is not on the timeline and
/// selects time-independent (default) values. The spline flags are carried
/// through untouched for application-specific spline evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Time {
    frame: Option<f64>,
    spline_flags: u8,
}

impl Time {
    /// A time at the given frame.
    pub fn new(frame: f64) -> Self {
        Self {
            frame: Some(frame),
            spline_flags: 0,
        }
    }

    /// A time at the given frame with spline evaluation flags.
    pub fn with_spline_flags(frame: f64, spline_flags: u8) -> Self {
        Self {
            frame: Some(frame),
            spline_flags,
        }
    }

    /// The default time.
    pub fn default_time() -> Self {
        Self::default()
    }

    pub fn frame(&self) -> Option<f64> {
        self.frame
    }

    pub fn spline_flags(&self) -> u8 {
        self.spline_flags
    }

    pub fn is_default(&self) -> bool {
        self.frame.is_none()
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.frame {
            Some(frame) => write!(f, "{frame}")?,
            None => write!(f, "DEFAULT")?,
        }
        if self.spline_flags != 0 {
            write!(f, " (flags {:#04x})", self.spline_flags)?;
        }
        Ok(())
    }
}

/// The time interval over which invalidated values are invalid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InvalidationTimeInterval {
    /// Minimum frame of the invalid interval (may be `-inf`).
    pub min_time: f64,
    /// Maximum frame of the invalid interval (may be `+inf`).
    pub max_time: f64,
    /// Whether the default time is part of the invalid interval.
    pub includes_default_time: bool,
}

impl InvalidationTimeInterval {
    /// All time, including the default time.
    pub fn full() -> Self {
        Self {
            min_time: f64::NEG_INFINITY,
            max_time: f64::INFINITY,
            includes_default_time: true,
        }
    }

    /// No time at all.
    pub fn empty() -> Self {
        Self {
            min_time: f64::INFINITY,
            max_time: f64::NEG_INFINITY,
            includes_default_time: false,
        }
    }

    /// Only the default time.
    pub fn default_only() -> Self {
        Self {
            includes_default_time: true,
            ..Self::empty()
        }
    }

    /// A closed frame range, excluding the default time.
    pub fn frames(min_time: f64, max_time: f64) -> Self {
        Self {
            min_time,
            max_time,
            includes_default_time: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.includes_default_time && self.min_time > self.max_time
    }

    pub fn is_full(&self) -> bool {
        self.includes_default_time
            && self.min_time == f64::NEG_INFINITY
            && self.max_time == f64::INFINITY
    }

    pub fn contains(&self, time: Time) -> bool {
        match time.frame() {
            Some(frame) => self.min_time <= frame && frame <= self.max_time,
            None => self.includes_default_time,
        }
    }

    /// The smallest interval containing both intervals.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min_time: self.min_time.min(other.min_time),
            max_time: self.max_time.max(other.max_time),
            includes_default_time: self.includes_default_time || other.includes_default_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_time_has_no_frame() {
        assert!(Time::default_time().is_default());
        assert!(!Time::new(1.0).is_default());
        assert_eq!(Time::new(24.0).frame(), Some(24.0));
    }

    #[test]
    fn interval_predicates() {
        assert!(InvalidationTimeInterval::full().is_full());
        assert!(InvalidationTimeInterval::empty().is_empty());
        assert!(!InvalidationTimeInterval::default_only().is_empty());
        assert!(InvalidationTimeInterval::default_only().contains(Time::default_time()));
        assert!(!InvalidationTimeInterval::default_only().contains(Time::new(1.0)));
    }

    #[test]
    fn interval_union() {
        let a = InvalidationTimeInterval::frames(1.0, 2.0);
        let b = InvalidationTimeInterval::frames(5.0, 8.0);
        let u = a.union(&b);
        assert!(u.contains(Time::new(3.0)));
        assert!(!u.contains(Time::default_time()));
        assert!(a.union(&InvalidationTimeInterval::empty()) == a);
    }
}
