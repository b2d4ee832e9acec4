//! Time model
//!
//! A [`TimePoint`] is either a timezone-aware absolute instant or a discrete
//! simulation round `(day, hour)` with `day >= 1` and `hour` in `0..=23`.
//! Rows persist both representations side by side (a timestamp column plus
//! `sim_day`/`sim_hour` integer columns); whichever form was not provided at
//! write time stays null. The core never reads a wall clock during a write -
//! the caller's time is authoritative.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Hours in a simulated day
pub const HOURS_PER_DAY: u32 = 24;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// A point in time, in one of the two supported representations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TimePoint {
    /// Wall-clock instant at second resolution
    Absolute {
        /// The instant, UTC
        instant: DateTime<Utc>,
    },
    /// Discrete simulation round
    Round {
        /// Simulated day, starting at 1
        day: u32,
        /// Hour of the simulated day, `0..=23`
        hour: u32,
    },
}

impl TimePoint {
    /// Wrap an absolute instant
    pub fn absolute(instant: DateTime<Utc>) -> Self {
        TimePoint::Absolute { instant }
    }

    /// Build a validated round time point
    pub fn round(day: u32, hour: u32) -> Result<Self> {
        if day < 1 {
            return Err(Error::invalid("day", format!("must be >= 1, got {day}")));
        }
        if hour >= HOURS_PER_DAY {
            return Err(Error::invalid("hour", format!("must be in 0..=23, got {hour}")));
        }
        Ok(TimePoint::Round { day, hour })
    }

    /// The absolute instant, if this is the absolute variant
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            TimePoint::Absolute { instant } => Some(*instant),
            TimePoint::Round { .. } => None,
        }
    }

    /// The `(day, hour)` tuple, if this is the round variant
    pub fn round_parts(&self) -> Option<(u32, u32)> {
        match self {
            TimePoint::Absolute { .. } => None,
            TimePoint::Round { day, hour } => Some((*day, *hour)),
        }
    }

    /// Reassemble a time point from persisted columns.
    ///
    /// Exactly one representation is populated per row; if a legacy row
    /// somehow carries both, the absolute instant wins.
    pub fn from_columns(
        instant: Option<DateTime<Utc>>,
        sim_day: Option<u32>,
        sim_hour: Option<u32>,
    ) -> Option<Self> {
        if let Some(instant) = instant {
            return Some(TimePoint::Absolute { instant });
        }
        match (sim_day, sim_hour) {
            (Some(day), Some(hour)) => Some(TimePoint::Round { day, hour }),
            _ => None,
        }
    }

    /// Scalar position of this point in fractional days.
    ///
    /// Absolute instants sit on the Unix-epoch axis, rounds on the simulation
    /// axis (`day + hour/24`). Differences are only meaningful same-axis;
    /// cross-axis differences are clamped away by [`TimePoint::days_since`].
    pub fn as_fractional_days(&self) -> f64 {
        match self {
            TimePoint::Absolute { instant } => instant.timestamp() as f64 / SECONDS_PER_DAY,
            TimePoint::Round { day, hour } => *day as f64 + *hour as f64 / HOURS_PER_DAY as f64,
        }
    }

    /// Elapsed days from `earlier` to `self`, never negative.
    ///
    /// A non-monotonic clock (caller supplies a time before the last review)
    /// yields zero rather than an error.
    pub fn days_since(&self, earlier: &TimePoint) -> f64 {
        let delta = match (earlier, self) {
            (TimePoint::Round { day: d0, hour: h0 }, TimePoint::Round { day: d1, hour: h1 }) => {
                (*d1 as f64 - *d0 as f64)
                    + (*h1 as f64 - *h0 as f64) / HOURS_PER_DAY as f64
            }
            _ => self.as_fractional_days() - earlier.as_fractional_days(),
        };
        delta.max(0.0)
    }
}

impl std::fmt::Display for TimePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimePoint::Absolute { instant } => write!(f, "{}", instant.to_rfc3339()),
            TimePoint::Round { day, hour } => write!(f, "day {day} hour {hour}"),
        }
    }
}
