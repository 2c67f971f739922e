//! Synthetic shopping-cart time series.
//!
//! This library produces the minute-resolution cumulative order-volume series
//! that the cartload injector pushes at a Graphite backend. Generation is
//! pure: no I/O happens here, only arithmetic over a pseudo-random source and
//! a pair of weight tables.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod derive;
pub mod distribution;
pub mod scenario;
pub mod synth;

/// Errors related to series construction and derivation
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A point was pushed at or before the series' last stamp.
    #[error("Point at {stamp} pushed out of order into series '{series}'")]
    OutOfOrder {
        /// Name of the violated series
        series: String,
        /// Offending stamp, unix seconds
        stamp: i64,
    },
    /// A synthesis or derivation window was empty.
    #[error("Window start must precede window end")]
    EmptyWindow,
    /// Two series that must be period-aligned were not.
    #[error("Series '{left}' and '{right}' are not period-aligned")]
    Misaligned {
        /// Name of the left series
        left: String,
        /// Name of the right series
        right: String,
    },
    /// A stamp fell outside the range the `time` crate can represent.
    #[error("Timestamp out of range: {0}")]
    Timestamp(#[from] time::error::ComponentRange),
}

/// A minute-aligned instant, the time period of every data point.
///
/// Stored as unix seconds divisible by 60. Construction through
/// [`Minute::from_unix`] floors toward negative infinity so that every second
/// within a minute maps to the same period.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Minute(i64);

impl Minute {
    /// Create a `Minute` from unix seconds, flooring to the minute boundary.
    #[must_use]
    pub fn from_unix(secs: i64) -> Self {
        Self(secs - secs.rem_euclid(60))
    }

    /// The period start, in unix seconds.
    #[must_use]
    pub fn as_secs(self) -> i64 {
        self.0
    }

    /// The immediately following minute.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 60)
    }

    /// The period start as a UTC datetime.
    ///
    /// # Errors
    ///
    /// Function will return an error if the stamp is outside the range
    /// representable by [`OffsetDateTime`].
    pub fn datetime(self) -> Result<OffsetDateTime, Error> {
        Ok(OffsetDateTime::from_unix_timestamp(self.0)?)
    }
}

/// A single observation: one period, one integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPoint {
    /// The minute this point covers
    pub stamp: Minute,
    /// The observed value. Order volume is expressed in cents of USD.
    pub value: i64,
}

/// A named, chronologically ordered sequence of [`DataPoint`]s.
///
/// Insertion order is chronological order: [`Series::push`] rejects any point
/// that does not strictly follow the series' last stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    name: String,
    points: Vec<DataPoint>,
}

impl Series {
    /// Create an empty series.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points: Vec::new(),
        }
    }

    /// Create an empty series with room for `capacity` points.
    #[must_use]
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            points: Vec::with_capacity(capacity),
        }
    }

    /// The series' metric name, without any injection prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of points held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// True if no points are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The points, in chronological order.
    #[must_use]
    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    /// The most recent point, if any.
    #[must_use]
    pub fn last(&self) -> Option<DataPoint> {
        self.points.last().copied()
    }

    /// Append a point.
    ///
    /// # Errors
    ///
    /// Function will return an error if `stamp` does not strictly follow the
    /// series' last stamp. Duplicate periods are rejected.
    pub fn push(&mut self, stamp: Minute, value: i64) -> Result<(), Error> {
        if let Some(last) = self.last()
            && stamp <= last.stamp
        {
            return Err(Error::OutOfOrder {
                series: self.name.clone(),
                stamp: stamp.as_secs(),
            });
        }
        self.points.push(DataPoint { stamp, value });
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{Minute, Series};

    #[test]
    fn minute_floors_to_period_start() {
        assert_eq!(Minute::from_unix(0).as_secs(), 0);
        assert_eq!(Minute::from_unix(59).as_secs(), 0);
        assert_eq!(Minute::from_unix(60).as_secs(), 60);
        assert_eq!(Minute::from_unix(61).as_secs(), 60);
        // Flooring, not truncation, below the epoch.
        assert_eq!(Minute::from_unix(-1).as_secs(), -60);
    }

    #[test]
    fn push_rejects_out_of_order_points() {
        let mut series = Series::new("test.series");
        let m0 = Minute::from_unix(0);
        series.push(m0, 1).expect("first push");
        assert!(series.push(m0, 2).is_err(), "duplicate period accepted");
        assert!(
            series.push(Minute::from_unix(-60), 2).is_err(),
            "backwards period accepted"
        );
        series.push(m0.next(), 2).expect("in-order push");
        assert_eq!(series.len(), 2);
        assert_eq!(series.last().expect("points held").value, 2);
    }
}
