//! Hour-of-day and day-of-week weight tables.
//!
//! The tables express the expected relative transaction volume of the
//! simulated shop: quiet early mornings, a lunchtime bump, busy evenings and
//! weekends. They are plain data, constructed once and passed explicitly to
//! the synthesizer.

use serde::{Deserialize, Serialize};
use time::Weekday;

/// Immutable weight tables over hour of day and day of week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DistributionTable {
    /// Weight per hour of day, index 0 through 23.
    hourly: [u16; 24],
    /// Weight per day of week, index 0 is Monday through index 6, Sunday.
    weekly: [u16; 7],
}

impl Default for DistributionTable {
    fn default() -> Self {
        Self {
            hourly: [
                8, 8, 5, 5, 3, 3, 3, 3, 3, 3, 3, 8, 8, 8, 8, 6, 6, 6, 8, 8, 10, 10, 10, 10,
            ],
            weekly: [2, 2, 6, 8, 10, 10, 8],
        }
    }
}

impl DistributionTable {
    /// Build a table from explicit weights.
    #[must_use]
    pub fn new(hourly: [u16; 24], weekly: [u16; 7]) -> Self {
        Self { hourly, weekly }
    }

    /// The weight for an hour of day.
    ///
    /// # Panics
    ///
    /// Function will panic if `hour` is 24 or greater. The `time` crate never
    /// hands out such an hour.
    #[must_use]
    pub fn hourly(&self, hour: u8) -> u16 {
        self.hourly[usize::from(hour)]
    }

    /// The weight for a day of the week.
    #[must_use]
    pub fn weekly(&self, weekday: Weekday) -> u16 {
        self.weekly[usize::from(weekday.number_days_from_monday())]
    }
}
