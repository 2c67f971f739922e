//! Derivations over the raw order series.
//!
//! Every exported metric family is derived from the single raw cumulative
//! series: a trailing moving average smooths it into the headline
//! orders-price series, a splitter carves that into two per-server series
//! with a simulated restart, and a unit-price division turns price into item
//! counts.

use std::num::{NonZeroI64, NonZeroUsize};

use time::Date;
use tracing::debug;

use crate::{Error, Minute, Series};

/// Trailing simple moving average of `source` over a window of `window`
/// points.
///
/// The first `window - 1` output points average the shorter available prefix,
/// so output length equals input length. Sums of non-negative inputs are
/// averaged with half-up rounding; a constant input therefore reproduces
/// itself exactly.
///
/// # Errors
///
/// Function does not fail on any input `source` holds; the `Result` covers
/// the ordering invariant of the output series.
pub fn moving_average(source: &Series, name: &str, window: NonZeroUsize) -> Result<Series, Error> {
    let window = window.get();
    let mut out = Series::with_capacity(name, source.len());
    let mut sum: i64 = 0;

    for (i, point) in source.points().iter().enumerate() {
        sum += point.value;
        if i >= window {
            sum -= source.points()[i - window].value;
        }
        let count = i64::try_from(window.min(i + 1)).expect("window fits in i64");
        out.push(point.stamp, div_round(sum, count))?;
    }

    Ok(out)
}

/// The outcome of splitting the orders-price series across two servers.
#[derive(Debug, Clone)]
pub struct ServerSplit {
    /// The larger share, srv1.
    pub srv1: Series,
    /// The smaller share, srv2, with the restart discontinuity applied.
    pub srv2: Series,
    /// The cumulative volume srv2 permanently dropped at its restart. Zero
    /// when the restart day never occurred inside the window.
    pub reset_offset: i64,
    /// The period at which the restart was applied, if it was.
    pub reset_at: Option<Minute>,
}

/// Split the combined price series into two per-server series.
///
/// srv1 takes a five percent larger share, capped at the combined value; a
/// weirdness of the simulated load balancing. On the first point whose
/// calendar day equals `restart_day`, srv2 restarts: its counter drops by the
/// volume it had accumulated and never catches back up. The drop latches
/// exactly once.
///
/// For every point, `srv1 + srv2 + reset_offset` equals the combined value.
///
/// # Errors
///
/// Function will return an error if a stamp falls outside the representable
/// datetime range.
pub fn split_servers(
    source: &Series,
    srv1_name: &str,
    srv2_name: &str,
    restart_day: Date,
) -> Result<ServerSplit, Error> {
    let mut srv1 = Series::with_capacity(srv1_name, source.len());
    let mut srv2 = Series::with_capacity(srv2_name, source.len());
    let mut reset_offset: i64 = 0;
    let mut reset_at: Option<Minute> = None;

    for point in source.points() {
        let value = point.value;
        let value1 = larger_share(value);

        if reset_at.is_none() && point.stamp.datetime()?.date() == restart_day {
            reset_offset = value - value1;
            reset_at = Some(point.stamp);
            debug!(
                reset_offset,
                stamp = point.stamp.as_secs(),
                "srv2 restart simulated"
            );
        }

        srv1.push(point.stamp, value1)?;
        srv2.push(point.stamp, value - value1 - reset_offset)?;
    }

    Ok(ServerSplit {
        srv1,
        srv2,
        reset_offset,
        reset_at,
    })
}

/// srv1's share: `round(value * 1.05 / 2)`, capped at `value`.
fn larger_share(value: i64) -> i64 {
    // 1.05 / 2 == 21 / 40, rounded half-up in integer arithmetic.
    ((value * 21 + 20) / 40).min(value)
}

/// Derive an item-count series by dividing price by the average item price.
///
/// Division rounds half-up: 599 cents at a 600-cent unit price is one item.
///
/// # Errors
///
/// Function does not fail on any input `price` holds; the `Result` covers the
/// ordering invariant of the output series.
pub fn item_counts(
    price: &Series,
    name: &str,
    unit_price_cents: NonZeroI64,
) -> Result<Series, Error> {
    let unit = unit_price_cents.get();
    let mut out = Series::with_capacity(name, price.len());
    for point in price.points() {
        out.push(point.stamp, div_round(point.value, unit))?;
    }
    Ok(out)
}

/// Point-wise sum of two period-aligned series.
///
/// The combined item-count series is the sum of the per-server quotients, not
/// the quotient of the summed prices; the two policies differ at rounding
/// boundaries and this crate commits to the former.
///
/// # Errors
///
/// Function will return an error if the two series do not hold identical
/// period sequences.
pub fn sum_aligned(left: &Series, right: &Series, name: &str) -> Result<Series, Error> {
    if left.len() != right.len() {
        return Err(Error::Misaligned {
            left: left.name().to_string(),
            right: right.name().to_string(),
        });
    }

    let mut out = Series::with_capacity(name, left.len());
    for (a, b) in left.points().iter().zip(right.points()) {
        if a.stamp != b.stamp {
            return Err(Error::Misaligned {
                left: left.name().to_string(),
                right: right.name().to_string(),
            });
        }
        out.push(a.stamp, a.value + b.value)?;
    }
    Ok(out)
}

/// Round-half-up integer division for non-negative numerators.
fn div_round(n: i64, d: i64) -> i64 {
    debug_assert!(d > 0);
    (n + d / 2) / d
}

#[cfg(test)]
mod test {
    use std::num::{NonZeroI64, NonZeroUsize};

    use time::OffsetDateTime;

    use crate::derive::{item_counts, moving_average, split_servers, sum_aligned};
    use crate::{Minute, Series};

    // 2024-03-04T00:00:00Z, a Monday.
    const MONDAY: i64 = 1_709_510_400;

    fn series_of(values: &[i64]) -> Series {
        let mut series = Series::new("test.series");
        let mut stamp = Minute::from_unix(MONDAY);
        for &value in values {
            series.push(stamp, value).expect("in-order push");
            stamp = stamp.next();
        }
        series
    }

    #[test]
    fn moving_average_preserves_length() {
        let source = series_of(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let smoothed = moving_average(&source, "avg", NonZeroUsize::new(3).unwrap())
            .expect("derivation failed");
        assert_eq!(smoothed.len(), source.len());
    }

    #[test]
    fn moving_average_of_constant_is_identity() {
        let source = series_of(&[42; 50]);
        let smoothed = moving_average(&source, "avg", NonZeroUsize::new(7).unwrap())
            .expect("derivation failed");
        for point in smoothed.points() {
            assert_eq!(point.value, 42);
        }
    }

    #[test]
    fn moving_average_trailing_window() {
        let source = series_of(&[10, 20, 30, 40]);
        let smoothed = moving_average(&source, "avg", NonZeroUsize::new(2).unwrap())
            .expect("derivation failed");
        let values: Vec<i64> = smoothed.points().iter().map(|p| p.value).collect();
        // First point averages the one-point prefix.
        assert_eq!(values, vec![10, 15, 25, 35]);
    }

    #[test]
    fn split_conserves_volume_and_latches_once() {
        // Two simulated days of minutes; restart on the second day.
        let values: Vec<i64> = (0..2880).map(|i| i64::from(i) * 7).collect();
        let source = series_of(&values);
        let restart_day = OffsetDateTime::from_unix_timestamp(MONDAY + 86_400)
            .expect("valid timestamp")
            .date();

        let split = split_servers(&source, "srv1", "srv2", restart_day).expect("split failed");

        assert!(split.reset_at.is_some());
        assert_eq!(
            split.reset_at.expect("reset happened").as_secs(),
            MONDAY + 86_400,
            "reset must land on the first point of the restart day"
        );
        assert!(split.reset_offset > 0);

        let mut resets_seen = 0;
        for (i, point) in source.points().iter().enumerate() {
            let v1 = split.srv1.points()[i].value;
            let v2 = split.srv2.points()[i].value;
            assert!(v1 <= point.value);
            assert_eq!(v1 + v2 + split.reset_offset_at(point.stamp), point.value);
            if Some(point.stamp) == split.reset_at {
                resets_seen += 1;
            }
        }
        assert_eq!(resets_seen, 1);
    }

    impl super::ServerSplit {
        // The offset in effect at `stamp`: zero before the restart.
        fn reset_offset_at(&self, stamp: Minute) -> i64 {
            match self.reset_at {
                Some(at) if stamp >= at => self.reset_offset,
                _ => 0,
            }
        }
    }

    #[test]
    fn split_without_restart_day_never_resets() {
        let source = series_of(&[100, 200, 300]);
        let far_away = OffsetDateTime::from_unix_timestamp(MONDAY + 90 * 86_400)
            .expect("valid timestamp")
            .date();
        let split = split_servers(&source, "srv1", "srv2", far_away).expect("split failed");
        assert_eq!(split.reset_offset, 0);
        assert!(split.reset_at.is_none());
    }

    #[test]
    fn item_counts_boundary_table() {
        let unit = NonZeroI64::new(600).unwrap();
        let source = series_of(&[0, 599, 600, 601, 1200]);
        let items = item_counts(&source, "items", unit).expect("derivation failed");
        let values: Vec<i64> = items.points().iter().map(|p| p.value).collect();
        assert_eq!(values, vec![0, 1, 1, 1, 2]);
    }

    #[test]
    fn combined_items_sum_quotients_not_quotient_of_sums() {
        let unit = NonZeroI64::new(600).unwrap();
        // 299 + 299: each rounds down to zero items; the summed price would
        // round up to one. The committed policy is sum-of-quotients.
        let srv1 = item_counts(&series_of(&[299]), "srv1.items", unit).expect("derivation failed");
        let srv2 = item_counts(&series_of(&[299]), "srv2.items", unit).expect("derivation failed");
        let combined = sum_aligned(&srv1, &srv2, "items").expect("sum failed");
        assert_eq!(combined.points()[0].value, 0);
    }

    #[test]
    fn sum_aligned_rejects_mismatched_series() {
        let a = series_of(&[1, 2]);
        let b = series_of(&[1]);
        assert!(sum_aligned(&a, &b, "sum").is_err());
    }
}
