//! Weighted random-walk synthesis of the raw cumulative order series.
//!
//! The synthesizer walks a window of simulated time at one-minute resolution
//! and integrates a per-step order volume into a cumulative counter, the way
//! a real order counter would tick upward in a production shop. The step
//! volume combines a slow-moving random factor, a week-over-week growth ramp
//! and the hour/weekday weight tables.

use rand::Rng;

use crate::distribution::DistributionTable;
use crate::{Error, Minute, Series};

/// Points emitted per synthetic step. Each step covers three simulated
/// minutes; the integrated total repeats across them so consumers observe one
/// value per minute that changes every third minute.
const POINTS_PER_STEP: usize = 3;

/// How often, in emitted points, the random factor is re-drawn.
const REDRAW_EVERY: usize = 120;

/// The simulated window to synthesize over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// First emitted minute, inclusive.
    pub start: Minute,
    /// End of the window, exclusive.
    pub end: Minute,
    /// The reference "now" that anchors the growth ramp. Steps closer to the
    /// reference produce larger volume.
    pub reference: Minute,
}

/// Produce the raw cumulative order-volume series over `window`.
///
/// Values are in cents of USD and monotonically non-decreasing; the emitted
/// minutes are gapless over `[start, end)`.
///
/// # Errors
///
/// Function will return an error if the window is empty or a stamp falls
/// outside the representable datetime range.
pub fn synthesize<R>(
    name: &str,
    window: Window,
    tables: &DistributionTable,
    rng: &mut R,
) -> Result<Series, Error>
where
    R: Rng + ?Sized,
{
    if window.start >= window.end {
        return Err(Error::EmptyWindow);
    }

    let reference_week = i64::from(window.reference.datetime()?.iso_week());

    let minutes = usize::try_from((window.end.as_secs() - window.start.as_secs()) / 60)
        .map_err(|_| Error::EmptyWindow)?;
    let mut series = Series::with_capacity(name, minutes);

    let mut total: i64 = 0;
    let mut random_factor: i64 = 0;
    let mut stamp = window.start;

    'outer: loop {
        if series.len() % REDRAW_EVERY == 0 {
            random_factor = 10 + rng.random_range(0..2_i64);
        }

        let datetime = stamp.datetime()?;
        let growth = week_growth(reference_week, i64::from(datetime.iso_week()));
        let hourly = i64::from(tables.hourly(datetime.hour()));
        let weekly = i64::from(tables.weekly(datetime.weekday()));

        // Hourly volume in cents, split down to the three-minute step. The
        // division result is rounded up to one significant digit.
        let step = ceil_to_one_significant(random_factor * 10 * growth * hourly * weekly, 20);
        total += step;

        for _ in 0..POINTS_PER_STEP {
            if stamp >= window.end {
                break 'outer;
            }
            series.push(stamp, total)?;
            stamp = stamp.next();
        }
    }

    Ok(series)
}

/// Week-over-week growth ramp: volume six weeks before the reference would be
/// flat, volume in the reference week is at full ramp. Clamped at zero so a
/// window reaching further back than the ramp cannot produce negative volume.
fn week_growth(reference_week: i64, step_week: i64) -> i64 {
    (6 - (reference_week - step_week)).max(0)
}

/// Divide `n` by `d` and round the quotient up to one significant digit.
///
/// Mirrors decimal division under a precision-1 ceiling rounding context:
/// 4020 / 20 = 201 rounds to 300, 2400 / 20 = 120 rounds to 200. Non-positive
/// numerators yield zero.
fn ceil_to_one_significant(n: i64, d: i64) -> i64 {
    debug_assert!(d > 0);
    if n <= 0 {
        return 0;
    }
    let q_floor = n / d;
    let scale = if q_floor >= 10 {
        10_i64.pow(q_floor.ilog10())
    } else {
        1
    };
    let coarse = d * scale;
    ((n + coarse - 1) / coarse) * scale
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};

    use crate::distribution::DistributionTable;
    use crate::synth::{Window, ceil_to_one_significant, synthesize};
    use crate::Minute;

    // 2024-03-04T00:00:00Z, a Monday.
    const MONDAY: i64 = 1_709_510_400;

    fn window_of_days(days: i64) -> Window {
        let reference = Minute::from_unix(MONDAY);
        Window {
            start: Minute::from_unix(MONDAY - days * 86_400),
            end: reference,
            reference,
        }
    }

    #[test]
    fn one_significant_digit_ceiling() {
        assert_eq!(ceil_to_one_significant(4020, 20), 300); // 201 -> 300
        assert_eq!(ceil_to_one_significant(4000, 20), 200); // exact 200
        assert_eq!(ceil_to_one_significant(2400, 20), 200); // 120 -> 200
        assert_eq!(ceil_to_one_significant(1990, 20), 100); // 99.5 -> 100
        assert_eq!(ceil_to_one_significant(180, 20), 9); // exact 9
        assert_eq!(ceil_to_one_significant(181, 20), 10); // 9.05 -> 10
        assert_eq!(ceil_to_one_significant(0, 20), 0);
        assert_eq!(ceil_to_one_significant(-40, 20), 0);
    }

    #[test]
    fn emits_gapless_minutes() {
        let mut rng = SmallRng::seed_from_u64(41);
        let series = synthesize(
            "shopping-cart.raw",
            window_of_days(2),
            &DistributionTable::default(),
            &mut rng,
        )
        .expect("synthesis failed");

        assert_eq!(series.len(), 2 * 24 * 60);
        for pair in series.points().windows(2) {
            assert_eq!(pair[0].stamp.next(), pair[1].stamp);
        }
    }

    #[test]
    fn cadence_repeats_each_total_three_times() {
        let mut rng = SmallRng::seed_from_u64(17);
        let series = synthesize(
            "shopping-cart.raw",
            window_of_days(1),
            &DistributionTable::default(),
            &mut rng,
        )
        .expect("synthesis failed");

        for (i, point) in series.points().iter().enumerate() {
            let step_head = &series.points()[i - i % 3];
            assert_eq!(point.value, step_head.value);
        }
    }

    #[test]
    fn same_seed_same_series() {
        let table = DistributionTable::default();
        let mut rng_a = SmallRng::seed_from_u64(7);
        let mut rng_b = SmallRng::seed_from_u64(7);
        let a = synthesize("shopping-cart.raw", window_of_days(1), &table, &mut rng_a)
            .expect("synthesis failed");
        let b = synthesize("shopping-cart.raw", window_of_days(1), &table, &mut rng_b)
            .expect("synthesis failed");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_window_is_rejected() {
        let mut rng = SmallRng::seed_from_u64(1);
        let reference = Minute::from_unix(MONDAY);
        let window = Window {
            start: reference,
            end: reference,
            reference,
        };
        assert!(synthesize("x", window, &DistributionTable::default(), &mut rng).is_err());
    }

    proptest! {
        // A cumulative counter never decreases, whatever the seed.
        #[test]
        fn values_never_decrease(seed: u64) {
            let mut rng = SmallRng::seed_from_u64(seed);
            let series = synthesize(
                "shopping-cart.raw",
                window_of_days(1),
                &DistributionTable::default(),
                &mut rng,
            )
            .expect("synthesis failed");

            for pair in series.points().windows(2) {
                prop_assert!(pair[0].value <= pair[1].value);
            }
        }
    }
}
