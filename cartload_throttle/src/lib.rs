//! The cartload throttle mechanism
//!
//! This library bounds how many data points per second the injector is allowed
//! to push at a metrics backend. Hosted Graphite endpoints in particular will
//! drop or throttle connections that exceed their plan's point rate.

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

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use tokio::time::{self, Duration, Instant};

pub mod stable;

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Copy)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
/// Configuration of a [`Throttle`].
pub enum Config {
    /// A throttle that admits every request immediately.
    AllOut,
    /// A throttle that bounds sustained throughput to a fixed capacity per
    /// second.
    Stable {
        /// Capacity refilled at every one second interval, in points.
        maximum_capacity: NonZeroU32,
        /// Upper bound, in microseconds, on the total time one `wait_for`
        /// call may block. Zero means no bound.
        #[serde(default)]
        timeout_micros: u64,
    },
}

/// Errors produced by [`Throttle`].
#[derive(thiserror::Error, Debug, Clone, Copy)]
pub enum Error {
    /// See [`stable::Error`]
    #[error(transparent)]
    Stable(#[from] stable::Error),
}

#[async_trait]
/// The `Clock` used for every throttle
pub trait Clock {
    /// The number of ticks elapsed since the clock was created
    fn ticks_elapsed(&self) -> u64;
    /// Wait for `ticks` amount of time
    async fn wait(&self, ticks: u64);
}

#[derive(Debug, Clone, Copy)]
/// A clock that operates with respect to real-clock time.
pub struct RealClock {
    start: Instant,
}

impl Default for RealClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for RealClock {
    /// Return the number of ticks since `Clock` was created.
    ///
    /// # Panics
    ///
    /// Function will panic if the number of ticks elapsed is greater than u64::MAX.
    #[allow(clippy::cast_possible_truncation)]
    fn ticks_elapsed(&self) -> u64 {
        let now = Instant::now();
        let ticks_since: u128 = now.duration_since(self.start).as_micros();
        assert!(
            ticks_since <= u128::from(u64::MAX),
            "584,554 years elapsed since last call!"
        );
        ticks_since as u64
    }

    async fn wait(&self, ticks: u64) {
        time::sleep(Duration::from_micros(ticks)).await;
    }
}

/// The throttle mechanism
#[derive(Debug)]
pub enum Throttle<C = RealClock> {
    /// Admission from this variant is stable with respect to the clock
    Stable(stable::Stable<C>),
    /// Admission from this variant is immediate
    AllOut,
}

impl Throttle<RealClock> {
    /// Create a new instance of `Throttle` with a real-time clock
    #[must_use]
    pub fn new_with_config(config: Config) -> Self {
        match config {
            Config::Stable {
                maximum_capacity,
                timeout_micros,
            } => Throttle::Stable(stable::Stable::with_clock(
                maximum_capacity,
                timeout_micros,
                RealClock::default(),
            )),
            Config::AllOut => Throttle::AllOut,
        }
    }
}

impl<C> Throttle<C>
where
    C: Clock + Sync + Send,
{
    /// Wait for a single unit of capacity to be available, equivalent to
    /// `wait_for` of 1.
    ///
    /// # Errors
    ///
    /// See documentation in `Error`
    #[inline]
    pub async fn wait(&mut self) -> Result<(), Error> {
        match self {
            Throttle::Stable(inner) => inner.wait().await?,
            Throttle::AllOut => (),
        }

        Ok(())
    }

    /// Wait for `request` capacity to be available in the throttle
    ///
    /// # Errors
    ///
    /// See documentation in `Error`
    #[inline]
    pub async fn wait_for(&mut self, request: NonZeroU32) -> Result<(), Error> {
        match self {
            Throttle::Stable(inner) => inner.wait_for(request).await?,
            Throttle::AllOut => (),
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::num::NonZeroU32;

    use crate::{Config, Throttle};

    #[tokio::test]
    async fn all_out_waits_admit_immediately() {
        let mut throttle = Throttle::new_with_config(Config::AllOut);
        throttle.wait().await.expect("admitted");
        throttle
            .wait_for(NonZeroU32::new(1_000_000).expect("non-zero"))
            .await
            .expect("admitted");
    }

    #[tokio::test]
    async fn stable_single_unit_waits_draw_on_the_budget() {
        let mut throttle = Throttle::new_with_config(Config::Stable {
            maximum_capacity: NonZeroU32::new(100).expect("non-zero"),
            timeout_micros: 0,
        });
        // The first interval opens with the full budget; single-unit waits
        // within it are admitted without sleeping.
        for _ in 0..100 {
            throttle.wait().await.expect("admitted");
        }
    }
}
