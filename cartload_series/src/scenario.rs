//! Assembles the full shopping-cart metric family.
//!
//! One scenario run produces the six exported series the simulated shop
//! reports: combined and per-server orders-price (cents) plus combined and
//! per-server order item counts, over a window reaching from a configured
//! number of days before "now" to a short distance after it.

use std::num::{NonZeroI64, NonZeroUsize};

use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::distribution::DistributionTable;
use crate::synth::{self, Window};
use crate::{Error, Minute, Series, derive};

fn default_seed() -> [u8; 32] {
    [
        137, 86, 233, 10, 40, 178, 5, 91, 62, 200, 14, 77, 121, 34, 98, 161, 3, 56, 219, 144, 88,
        27, 190, 69, 112, 243, 8, 51, 174, 95, 30, 206,
    ]
}

fn default_back_days() -> u16 {
    15
}

fn default_forward_days() -> u16 {
    1
}

fn default_smoothing_window() -> NonZeroUsize {
    // Seven simulated hours of minute points.
    NonZeroUsize::new(60 * 7).expect("60 * 7 is non-zero")
}

fn default_restart_day_offset() -> u16 {
    2
}

fn default_unit_price_cents() -> NonZeroI64 {
    // An assumed average item price of $6.00.
    NonZeroI64::new(600).expect("600 is non-zero")
}

/// Configuration of a scenario run.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The seed for random operations in synthesis.
    #[serde(default = "default_seed")]
    pub seed: [u8; 32],
    /// Days of history to synthesize before "now".
    #[serde(default = "default_back_days")]
    pub back_days: u16,
    /// Days to synthesize past "now".
    #[serde(default = "default_forward_days")]
    pub forward_days: u16,
    /// Trailing window, in points, of the orders-price moving average.
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: NonZeroUsize,
    /// Days after the window start at which srv2 restarts.
    #[serde(default = "default_restart_day_offset")]
    pub restart_day_offset: u16,
    /// Average item price used to derive item counts from price.
    #[serde(default = "default_unit_price_cents")]
    pub unit_price_cents: NonZeroI64,
    /// Hour and weekday weight tables.
    #[serde(default)]
    pub distribution: DistributionTable,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            back_days: default_back_days(),
            forward_days: default_forward_days(),
            smoothing_window: default_smoothing_window(),
            restart_day_offset: default_restart_day_offset(),
            unit_price_cents: default_unit_price_cents(),
            distribution: DistributionTable::default(),
        }
    }
}

/// Metric names of the produced family.
mod names {
    pub(super) const RAW: &str = "shopping-cart.raw";
    pub(super) const PRICE: &str = "shopping-cart.OrdersPriceInCents";
    pub(super) const PRICE_SRV1: &str = "srv1.shopping-cart.OrdersPriceInCents";
    pub(super) const PRICE_SRV2: &str = "srv2.shopping-cart.OrdersPriceInCents";
    pub(super) const ITEMS: &str = "shopping-cart.OrderItemsCount";
    pub(super) const ITEMS_SRV1: &str = "srv1.shopping-cart.OrderItemsCount";
    pub(super) const ITEMS_SRV2: &str = "srv2.shopping-cart.OrderItemsCount";
}

/// Build the exported series family for one run.
///
/// The raw cumulative series is an internal intermediate and is not returned.
///
/// # Errors
///
/// Function will return an error if the configured window is empty or a stamp
/// falls outside the representable datetime range.
pub fn build(config: &Config, now: OffsetDateTime) -> Result<Vec<Series>, Error> {
    let mut rng = StdRng::from_seed(config.seed);

    let reference = Minute::from_unix(now.unix_timestamp());
    let window = Window {
        start: Minute::from_unix((now - Duration::days(i64::from(config.back_days))).unix_timestamp()),
        end: Minute::from_unix((now + Duration::days(i64::from(config.forward_days))).unix_timestamp()),
        reference,
    };

    let raw = synth::synthesize(names::RAW, window, &config.distribution, &mut rng)?;
    info!(
        points = raw.len(),
        back_days = config.back_days,
        forward_days = config.forward_days,
        "synthesized raw order series"
    );

    let price = derive::moving_average(&raw, names::PRICE, config.smoothing_window)?;

    let restart_day = (window.start.datetime()?
        + Duration::days(i64::from(config.restart_day_offset)))
    .date();
    let split = derive::split_servers(&price, names::PRICE_SRV1, names::PRICE_SRV2, restart_day)?;
    if let Some(at) = split.reset_at {
        info!(
            reset_offset = split.reset_offset,
            at = at.as_secs(),
            "applied srv2 restart discontinuity"
        );
    }

    let items_srv1 =
        derive::item_counts(&split.srv1, names::ITEMS_SRV1, config.unit_price_cents)?;
    let items_srv2 =
        derive::item_counts(&split.srv2, names::ITEMS_SRV2, config.unit_price_cents)?;
    let items = derive::sum_aligned(&items_srv1, &items_srv2, names::ITEMS)?;

    Ok(vec![
        price, split.srv1, split.srv2, items, items_srv1, items_srv2,
    ])
}
