//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program.

use cartload_series::scenario;
use serde::Deserialize;

use crate::{exporter, metrics_api};

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// The configured window produces nothing to inject.
    #[error("Scenario window is empty: back_days and forward_days are both zero")]
    EmptyWindow,
    /// The configured batch can never be admitted by the throttle.
    #[error("Batch size {batch_size} exceeds max_points_per_second {max_points_per_second}")]
    BatchExceedsRate {
        /// The configured batch size
        batch_size: u32,
        /// The configured point rate
        max_points_per_second: u32,
    },
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The Graphite backend to inject into and how fast to push.
    pub exporter: exporter::Config,
    /// The synthetic scenario to generate.
    #[serde(default)]
    pub scenario: scenario::Config,
    /// The hosted metrics account used by metrictool, if any.
    #[serde(default)]
    pub metrics_api: Option<metrics_api::Config>,
}

impl Config {
    /// Parse a config from YAML contents and validate it.
    ///
    /// # Errors
    ///
    /// Function will return an error if the contents do not deserialize or
    /// fail validation.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.scenario.back_days == 0 && self.scenario.forward_days == 0 {
            return Err(Error::EmptyWindow);
        }
        // The throttle refills batch permits once per second; a batch above
        // the per-second rate would be refused on the very first flush.
        if self.exporter.batch_size > self.exporter.max_points_per_second {
            return Err(Error::BatchExceedsRate {
                batch_size: self.exporter.batch_size.get(),
                max_points_per_second: self.exporter.max_points_per_second.get(),
            });
        }
        Ok(())
    }
}
