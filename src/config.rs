//! Run configuration shared by every stage of the pipeline.
//!
//! A [Config] is built once (from defaults or a JSON file) and then handed by reference to
//! the analyzer, matcher and trackers. Nothing in the crate mutates it after construction.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default sample rate.
///
/// One fingerprint is taken every `sample_rate` original frames, starting with frame 0.
pub const DEFAULT_SAMPLE_RATE: u32 = 10;

/// Default fingerprint width, in pixels.
pub const DEFAULT_RESIZE_WIDTH: u32 = 16;

/// Default fingerprint height, in pixels.
pub const DEFAULT_RESIZE_HEIGHT: u32 = 16;

/// Default start margin.
///
/// A candidate airing can only start on a broadcast frame whose nearest ad frame index is
/// strictly below this value.
pub const DEFAULT_MATCH_START_ERROR_MARGIN: u32 = 5;

/// Default end margin.
///
/// A candidate airing completes once the tracker has advanced past
/// `sampled_len - match_end_error_margin`.
pub const DEFAULT_MATCH_END_ERROR_MARGIN: u32 = 5;

/// Default name fail limit.
pub const DEFAULT_NAME_FAIL_LIMIT: f64 = 4.0;

/// Default sequence fail limit.
pub const DEFAULT_SEQUENCE_FAIL_LIMIT: f64 = 10.0;

/// Default overshoot factor, applied per frame of overshoot.
pub const DEFAULT_SEQUENCE_OVERSHOOT_FACTOR: f64 = 1.0 / 5.0;

/// Default overshoot window.
///
/// A nearest ad frame more than this many frames ahead of the expected position counts as
/// an overshoot.
pub const DEFAULT_SEQUENCE_OVERSHOOT_WINDOW: u32 = 5;

/// Default name fail forgiveness.
pub const DEFAULT_NAME_FAIL_FORGIVENESS: f64 = 0.2;

/// Default sequence fail forgiveness.
pub const DEFAULT_SEQUENCE_FAIL_FORGIVENESS: f64 = 0.2;

/// Default undershoot penalty.
pub const DEFAULT_SEQUENCE_UNDERSHOOT_PENALTY: f64 = 0.5;

/// Default extension used when looking for ad videos in a directory.
pub const DEFAULT_AD_EXTENSION: &str = "mpg";

/// Immutable configuration for one detection run.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub sample_rate: u32,
    pub resize_width: u32,
    pub resize_height: u32,
    pub match_start_error_margin: u32,
    pub match_end_error_margin: u32,
    pub name_fail_limit: f64,
    pub sequence_fail_limit: f64,
    pub sequence_overshoot_factor: f64,
    pub sequence_overshoot_window: u32,
    pub name_fail_forgiveness: f64,
    pub sequence_fail_forgiveness: f64,
    pub sequence_undershoot_penalty: f64,
    pub ad_extension: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            resize_width: DEFAULT_RESIZE_WIDTH,
            resize_height: DEFAULT_RESIZE_HEIGHT,
            match_start_error_margin: DEFAULT_MATCH_START_ERROR_MARGIN,
            match_end_error_margin: DEFAULT_MATCH_END_ERROR_MARGIN,
            name_fail_limit: DEFAULT_NAME_FAIL_LIMIT,
            sequence_fail_limit: DEFAULT_SEQUENCE_FAIL_LIMIT,
            sequence_overshoot_factor: DEFAULT_SEQUENCE_OVERSHOOT_FACTOR,
            sequence_overshoot_window: DEFAULT_SEQUENCE_OVERSHOOT_WINDOW,
            name_fail_forgiveness: DEFAULT_NAME_FAIL_FORGIVENESS,
            sequence_fail_forgiveness: DEFAULT_SEQUENCE_FAIL_FORGIVENESS,
            sequence_undershoot_penalty: DEFAULT_SEQUENCE_UNDERSHOOT_PENALTY,
            ad_extension: DEFAULT_AD_EXTENSION.to_string(),
        }
    }
}

impl Config {
    /// Loads a configuration from a JSON file. Fields that are not present keep their defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingResource(path.to_owned()));
        }
        let f = std::fs::File::open(path)?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(f))?;
        config.validate()?;
        tracing::debug!(?config, "loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Number of values in a single fingerprint.
    pub fn fingerprint_len(&self) -> usize {
        self.resize_width as usize * self.resize_height as usize
    }

    /// Checks that the configuration can drive a run.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig(
                "sample_rate must be a positive number".to_string(),
            ));
        }
        if self.resize_width == 0 || self.resize_height == 0 {
            return Err(Error::InvalidConfig(format!(
                "resize dimensions must be positive, got {}x{}",
                self.resize_width, self.resize_height
            )));
        }

        let scores = [
            ("name_fail_limit", self.name_fail_limit),
            ("sequence_fail_limit", self.sequence_fail_limit),
            ("sequence_overshoot_factor", self.sequence_overshoot_factor),
            ("name_fail_forgiveness", self.name_fail_forgiveness),
            ("sequence_fail_forgiveness", self.sequence_fail_forgiveness),
            ("sequence_undershoot_penalty", self.sequence_undershoot_penalty),
        ];
        for (name, value) in scores {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }

    /// Returns a new [Config] with the provided `sample_rate`.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Returns a new [Config] with the provided fingerprint dimensions.
    pub fn with_resize(mut self, width: u32, height: u32) -> Self {
        self.resize_width = width;
        self.resize_height = height;
        self
    }

    /// Returns a new [Config] with the provided `match_start_error_margin`.
    pub fn with_match_start_error_margin(mut self, margin: u32) -> Self {
        self.match_start_error_margin = margin;
        self
    }

    /// Returns a new [Config] with the provided `match_end_error_margin`.
    pub fn with_match_end_error_margin(mut self, margin: u32) -> Self {
        self.match_end_error_margin = margin;
        self
    }

    /// Returns a new [Config] with the provided `name_fail_limit`.
    pub fn with_name_fail_limit(mut self, limit: f64) -> Self {
        self.name_fail_limit = limit;
        self
    }

    /// Returns a new [Config] with the provided `sequence_fail_limit`.
    pub fn with_sequence_fail_limit(mut self, limit: f64) -> Self {
        self.sequence_fail_limit = limit;
        self
    }

    /// Returns a new [Config] with the provided `sequence_overshoot_factor`.
    pub fn with_sequence_overshoot_factor(mut self, factor: f64) -> Self {
        self.sequence_overshoot_factor = factor;
        self
    }

    /// Returns a new [Config] with the provided `sequence_overshoot_window`.
    pub fn with_sequence_overshoot_window(mut self, window: u32) -> Self {
        self.sequence_overshoot_window = window;
        self
    }

    /// Returns a new [Config] with the provided `name_fail_forgiveness`.
    pub fn with_name_fail_forgiveness(mut self, forgiveness: f64) -> Self {
        self.name_fail_forgiveness = forgiveness;
        self
    }

    /// Returns a new [Config] with the provided `sequence_fail_forgiveness`.
    pub fn with_sequence_fail_forgiveness(mut self, forgiveness: f64) -> Self {
        self.sequence_fail_forgiveness = forgiveness;
        self
    }

    /// Returns a new [Config] with the provided `sequence_undershoot_penalty`.
    pub fn with_sequence_undershoot_penalty(mut self, penalty: f64) -> Self {
        self.sequence_undershoot_penalty = penalty;
        self
    }

    /// Returns a new [Config] with the provided `ad_extension`.
    pub fn with_ad_extension(mut self, extension: impl Into<String>) -> Self {
        self.ad_extension = extension.into();
        self
    }
}
