#[cfg(feature = "rayon")]
extern crate rayon;

mod catalog;
mod emitter;
mod matcher;
mod tracker;

pub use catalog::{AdCatalog, AdEntry, AdInfo};
pub use emitter::{Detection, DetectionEmitter};
pub use matcher::{Matcher, NearestFrames, NearestMatch};
pub use tracker::{track, SequenceTracker, TrackerState};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::fingerprint::VideoFingerprints;
use crate::{Config, Result};

/// Runs the whole detection pipeline for broadcasts against a fixed [AdCatalog].
///
/// The matcher labels every sampled broadcast frame with its nearest ad frame, then one
/// [SequenceTracker] per ad walks the labels and reports completed airings. With the
/// `rayon` feature and `threading` enabled, both stages run in parallel; results are merged
/// by frame index and ad name so the output is identical to a sequential run.
#[derive(Debug)]
pub struct Detector {
    config: Config,
    catalog: AdCatalog,
    threading: bool,
}

impl Detector {
    pub fn new(config: Config, catalog: AdCatalog) -> Self {
        Self {
            config,
            catalog,
            threading: false,
        }
    }

    /// Returns a new [Detector] with `threading` set to the provided value.
    pub fn with_threading(mut self, threading: bool) -> Self {
        self.threading = threading;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &AdCatalog {
        &self.catalog
    }

    /// Labels every sampled frame of a broadcast with its nearest ad frame.
    pub fn nearest_frames(&self, broadcast: &str, video: &VideoFingerprints) -> Result<NearestFrames> {
        Matcher::new(&self.catalog, &self.config)?
            .with_threading(self.threading)
            .nearest_frames(broadcast, video, &self.config)
    }

    /// Runs one sequence tracker per ad over `nearest` and collects the detections, ads in
    /// catalog order.
    pub fn detect(&self, nearest: &NearestFrames) -> Result<DetectionEmitter> {
        // The broadcast frame rate must be usable before any tracker runs.
        nearest.fps()?;

        let mut config = self.config.clone();
        if nearest.sample_rate != config.sample_rate {
            tracing::warn!(
                configured = config.sample_rate,
                file = nearest.sample_rate,
                "nearest frames for {} were sampled at a different rate, using the file's",
                nearest.broadcast
            );
            config = config.with_sample_rate(nearest.sample_rate);
        }
        if nearest.resize != (config.resize_width, config.resize_height) {
            tracing::debug!(
                "nearest frames for {} were computed at {}x{}",
                nearest.broadcast,
                nearest.resize.0,
                nearest.resize.1
            );
        }

        let unknown = nearest
            .matches
            .iter()
            .filter(|m| self.catalog.get(&m.ad_name).is_none())
            .count();
        if unknown > 0 {
            tracing::warn!(
                unknown,
                "{} nearest matches name ads that are not in the catalog",
                nearest.broadcast
            );
        }

        let ads: Vec<(&str, &AdEntry)> = self.catalog.iter().collect();
        let mut per_ad = Vec::new();

        if cfg!(feature = "rayon") && self.threading {
            #[cfg(feature = "rayon")]
            {
                per_ad = ads
                    .par_iter()
                    .map(|(name, entry)| track(name, entry, nearest, &config))
                    .collect::<Result<Vec<_>>>()?;
            }
        } else {
            per_ad = ads
                .iter()
                .map(|(name, entry)| track(name, entry, nearest, &config))
                .collect::<Result<Vec<_>>>()?;
        }

        let mut emitter = DetectionEmitter::new();
        emitter.extend(per_ad.into_iter().flatten());

        tracing::debug!(
            broadcast = nearest.broadcast.as_str(),
            detections = emitter.len(),
            "finished sequence tracking"
        );

        Ok(emitter)
    }

    /// Matches and tracks a broadcast in one go.
    pub fn run(&self, broadcast: &str, video: &VideoFingerprints) -> Result<DetectionEmitter> {
        let nearest = self.nearest_frames(broadcast, video)?;
        self.detect(&nearest)
    }
}
