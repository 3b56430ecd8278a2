use std::fmt::{Display, Write as _};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::util;
use crate::Result;

/// One detected airing of an ad inside a broadcast.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Detection {
    pub broadcast: String,
    pub start_secs: f64,
    pub ad_duration_secs: f64,
    pub ad_name: String,
}

impl Display for Detection {
    /// Formats the detection as a results file line (without the newline).
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}\t{:.3}\t{:.3}\t{}",
            self.broadcast, self.start_secs, self.ad_duration_secs, self.ad_name
        )
    }
}

/// Collects detections for a broadcast in the order they were found.
///
/// Detections from different ads are kept as-is: overlapping airings are neither merged nor
/// deduplicated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionEmitter {
    detections: Vec<Detection>,
}

impl DetectionEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, detection: Detection) {
        self.detections.push(detection);
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn into_detections(self) -> Vec<Detection> {
        self.detections
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    /// Renders all detections in the results file format.
    pub fn to_results_string(&self) -> String {
        let mut out = String::new();
        for d in &self.detections {
            let _ = writeln!(out, "{}", d);
        }
        out
    }

    /// Writes a tab-separated results file.
    pub fn write_results(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        util::write_atomic(path, self.to_results_string().as_bytes())?;
        tracing::info!(
            detections = self.detections.len(),
            "results written to {}",
            path.display()
        );
        Ok(())
    }

    /// Writes the detections as a JSON array.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.detections)?;
        util::write_atomic(path, &data)
    }

    pub fn display(&self) {
        if self.detections.is_empty() {
            println!("No ads found.");
            return;
        }
        for d in &self.detections {
            let start = Duration::from_secs_f64(d.start_secs.max(0.0));
            let end = Duration::from_secs_f64((d.start_secs + d.ad_duration_secs).max(0.0));
            println!(
                "* {} - {}-{}",
                d.ad_name,
                util::format_time(start),
                util::format_time(end)
            );
        }
    }
}

impl Extend<Detection> for DetectionEmitter {
    fn extend<T: IntoIterator<Item = Detection>>(&mut self, iter: T) {
        self.detections.extend(iter);
    }
}
