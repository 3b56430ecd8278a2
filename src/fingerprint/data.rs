use std::fmt::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Config, Error, Result};

/// A fixed-length vector of grayscale pixel intensities representing one sampled frame.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Fingerprint(Vec<u8>);

impl Fingerprint {
    pub fn new(values: Vec<u8>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Squared Euclidean distance between two fingerprints.
    ///
    /// Both fingerprints must have the same length, otherwise [Error::DimensionMismatch]
    /// is returned.
    pub fn distance(&self, other: &Fingerprint) -> Result<u64> {
        if self.len() != other.len() {
            return Err(Error::DimensionMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        Ok(squared_distance(&self.0, &other.0))
    }
}

impl From<Vec<u8>> for Fingerprint {
    fn from(values: Vec<u8>) -> Self {
        Self(values)
    }
}

// Callers must have checked that both slices have the same length.
#[inline]
pub(crate) fn squared_distance(a: &[u8], b: &[u8]) -> u64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = *x as i32 - *y as i32;
            (diff * diff) as u64
        })
        .sum()
}

/// The sampled fingerprints of a single video, along with the frame count and duration of
/// the original (unsampled) video.
///
/// Sampled frame `i` corresponds to original frame `i * sample_rate`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct VideoFingerprints {
    pub(crate) frames: Vec<Fingerprint>,
    pub(crate) total_frames: u64,
    pub(crate) duration_ms: u64,
}

impl VideoFingerprints {
    pub fn new(frames: Vec<Fingerprint>, total_frames: u64, duration_ms: u64) -> Self {
        Self {
            frames,
            total_frames,
            duration_ms,
        }
    }

    pub fn frames(&self) -> &[Fingerprint] {
        &self.frames
    }

    /// Number of frames in the original video, before sampling.
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn sampled_len(&self) -> usize {
        self.frames.len()
    }

    /// Frames per second of the original video.
    pub fn fps(&self) -> Result<f64> {
        fps(self.total_frames, self.duration_ms)
    }

    /// Checks that every fingerprint has exactly `len` values.
    pub fn check_dimensions(&self, len: usize) -> Result<()> {
        match self.frames.iter().find(|f| f.len() != len) {
            Some(f) => Err(Error::DimensionMismatch {
                expected: len,
                actual: f.len(),
            }),
            None => Ok(()),
        }
    }

    /// Reads a descriptor file.
    ///
    /// The first line is `sampled_frames total_frames duration_ms`, followed by one line of
    /// space-separated pixel values per sampled frame. If `fingerprint_len` is set, every
    /// row must contain exactly that many values.
    pub fn from_descriptor(path: impl AsRef<Path>, fingerprint_len: Option<usize>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingResource(path.to_owned()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::parse_descriptor(path, &contents, fingerprint_len)
    }

    pub(crate) fn parse_descriptor(
        path: &Path,
        contents: &str,
        fingerprint_len: Option<usize>,
    ) -> Result<Self> {
        let mut lines = contents.lines().enumerate().map(|(i, l)| (i + 1, l));

        let (line_no, header) = lines
            .next()
            .ok_or_else(|| Error::malformed(path, 1, "missing descriptor header"))?;
        let header = parse_numbers::<u64>(path, line_no, header)?;
        let (sampled, total_frames, duration_ms) = match header[..] {
            [sampled, total, duration] => (sampled, total, duration),
            _ => {
                return Err(Error::malformed(
                    path,
                    line_no,
                    format!(
                        "expected 'sampled_frames total_frames duration_ms', found {} values",
                        header.len()
                    ),
                ))
            }
        };

        let mut frames = Vec::new();
        let mut expected_len = fingerprint_len;
        for (line_no, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            if frames.len() as u64 == sampled {
                return Err(Error::malformed(
                    path,
                    line_no,
                    format!("more than {} frame rows", sampled),
                ));
            }

            let values = parse_numbers::<u8>(path, line_no, line)?;
            let expected = *expected_len.get_or_insert(values.len());
            if values.len() != expected || expected == 0 {
                return Err(Error::malformed(
                    path,
                    line_no,
                    format!("expected {} pixel values, found {}", expected, values.len()),
                ));
            }
            frames.push(Fingerprint::new(values));
        }

        if frames.len() as u64 != sampled {
            return Err(Error::malformed(
                path,
                contents.lines().count(),
                format!(
                    "header declares {} frames but {} were found",
                    sampled,
                    frames.len()
                ),
            ));
        }

        Ok(Self::new(frames, total_frames, duration_ms))
    }

    /// Renders this video in the descriptor format.
    pub fn to_descriptor_string(&self) -> String {
        let row_len = self.frames.first().map(|f| f.len() * 4).unwrap_or(0);
        let mut out = String::with_capacity(32 + row_len * self.frames.len());
        let _ = writeln!(
            out,
            "{} {} {}",
            self.frames.len(),
            self.total_frames,
            self.duration_ms
        );
        for frame in &self.frames {
            let mut values = frame.as_slice().iter();
            if let Some(v) = values.next() {
                let _ = write!(out, "{}", v);
            }
            for v in values {
                let _ = write!(out, " {}", v);
            }
            out.push('\n');
        }
        out
    }

    /// Writes this video to `path` in the descriptor format.
    ///
    /// Empty fingerprints cannot be represented in a descriptor and are rejected.
    pub fn write_descriptor(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(i) = self.frames.iter().position(|f| f.is_empty()) {
            return Err(Error::DegenerateInput(format!(
                "sampled frame {} has an empty fingerprint",
                i
            )));
        }
        crate::util::write_atomic(path, self.to_descriptor_string().as_bytes())
    }
}

/// Frames per second for a video with the given frame count and duration.
pub(crate) fn fps(total_frames: u64, duration_ms: u64) -> Result<f64> {
    if duration_ms == 0 || total_frames == 0 {
        return Err(Error::DegenerateInput(format!(
            "cannot compute frame rate for {} frames over {} ms",
            total_frames, duration_ms
        )));
    }
    Ok(total_frames as f64 * 1000.0 / duration_ms as f64)
}

/// Parses a line of whitespace-separated numbers.
pub(crate) fn parse_numbers<T: std::str::FromStr>(
    path: &Path,
    line_no: usize,
    line: &str,
) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|v| {
            v.parse::<T>().map_err(|_| {
                Error::malformed(path, line_no, format!("invalid numeric field '{}'", v))
            })
        })
        .collect()
}

/// Fingerprints of a video plus the metadata needed to decide whether they can be reused.
/// This is what the analyzer persists alongside each descriptor.
#[derive(Debug, Deserialize, Serialize)]
pub struct AnalysisRecord {
    pub(crate) md5: String,
    pub(crate) sample_rate: u32,
    pub(crate) resize: (u32, u32),
    pub(crate) fingerprints: VideoFingerprints,
}

impl AnalysisRecord {
    pub fn new(md5: String, config: &Config, fingerprints: VideoFingerprints) -> Self {
        Self {
            md5,
            sample_rate: config.sample_rate,
            resize: (config.resize_width, config.resize_height),
            fingerprints,
        }
    }

    /// Load an analysis record from a path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingResource(path.to_owned()));
        }
        let f = std::fs::File::open(path)?;
        Ok(bincode::deserialize_from(std::io::BufReader::new(f))?)
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = bincode::serialize(self)?;
        crate::util::write_atomic(path, &data)
    }

    pub fn md5(&self) -> &str {
        &self.md5
    }

    /// Returns true if this record was produced from a video with the given header hash,
    /// using the sampling parameters in `config`.
    pub fn is_reusable(&self, md5: &str, config: &Config) -> bool {
        self.md5 == md5
            && self.sample_rate == config.sample_rate
            && self.resize == (config.resize_width, config.resize_height)
    }

    pub fn fingerprints(&self) -> &VideoFingerprints {
        &self.fingerprints
    }

    pub fn into_fingerprints(self) -> VideoFingerprints {
        self.fingerprints
    }
}
