#[cfg(feature = "rayon")]
extern crate rayon;

use std::fmt::Write as _;
use std::path::Path;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::AdCatalog;
use crate::fingerprint::{self, Fingerprint, VideoFingerprints};
use crate::{Config, Error, Result};

/// The closest ad frame to one broadcast frame.
///
/// `frame` is the 1-based position of the matched fingerprint within the ad's sampled
/// frames. 0 means that no ad frame was matched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NearestMatch {
    pub ad_name: String,
    pub frame: u64,
}

impl NearestMatch {
    pub fn new(ad_name: impl Into<String>, frame: u64) -> Self {
        Self {
            ad_name: ad_name.into(),
            frame,
        }
    }
}

/// Output of the [Matcher] for one broadcast: its metadata plus one [NearestMatch] per
/// sampled broadcast frame, in broadcast order.
#[derive(Clone, Debug, PartialEq)]
pub struct NearestFrames {
    pub broadcast: String,
    pub total_frames: u64,
    pub duration_ms: u64,
    pub sample_rate: u32,
    pub resize: (u32, u32),
    pub matches: Vec<NearestMatch>,
}

impl NearestFrames {
    /// Frames per second of the original broadcast.
    pub fn fps(&self) -> Result<f64> {
        fingerprint::fps(self.total_frames, self.duration_ms)
    }

    /// Reads a nearest-frames file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingResource(path.to_owned()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::parse(path, &contents)
    }

    pub(crate) fn parse(path: &Path, contents: &str) -> Result<Self> {
        let mut lines = contents.lines().enumerate().map(|(i, l)| (i + 1, l));
        let mut next_line = |line_no: usize, what: &str| {
            lines
                .next()
                .ok_or_else(|| Error::malformed(path, line_no, format!("missing {}", what)))
        };

        let (_, broadcast) = next_line(1, "broadcast name")?;
        let broadcast = broadcast.trim().to_string();
        if broadcast.is_empty() {
            return Err(Error::malformed(path, 1, "empty broadcast name"));
        }

        let (line_no, meta) = next_line(2, "broadcast metadata")?;
        let (total_frames, duration_ms) =
            match fingerprint::parse_numbers::<u64>(path, line_no, meta)?[..] {
                [total, duration] => (total, duration),
                _ => {
                    return Err(Error::malformed(
                        path,
                        line_no,
                        "expected 'total_frames duration_ms'",
                    ))
                }
            };

        let (line_no, params) = next_line(3, "sampling parameters")?;
        let (sample_rate, width, height) =
            match fingerprint::parse_numbers::<u32>(path, line_no, params)?[..] {
                [rate, w, h] => (rate, w, h),
                _ => {
                    return Err(Error::malformed(
                        path,
                        line_no,
                        "expected 'sample_rate resize_width resize_height'",
                    ))
                }
            };
        if sample_rate == 0 {
            return Err(Error::malformed(path, line_no, "sample rate must be positive"));
        }

        let mut matches = Vec::new();
        loop {
            let (line_no, name) = match lines.next() {
                Some((_, l)) if l.trim().is_empty() => continue,
                Some(v) => v,
                None => break,
            };
            let (index_line, index) = lines
                .next()
                .ok_or_else(|| Error::malformed(path, line_no + 1, "missing matched frame index"))?;
            let frame = index.trim().parse::<u64>().map_err(|_| {
                Error::malformed(
                    path,
                    index_line,
                    format!("invalid matched frame index '{}'", index.trim()),
                )
            })?;
            matches.push(NearestMatch::new(name.trim(), frame));
        }

        Ok(Self {
            broadcast,
            total_frames,
            duration_ms,
            sample_rate,
            resize: (width, height),
            matches,
        })
    }

    /// Renders this result in the nearest-frames file format.
    pub fn to_file_string(&self) -> String {
        let mut out = String::with_capacity(64 + self.matches.len() * 16);
        let _ = writeln!(out, "{}", self.broadcast);
        let _ = writeln!(out, "{} {}", self.total_frames, self.duration_ms);
        let _ = writeln!(
            out,
            "{} {} {}",
            self.sample_rate, self.resize.0, self.resize.1
        );
        for m in &self.matches {
            let _ = writeln!(out, "{}\n{}", m.ad_name, m.frame);
        }
        out
    }

    /// Writes a nearest-frames file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        crate::util::write_atomic(path, self.to_file_string().as_bytes())
    }
}

// Squared distance that gives up as soon as the partial sum reaches `bound`. Returns `None`
// if the full distance would not be strictly less than `bound`.
#[inline]
fn bounded_distance(a: &[u8], b: &[u8], bound: u64) -> Option<u64> {
    let mut sum = 0u64;
    for (ca, cb) in a.chunks(16).zip(b.chunks(16)) {
        sum += fingerprint::squared_distance(ca, cb);
        if sum >= bound {
            return None;
        }
    }
    Some(sum)
}

/// Finds, for every broadcast fingerprint, the closest fingerprint among all ads.
///
/// Ads are scanned in catalog (name) order and each ad's frames in sampled order. Only a
/// strictly smaller distance replaces the current best, so the first ad frame reaching the
/// minimum wins ties.
#[derive(Debug)]
pub struct Matcher<'a> {
    catalog: &'a AdCatalog,
    fingerprint_len: usize,
    threading: bool,
}

impl<'a> Matcher<'a> {
    /// Constructs a [Matcher]. Every ad in `catalog` must carry fingerprints of the size
    /// configured in `config`.
    pub fn new(catalog: &'a AdCatalog, config: &Config) -> Result<Self> {
        let fingerprint_len = config.fingerprint_len();
        if catalog.total_sampled_frames() == 0 {
            return Err(Error::DegenerateInput(
                "ad catalog has no fingerprints to match against".to_string(),
            ));
        }
        for (name, entry) in catalog.iter() {
            let frames = entry.fingerprints().ok_or_else(|| {
                Error::DegenerateInput(format!("ad '{}' has no fingerprints loaded", name))
            })?;
            if let Some(f) = frames.iter().find(|f| f.len() != fingerprint_len) {
                return Err(Error::DimensionMismatch {
                    expected: fingerprint_len,
                    actual: f.len(),
                });
            }
        }

        Ok(Self {
            catalog,
            fingerprint_len,
            threading: false,
        })
    }

    /// Returns a new [Matcher] with `threading` set to the provided value.
    pub fn with_threading(mut self, threading: bool) -> Self {
        self.threading = threading;
        self
    }

    /// Finds the closest ad frame to a single broadcast fingerprint.
    pub fn nearest(&self, frame: &Fingerprint) -> Result<NearestMatch> {
        if frame.len() != self.fingerprint_len {
            return Err(Error::DimensionMismatch {
                expected: self.fingerprint_len,
                actual: frame.len(),
            });
        }
        Ok(self.nearest_unchecked(frame))
    }

    fn nearest_unchecked(&self, frame: &Fingerprint) -> NearestMatch {
        let frame = frame.as_slice();
        let mut best: Option<(&str, usize)> = None;
        let mut best_dist = u64::MAX;

        'ads: for (name, entry) in self.catalog.iter() {
            for (i, ad_frame) in entry.fingerprints().unwrap_or_default().iter().enumerate() {
                if let Some(dist) = bounded_distance(frame, ad_frame.as_slice(), best_dist) {
                    best_dist = dist;
                    best = Some((name, i));
                    if dist == 0 {
                        // Nothing later can be strictly closer.
                        break 'ads;
                    }
                }
            }
        }

        match best {
            Some((name, i)) => NearestMatch::new(name, i as u64 + 1),
            None => NearestMatch::new("", 0),
        }
    }

    /// Runs the matcher over every sampled frame of a broadcast.
    pub fn nearest_frames(
        &self,
        broadcast: &str,
        video: &VideoFingerprints,
        config: &Config,
    ) -> Result<NearestFrames> {
        let span = tracing::span!(tracing::Level::TRACE, "nearest_frames");
        let _enter = span.enter();

        video.check_dimensions(self.fingerprint_len)?;

        tracing::debug!(
            broadcast,
            broadcast_frames = video.sampled_len(),
            ads = self.catalog.len(),
            ad_frames = self.catalog.total_sampled_frames(),
            "starting nearest frame search"
        );

        let mut matches = Vec::new();

        if cfg!(feature = "rayon") && self.threading {
            // Each frame is independent and `collect` keeps broadcast order.
            #[cfg(feature = "rayon")]
            {
                matches = video
                    .frames()
                    .par_iter()
                    .map(|f| self.nearest_unchecked(f))
                    .collect::<Vec<_>>();
            }
        } else {
            matches.extend(video.frames().iter().map(|f| self.nearest_unchecked(f)));
        }

        tracing::debug!(broadcast, "finished nearest frame search");

        Ok(NearestFrames {
            broadcast: broadcast.to_string(),
            total_frames: video.total_frames(),
            duration_ms: video.duration_ms(),
            sample_rate: config.sample_rate,
            resize: (config.resize_width, config.resize_height),
            matches,
        })
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::*;

    fn video(frames: &[&[u8]]) -> VideoFingerprints {
        VideoFingerprints::new(
            frames.iter().map(|f| Fingerprint::new(f.to_vec())).collect(),
            frames.len() as u64,
            frames.len() as u64 * 40,
        )
    }

    fn config() -> Config {
        Config::default().with_sample_rate(1).with_resize(2, 1)
    }

    fn catalog() -> AdCatalog {
        let mut catalog = AdCatalog::new();
        catalog.insert("beta", video(&[&[100, 100], &[0, 0], &[50, 60]]));
        catalog.insert("alpha", video(&[&[10, 10], &[0, 0], &[200, 200]]));
        catalog
    }

    #[test]
    fn test_nearest_picks_minimum() {
        let catalog = catalog();
        let matcher = Matcher::new(&catalog, &config()).unwrap();

        assert_eq!(
            matcher.nearest(&Fingerprint::new(vec![52, 58])).unwrap(),
            NearestMatch::new("beta", 3)
        );
        assert_eq!(
            matcher.nearest(&Fingerprint::new(vec![190, 255])).unwrap(),
            NearestMatch::new("alpha", 3)
        );
    }

    #[test]
    fn test_nearest_tie_break_is_first_in_name_order() {
        let catalog = catalog();
        let matcher = Matcher::new(&catalog, &config()).unwrap();

        // [0, 0] is frame 2 of both ads; "alpha" comes first.
        assert_eq!(
            matcher.nearest(&Fingerprint::new(vec![0, 0])).unwrap(),
            NearestMatch::new("alpha", 2)
        );
        // [5, 5] is equally far from alpha:1 ([10, 10]) and alpha:2 ([0, 0]).
        assert_eq!(
            matcher.nearest(&Fingerprint::new(vec![5, 5])).unwrap(),
            NearestMatch::new("alpha", 1)
        );
    }

    #[test]
    fn test_nearest_dimension_mismatch() {
        let catalog = catalog();
        let matcher = Matcher::new(&catalog, &config()).unwrap();
        assert!(matches!(
            matcher.nearest(&Fingerprint::new(vec![0, 0, 0])),
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));

        let err = Matcher::new(&catalog, &config().with_resize(3, 1)).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_matcher_rejects_metadata_only_catalog() {
        let mut catalog = AdCatalog::new();
        catalog.insert_info(crate::detect::AdInfo::new("a", 10, 400), 1);
        assert!(matches!(
            Matcher::new(&catalog, &config()),
            Err(Error::DegenerateInput(_))
        ));
        assert!(matches!(
            Matcher::new(&AdCatalog::new(), &config()),
            Err(Error::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_nearest_frames_is_deterministic() {
        let catalog = catalog();
        let config = config();
        let broadcast = video(&[&[0, 0], &[99, 101], &[12, 9], &[5, 5], &[201, 199]]);

        let sequential = Matcher::new(&catalog, &config)
            .unwrap()
            .nearest_frames("show", &broadcast, &config)
            .unwrap();
        let threaded = Matcher::new(&catalog, &config)
            .unwrap()
            .with_threading(true)
            .nearest_frames("show", &broadcast, &config)
            .unwrap();

        assert_eq!(sequential, threaded);
        let labels: Vec<(&str, u64)> = sequential
            .matches
            .iter()
            .map(|m| (m.ad_name.as_str(), m.frame))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("alpha", 2),
                ("beta", 1),
                ("alpha", 1),
                ("alpha", 1),
                ("alpha", 3)
            ]
        );
    }

    #[test]
    fn test_nearest_frames_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("show.nearest.txt");
        let nearest = NearestFrames {
            broadcast: "show".to_string(),
            total_frames: 120,
            duration_ms: 4000,
            sample_rate: 10,
            resize: (16, 16),
            matches: vec![NearestMatch::new("coke", 1), NearestMatch::new("pepsi", 7)],
        };

        nearest.write(&path).unwrap();
        insta::assert_snapshot!(std::fs::read_to_string(&path).unwrap(), @r###"
        show
        120 4000
        10 16 16
        coke
        1
        pepsi
        7
        "###);
        assert_eq!(NearestFrames::from_path(&path).unwrap(), nearest);
        assert_eq!(nearest.fps().unwrap(), 30.0);
    }

    #[test]
    fn test_nearest_frames_file_errors() {
        let path = PathBuf::from("nearest.txt");

        let err = NearestFrames::parse(&path, "show\n120\n10 16 16\n").unwrap_err();
        assert!(matches!(err, Error::MalformedFile { line: 2, .. }));

        let err = NearestFrames::parse(&path, "show\n120 4000\n0 16 16\n").unwrap_err();
        assert!(matches!(err, Error::MalformedFile { line: 3, .. }));

        let err = NearestFrames::parse(&path, "show\n120 4000\n10 16 16\ncoke\nx\n").unwrap_err();
        assert!(matches!(err, Error::MalformedFile { line: 5, .. }));

        let err = NearestFrames::parse(&path, "show\n120 4000\n10 16 16\ncoke\n").unwrap_err();
        assert!(matches!(err, Error::MalformedFile { line: 5, .. }));
    }
}
