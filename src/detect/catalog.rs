use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use crate::fingerprint::{self, Fingerprint, VideoFingerprints};
use crate::{Config, Error, Result};

/// One record of an ad directory file: the ad name and the frame count and duration of the
/// original ad video.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdInfo {
    pub name: String,
    pub total_frames: u64,
    pub duration_ms: u64,
}

impl AdInfo {
    pub fn new(name: impl Into<String>, total_frames: u64, duration_ms: u64) -> Self {
        Self {
            name: name.into(),
            total_frames,
            duration_ms,
        }
    }
}

/// A single ad in the [AdCatalog].
///
/// Entries built from an ad directory alone carry only metadata. Entries built from
/// descriptors also carry fingerprints and can be used for matching.
#[derive(Clone, Debug, PartialEq)]
pub struct AdEntry {
    total_frames: u64,
    duration_ms: u64,
    sampled_len: usize,
    frames: Option<Vec<Fingerprint>>,
}

impl AdEntry {
    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }

    /// Number of sampled frames (fingerprints) for this ad.
    pub fn sampled_len(&self) -> usize {
        self.sampled_len
    }

    pub fn fingerprints(&self) -> Option<&[Fingerprint]> {
        self.frames.as_deref()
    }
}

/// All known ads, keyed by name.
///
/// Ads are always iterated in lexicographic (byte) order of their names. Both the matcher's
/// tie-breaking and the order of emitted detections depend on this.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AdCatalog {
    entries: BTreeMap<String, AdEntry>,
}

impl AdCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an ad with its fingerprints. Returns the previous entry with the same name, if any.
    pub fn insert(&mut self, name: impl Into<String>, video: VideoFingerprints) -> Option<AdEntry> {
        let entry = AdEntry {
            total_frames: video.total_frames,
            duration_ms: video.duration_ms,
            sampled_len: video.frames.len(),
            frames: Some(video.frames),
        };
        self.entries.insert(name.into(), entry)
    }

    /// Adds an ad without fingerprints. Its sampled length is derived from the frame count.
    pub fn insert_info(&mut self, info: AdInfo, sample_rate: u32) -> Option<AdEntry> {
        let entry = AdEntry {
            total_frames: info.total_frames,
            duration_ms: info.duration_ms,
            sampled_len: crate::util::sampled_len(info.total_frames, sample_rate) as usize,
            frames: None,
        };
        self.entries.insert(info.name, entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&AdEntry> {
        self.entries.get(name)
    }

    /// Iterates over ads in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AdEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Returns true if every ad carries fingerprints.
    pub fn is_indexed(&self) -> bool {
        self.entries.values().all(|e| e.frames.is_some())
    }

    /// Total number of ad fingerprints in the catalog.
    pub fn total_sampled_frames(&self) -> usize {
        self.entries.values().map(|e| e.sampled_len).sum()
    }

    /// Builds a metadata-only catalog from an ad directory file. This is enough to run the
    /// sequence trackers over an existing nearest-frames file.
    pub fn from_directory(directory: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let mut catalog = Self::new();
        for info in Self::read_directory(directory)? {
            catalog.insert_info(info, config.sample_rate);
        }
        Ok(catalog)
    }

    /// Builds a full catalog from an ad directory file and a directory containing one
    /// descriptor file per ad (`<name>.txt`).
    pub fn load(
        directory: impl AsRef<Path>,
        descriptors: impl AsRef<Path>,
        config: &Config,
    ) -> Result<Self> {
        let descriptors = descriptors.as_ref();
        if !descriptors.is_dir() {
            return Err(Error::MissingResource(descriptors.to_owned()));
        }

        let mut catalog = Self::new();
        for info in Self::read_directory(directory)? {
            let path = descriptors.join(format!(
                "{}.{}",
                info.name,
                fingerprint::DESCRIPTOR_FILE_EXT
            ));
            let video = VideoFingerprints::from_descriptor(&path, Some(config.fingerprint_len()))?;

            if video.total_frames != info.total_frames || video.duration_ms != info.duration_ms {
                return Err(Error::malformed(
                    &path,
                    1,
                    format!(
                        "descriptor header ({} frames, {} ms) disagrees with ad directory ({} frames, {} ms)",
                        video.total_frames, video.duration_ms, info.total_frames, info.duration_ms
                    ),
                ));
            }
            let expected = crate::util::sampled_len(info.total_frames, config.sample_rate);
            if video.sampled_len() as u64 != expected {
                return Err(Error::malformed(
                    &path,
                    1,
                    format!(
                        "expected {} sampled frames at sample rate {}, found {}",
                        expected,
                        config.sample_rate,
                        video.sampled_len()
                    ),
                ));
            }

            tracing::debug!(
                ad = info.name.as_str(),
                sampled = video.sampled_len(),
                "loaded ad descriptor"
            );
            catalog.insert(info.name, video);
        }

        Ok(catalog)
    }

    /// Reads an ad directory file: repeated two-line records of the ad name followed by
    /// `total_frames duration_ms`.
    pub fn read_directory(path: impl AsRef<Path>) -> Result<Vec<AdInfo>> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingResource(path.to_owned()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::parse_directory(path, &contents)
    }

    pub(crate) fn parse_directory(path: &Path, contents: &str) -> Result<Vec<AdInfo>> {
        let lines: Vec<&str> = contents.lines().collect();
        // Trailing blank lines are fine, blank lines inside a record are not.
        let used = lines
            .iter()
            .rposition(|l| !l.trim().is_empty())
            .map(|i| i + 1)
            .unwrap_or(0);

        let mut ads: Vec<AdInfo> = Vec::new();
        for (record, chunk) in lines[..used].chunks(2).enumerate() {
            let name_line = record * 2 + 1;
            let name = chunk[0].trim();
            if name.is_empty() {
                return Err(Error::malformed(path, name_line, "empty ad name"));
            }
            let meta = chunk
                .get(1)
                .ok_or_else(|| Error::malformed(path, name_line + 1, "missing ad metadata line"))?;
            let values = fingerprint::parse_numbers::<u64>(path, name_line + 1, meta)?;
            let (total_frames, duration_ms) = match values[..] {
                [total, duration] => (total, duration),
                _ => {
                    return Err(Error::malformed(
                        path,
                        name_line + 1,
                        format!(
                            "expected 'total_frames duration_ms', found {} values",
                            values.len()
                        ),
                    ))
                }
            };
            if ads.iter().any(|a| a.name == name) {
                return Err(Error::malformed(
                    path,
                    name_line,
                    format!("duplicate ad name '{}'", name),
                ));
            }
            ads.push(AdInfo::new(name, total_frames, duration_ms));
        }

        Ok(ads)
    }

    pub fn directory_string(ads: &[AdInfo]) -> String {
        let mut out = String::new();
        for ad in ads {
            let _ = writeln!(out, "{}\n{} {}", ad.name, ad.total_frames, ad.duration_ms);
        }
        out
    }

    /// Writes an ad directory file.
    pub fn write_directory(path: impl AsRef<Path>, ads: &[AdInfo]) -> Result<()> {
        crate::util::write_atomic(path, Self::directory_string(ads).as_bytes())
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::*;

    fn video(frames: &[&[u8]], total_frames: u64, duration_ms: u64) -> VideoFingerprints {
        VideoFingerprints::new(
            frames.iter().map(|f| Fingerprint::new(f.to_vec())).collect(),
            total_frames,
            duration_ms,
        )
    }

    #[test]
    fn test_directory_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ads.txt");
        let ads = vec![AdInfo::new("ballerina", 450, 15015), AdInfo::new("coke", 899, 30000)];

        AdCatalog::write_directory(&path, &ads).unwrap();
        insta::assert_snapshot!(std::fs::read_to_string(&path).unwrap(), @r###"
        ballerina
        450 15015
        coke
        899 30000
        "###);
        assert_eq!(AdCatalog::read_directory(&path).unwrap(), ads);
    }

    #[test]
    fn test_directory_errors() {
        let path = PathBuf::from("ads.txt");

        let err = AdCatalog::parse_directory(&path, "a\n10 400\nb\n").unwrap_err();
        assert!(matches!(err, Error::MalformedFile { line: 4, .. }));

        let err = AdCatalog::parse_directory(&path, "a\n10 400\nb\n10\n").unwrap_err();
        assert!(matches!(err, Error::MalformedFile { line: 4, .. }));

        let err = AdCatalog::parse_directory(&path, "a\n10 400\na\n10 400\n").unwrap_err();
        assert!(matches!(err, Error::MalformedFile { line: 3, .. }));

        let err = AdCatalog::read_directory("/nonexistent/ads.txt").unwrap_err();
        assert!(matches!(err, Error::MissingResource(_)));

        assert!(AdCatalog::parse_directory(&path, "a\n10 400\n\n\n").is_ok());
    }

    #[test]
    fn test_catalog_order_and_metadata() {
        let config = Config::default();
        let mut catalog = AdCatalog::new();
        catalog.insert_info(AdInfo::new("zebra", 95, 3000), config.sample_rate);
        catalog.insert_info(AdInfo::new("apple", 100, 4000), config.sample_rate);
        catalog.insert_info(AdInfo::new("Mango", 1, 40), config.sample_rate);

        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(names, vec!["Mango", "apple", "zebra"]);
        assert_eq!(catalog.get("zebra").unwrap().sampled_len(), 10);
        assert_eq!(catalog.get("apple").unwrap().sampled_len(), 10);
        assert_eq!(catalog.get("apple").unwrap().duration_secs(), 4.0);
        assert!(!catalog.is_indexed());
    }

    #[test]
    fn test_load_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_sample_rate(2).with_resize(2, 1);
        video(&[&[0, 0], &[10, 10]], 4, 160)
            .write_descriptor(dir.path().join("a.txt"))
            .unwrap();
        video(&[&[1, 1], &[2, 2], &[3, 3]], 5, 200)
            .write_descriptor(dir.path().join("b.txt"))
            .unwrap();
        let directory = dir.path().join("ads.txt");
        AdCatalog::write_directory(
            &directory,
            &[AdInfo::new("b", 5, 200), AdInfo::new("a", 4, 160)],
        )
        .unwrap();

        let catalog = AdCatalog::load(&directory, dir.path(), &config).unwrap();
        assert!(catalog.is_indexed());
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.total_sampled_frames(), 5);
        assert_eq!(catalog.get("b").unwrap().fingerprints().unwrap().len(), 3);

        // A directory entry whose descriptor is missing.
        AdCatalog::write_directory(&directory, &[AdInfo::new("c", 4, 160)]).unwrap();
        assert!(matches!(
            AdCatalog::load(&directory, dir.path(), &config),
            Err(Error::MissingResource(_))
        ));

        // A directory entry that disagrees with its descriptor.
        AdCatalog::write_directory(&directory, &[AdInfo::new("a", 5, 160)]).unwrap();
        assert!(matches!(
            AdCatalog::load(&directory, dir.path(), &config),
            Err(Error::MalformedFile { line: 1, .. })
        ));
    }
}
