use std::path::Path;

#[cfg(feature = "video")]
mod analyzer;
mod data;
#[cfg(feature = "video")]
mod util;

#[cfg(feature = "video")]
pub use analyzer::Analyzer;
pub use data::{AnalysisRecord, Fingerprint, VideoFingerprints};
pub(crate) use data::{fps, parse_numbers, squared_distance};

use crate::{Config, Result};

/// Extension of descriptor files.
pub static DESCRIPTOR_FILE_EXT: &str = "txt";

/// Extension of the bincode analysis records written next to descriptors.
pub static ANALYSIS_FILE_EXT: &str = "adspot.bin";

/// Name of the video a fingerprint file or video file belongs to. Analysis records have a
/// double extension that is stripped as a whole.
pub fn video_name(path: impl AsRef<Path>) -> String {
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match file_name.strip_suffix(&format!(".{}", ANALYSIS_FILE_EXT)) {
        Some(name) => name.to_string(),
        None => crate::util::name_from_path(path),
    }
}

/// Loads the fingerprints of a single video.
///
/// `path` may point to a descriptor file, to an analysis record, or (with the `video`
/// feature) to a video file that is analyzed in-place. Fingerprints are checked against
/// the dimensions in `config`.
pub fn load(path: impl AsRef<Path>, config: &Config) -> Result<VideoFingerprints> {
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let fingerprints = if file_name.ends_with(&format!(".{}", ANALYSIS_FILE_EXT)) {
        AnalysisRecord::from_path(path)?.into_fingerprints()
    } else if !cfg!(feature = "video") || file_name.ends_with(&format!(".{}", DESCRIPTOR_FILE_EXT))
    {
        VideoFingerprints::from_descriptor(path, Some(config.fingerprint_len()))?
    } else {
        analyze_in_place(path, config)?
    };

    fingerprints.check_dimensions(config.fingerprint_len())?;
    tracing::debug!(
        sampled = fingerprints.sampled_len(),
        total_frames = fingerprints.total_frames(),
        duration_ms = fingerprints.duration_ms(),
        "loaded fingerprints from {}",
        path.display()
    );

    Ok(fingerprints)
}

#[cfg(feature = "video")]
fn analyze_in_place(path: &Path, config: &Config) -> Result<VideoFingerprints> {
    tracing::debug!("starting in-place video analysis for {}...", path.display());
    let analyzer = Analyzer::<&Path>::default().with_force(true);
    let fingerprints = analyzer.run_single(path, config, None)?;
    tracing::debug!("completed in-place video analysis for {}", path.display());
    Ok(fingerprints)
}

#[cfg(not(feature = "video"))]
fn analyze_in_place(path: &Path, _config: &Config) -> Result<VideoFingerprints> {
    Err(crate::Error::MissingResource(path.to_owned()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Error;

    #[test]
    fn test_load_descriptor_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_resize(2, 2);
        let video = VideoFingerprints::new(
            vec![Fingerprint::new(vec![1, 2, 3, 4]), Fingerprint::new(vec![5, 6, 7, 8])],
            20,
            800,
        );

        let descriptor = dir.path().join("show.txt");
        video.write_descriptor(&descriptor).unwrap();
        assert_eq!(load(&descriptor, &config).unwrap(), video);

        let record = dir.path().join("show.adspot.bin");
        AnalysisRecord::new("md5".to_string(), &config, video.clone())
            .write(&record)
            .unwrap();
        assert_eq!(load(&record, &config).unwrap(), video);
    }

    #[test]
    fn test_video_name() {
        assert_eq!(video_name("/data/mega.adspot.bin"), "mega");
        assert_eq!(video_name("/data/mega.txt"), "mega");
        assert_eq!(video_name("mega.d.mpg"), "mega.d");
    }

    #[test]
    fn test_load_checks_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_resize(2, 2);
        let video = VideoFingerprints::new(vec![Fingerprint::new(vec![1, 2, 3])], 1, 40);

        let record = dir.path().join("show.adspot.bin");
        AnalysisRecord::new("md5".to_string(), &config, video)
            .write(&record)
            .unwrap();
        assert!(matches!(
            load(&record, &config),
            Err(Error::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }
}
