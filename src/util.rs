use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

/// Formats the given [Duration] as "MM:SS.mmm"
pub fn format_time(t: Duration) -> String {
    let minutes = t.as_secs() / 60;
    let seconds = t.as_secs() % 60;
    format!("{:02}:{:02}.{:03}", minutes, seconds, t.subsec_millis())
}

/// Returns the file name of `path` without its extension. This is the name used for
/// ads and broadcasts throughout the crate.
pub fn name_from_path(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Number of sampled frames for a video with `total_frames` frames, sampling one frame
/// every `sample_rate` frames starting with frame 0.
pub fn sampled_len(total_frames: u64, sample_rate: u32) -> u64 {
    if total_frames == 0 || sample_rate == 0 {
        return 0;
    }
    (total_frames - 1) / sample_rate as u64 + 1
}

/// Checks if the given path points to a video file by sniffing its header.
pub fn is_valid_video_file(path: impl AsRef<Path>) -> bool {
    let mut buf = [0u8; 8192];
    let mut f = match std::fs::File::open(path.as_ref()) {
        Ok(f) => f,
        Err(_) => return false,
    };
    match f.read(&mut buf) {
        Ok(n) => infer::is_video(&buf[..n]),
        Err(_) => false,
    }
}

/// Expands the given paths into a sorted list of video files.
///
/// Directories are expanded one level deep. If `extension` is set, only files with that
/// extension are kept. If `check_headers` is set, files that do not look like videos are
/// skipped.
pub fn find_video_files(
    paths: &[PathBuf],
    extension: Option<&str>,
    check_headers: bool,
) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();

    for path in paths {
        if !path.exists() {
            return Err(Error::MissingResource(path.clone()));
        }
        if path.is_dir() {
            for entry in std::fs::read_dir(path)? {
                let entry = entry?.path();
                if entry.is_file() {
                    candidates.push(entry);
                }
            }
        } else {
            candidates.push(path.clone());
        }
    }

    let mut videos: Vec<PathBuf> = candidates
        .into_iter()
        .filter(|p| match extension {
            Some(ext) => p
                .extension()
                .map(|e| e.eq_ignore_ascii_case(ext))
                .unwrap_or(false),
            None => true,
        })
        .filter(|p| {
            let valid = !check_headers || is_valid_video_file(p);
            if !valid {
                tracing::debug!("skipping non-video file {}", p.display());
            }
            valid
        })
        .collect();
    videos.sort();
    videos.dedup();

    Ok(videos)
}

#[cfg(feature = "video")]
pub(crate) fn compute_header_md5sum(video: impl AsRef<Path>) -> Result<String> {
    let mut buf = Vec::with_capacity(8192);
    let f = std::fs::File::open(video.as_ref())?;
    f.take(8192).read_to_end(&mut buf)?;
    let hash = format!("{:x}", md5::compute(&buf));
    Ok(hash)
}

/// Writes `contents` to a sibling temporary file, then renames it over `path`. Readers
/// never observe a partially written file.
pub(crate) fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(contents)?;
        f.sync_all()?;
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    Ok(())
}

/// Returns the underlying FFmpeg version integer used by adspot.
#[cfg(feature = "video")]
pub fn ffmpeg_version() -> u32 {
    ffmpeg_next::util::version()
}

/// Returns the underlying FFmpeg version string used by adspot.
#[cfg(feature = "video")]
pub fn ffmpeg_version_string() -> String {
    let version_int = ffmpeg_version();

    // Reference: https://github.com/FFmpeg/FFmpeg/blob/130d19bf2044ac76372d1b97ab87ab283c8b37f8/libavutil/version.h#L64
    format!(
        "{}.{}.{}",
        version_int >> 16, // MAJOR
        (version_int & 0x00FF00) >> 8, // MINOR
        version_int & 0xFF // MICRO
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sampled_len() {
        assert_eq!(sampled_len(0, 10), 0);
        assert_eq!(sampled_len(1, 10), 1);
        assert_eq!(sampled_len(10, 10), 1);
        assert_eq!(sampled_len(11, 10), 2);
        assert_eq!(sampled_len(450, 10), 45);
        assert_eq!(sampled_len(451, 10), 46);
    }

    #[test]
    fn test_name_from_path() {
        assert_eq!(name_from_path("/tmp/ads/ballerina.mpg"), "ballerina");
        assert_eq!(name_from_path("mega.d.txt"), "mega.d");
        assert_eq!(name_from_path("noext"), "noext");
    }

    #[test]
    fn test_format_time() {
        insta::assert_snapshot!(format_time(Duration::from_millis(125_250)), @"02:05.250");
    }

    #[test]
    fn test_find_video_files_filters_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.mpg"), b"x").unwrap();
        std::fs::write(dir.path().join("a.MPG"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let videos = find_video_files(&[dir.path().to_owned()], Some("mpg"), false).unwrap();
        let names: Vec<String> = videos.iter().map(|p| name_from_path(p)).collect();
        assert_eq!(names, vec!["a", "b"]);

        // The dummy files have no valid video header.
        let videos = find_video_files(&[dir.path().to_owned()], Some("mpg"), true).unwrap();
        assert!(videos.is_empty());
    }

    #[test]
    fn test_write_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!dir.path().join("out.txt.tmp").exists());
    }
}
