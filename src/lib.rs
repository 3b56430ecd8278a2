use std::path::PathBuf;

pub mod config;
pub mod detect;
pub mod fingerprint;
pub mod util;

pub use config::Config;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("fingerprint dimension mismatch: expected={expected} actual={actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("malformed file {path:?} at line {line}: {reason}")]
    MalformedFile {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("missing resource: {0:?}")]
    MissingResource(PathBuf),
    #[error("degenerate input: {0}")]
    DegenerateInput(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("no paths provided to analyzer")]
    AnalyzerMissingPaths,
    #[cfg(feature = "video")]
    #[error("no video stream found in {0:?}")]
    MissingVideoStream(PathBuf),
    #[cfg(feature = "video")]
    #[error("FFmpeg error: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),
    #[error("bincode error: {0}")]
    BincodeError(#[from] bincode::Error),
    #[error("serde_json error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn malformed(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedFile {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
