extern crate ffmpeg_next;
extern crate image;
#[cfg(feature = "rayon")]
extern crate rayon;

use std::path::Path;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

use super::{AnalysisRecord, Fingerprint, VideoFingerprints};
use crate::{Config, Error, Result};

/// Thin wrapper around the native `FFmpeg` video decoder. Decoded frames are converted
/// to GRAY8 at their original size.
struct Decoder {
    decoder: ffmpeg_next::codec::decoder::Video,
    converter: ffmpeg_next::software::scaling::context::Context,
}

impl Decoder {
    fn build_threading_config() -> ffmpeg_next::codec::threading::Config {
        let mut config = ffmpeg_next::codec::threading::Config::default();
        config.count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        config.kind = ffmpeg_next::codec::threading::Type::Frame;
        config
    }

    fn from_stream(stream: ffmpeg_next::format::stream::Stream, threaded: bool) -> Result<Self> {
        let ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let mut decoder = ctx.decoder();

        if threaded {
            decoder.set_threading(Self::build_threading_config());
        }

        let decoder = decoder.video()?;
        let converter = decoder.converter(ffmpeg_next::format::Pixel::GRAY8)?;

        Ok(Self { decoder, converter })
    }

    fn send_packet(&mut self, packet: &ffmpeg_next::packet::Packet) -> Result<()> {
        Ok(self.decoder.send_packet(packet)?)
    }

    fn send_eof(&mut self) -> Result<()> {
        Ok(self.decoder.send_eof()?)
    }

    fn receive_frame(&mut self, frame: &mut ffmpeg_next::frame::Video) -> Result<()> {
        Ok(self.decoder.receive_frame(frame)?)
    }

    fn convert_frame(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        converted: &mut ffmpeg_next::frame::Video,
    ) -> Result<()> {
        Ok(self.converter.run(frame, converted)?)
    }
}

// Turns a GRAY8 frame into a fingerprint by resizing it to `width` x `height` with a cubic
// filter. Rows in FFmpeg frames may be padded, so they are copied one at a time.
fn fingerprint_frame(
    frame: &ffmpeg_next::frame::Video,
    width: u32,
    height: u32,
) -> Result<Fingerprint> {
    let (w, h) = (frame.width(), frame.height());
    let stride = frame.stride(0);
    let data = frame.data(0);

    let mut pixels = Vec::with_capacity(w as usize * h as usize);
    for row in 0..h as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + w as usize]);
    }

    resize_gray(w, h, pixels, width, height)
}

fn resize_gray(w: u32, h: u32, pixels: Vec<u8>, width: u32, height: u32) -> Result<Fingerprint> {
    let len = pixels.len();
    let gray = image::GrayImage::from_raw(w, h, pixels).ok_or_else(|| {
        Error::DegenerateInput(format!(
            "decoded {}x{} frame has {} pixels, expected {}",
            w,
            h,
            len,
            w as usize * h as usize
        ))
    })?;
    let resized =
        image::imageops::resize(&gray, width, height, image::imageops::FilterType::CatmullRom);
    Ok(Fingerprint::new(resized.into_raw()))
}

/// Analyzes one or more videos and converts them into [VideoFingerprints].
///
/// If `threaded_decoding` is set to `true`, FFmpeg will decode each video using multiple
/// threads. If `force` is set, any existing analysis records on disk will be **ignored**.
///
/// For a given video, the analyzer:
///
/// 1. Picks the most suitable video stream
/// 2. Decodes every frame and counts it towards the total frame count
/// 3. Keeps one frame every `sample_rate` frames, starting with the first
/// 4. Converts kept frames to grayscale and resizes them to the configured fingerprint size
/// 5. Returns a [VideoFingerprints] and (optionally) writes a descriptor and an
///    [AnalysisRecord] to the output directory
#[derive(Debug)]
pub struct Analyzer<P: AsRef<Path>> {
    pub(crate) videos: Vec<P>,
    threaded_decoding: bool,
    force: bool,
}

impl<P: AsRef<Path>> Default for Analyzer<P> {
    fn default() -> Self {
        Self {
            videos: Default::default(),
            threaded_decoding: false,
            force: false,
        }
    }
}

impl<P: AsRef<Path>> Analyzer<P> {
    /// Constructs a new [Analyzer] from a list of video paths.
    pub fn from_files(videos: impl Into<Vec<P>>, threaded_decoding: bool, force: bool) -> Self {
        let mut analyzer = Self::default()
            .with_threaded_decoding(threaded_decoding)
            .with_force(force);
        analyzer.videos = videos.into();
        analyzer
    }

    /// Returns the video paths used by this analyzer.
    pub fn videos(&self) -> &[P] {
        &self.videos
    }

    /// Returns a new [Analyzer] with `thread_decoding` set to the provided value.
    pub fn with_threaded_decoding(mut self, threaded_decoding: bool) -> Self {
        self.threaded_decoding = threaded_decoding;
        self
    }

    /// Returns a new [Analyzer] with `force` set to the provided value.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    fn process_frames(
        ctx: &mut ffmpeg_next::format::context::Input,
        stream_idx: usize,
        decoder: &mut Decoder,
        config: &Config,
    ) -> Result<(Vec<Fingerprint>, u64)> {
        let span = tracing::span!(tracing::Level::TRACE, "process_frames");
        let _enter = span.enter();

        let sample_rate = config.sample_rate as u64;
        let mut frames = Vec::new();
        let mut total_frames = 0u64;
        let mut frame = ffmpeg_next::frame::Video::empty();
        let mut frame_gray = ffmpeg_next::frame::Video::empty();

        let mut drain = |decoder: &mut Decoder, frames: &mut Vec<Fingerprint>| -> Result<()> {
            while decoder.receive_frame(&mut frame).is_ok() {
                if total_frames % sample_rate == 0 {
                    decoder.convert_frame(&frame, &mut frame_gray)?;
                    frames.push(fingerprint_frame(
                        &frame_gray,
                        config.resize_width,
                        config.resize_height,
                    )?);
                }
                total_frames += 1;
            }
            Ok(())
        };

        let video_packets = ctx
            .packets()
            .filter(|(s, _)| s.index() == stream_idx)
            .map(|(_, p)| p);

        for p in video_packets {
            decoder.send_packet(&p)?;
            drain(decoder, &mut frames)?;
        }
        decoder.send_eof()?;
        drain(decoder, &mut frames)?;

        Ok((frames, total_frames))
    }

    /// Analyzes a single video. If `output_dir` is set, the descriptor and analysis record
    /// are written there and reused on later runs unless `force` is set.
    pub(crate) fn run_single(
        &self,
        path: impl AsRef<Path>,
        config: &Config,
        output_dir: Option<&Path>,
    ) -> Result<VideoFingerprints> {
        let span = tracing::span!(tracing::Level::TRACE, "run");
        let _enter = span.enter();

        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::MissingResource(path.to_owned()));
        }
        let name = crate::util::name_from_path(path);
        let md5 = crate::util::compute_header_md5sum(path)?;

        let record_path = output_dir.map(|d| d.join(format!("{}.{}", name, super::ANALYSIS_FILE_EXT)));
        let descriptor_path =
            output_dir.map(|d| d.join(format!("{}.{}", name, super::DESCRIPTOR_FILE_EXT)));

        // Check if we've already analyzed this video with the same parameters.
        if let (false, Some(record_path)) = (self.force, &record_path) {
            if let Ok(record) = AnalysisRecord::from_path(record_path) {
                if record.is_reusable(&md5, config) {
                    tracing::info!("skipping analysis for {}...", path.display());
                    return Ok(record.into_fingerprints());
                }
            }
        }

        let mut ctx = ffmpeg_next::format::input(&path)?;
        let (stream_idx, duration, mut decoder) = {
            let stream = super::util::find_best_video_stream(&ctx, path)?;
            let duration = super::util::stream_duration(&ctx, &stream);
            (
                stream.index(),
                duration,
                Decoder::from_stream(stream, self.threaded_decoding)?,
            )
        };

        tracing::debug!("starting frame processing for {}", path.display());
        let (frames, total_frames) = Self::process_frames(&mut ctx, stream_idx, &mut decoder, config)?;
        tracing::debug!(
            sampled = frames.len(),
            total_frames,
            duration_ms = duration.as_millis() as u64,
            "completed frame processing for {}",
            path.display(),
        );

        let fingerprints = VideoFingerprints::new(frames, total_frames, duration.as_millis() as u64);

        // Write results to disk.
        if let (Some(descriptor_path), Some(record_path)) = (descriptor_path, record_path) {
            fingerprints.write_descriptor(&descriptor_path)?;
            AnalysisRecord::new(md5, config, fingerprints.clone()).write(&record_path)?;
            tracing::info!("descriptors saved in {}", descriptor_path.display());
        }

        Ok(fingerprints)
    }
}

impl<P: AsRef<Path> + Sync> Analyzer<P> {
    /// Runs this analyzer over all of its videos. Results are returned in input order,
    /// keyed by video name.
    pub fn run(
        &self,
        config: &Config,
        output_dir: Option<&Path>,
        threading: bool,
    ) -> Result<Vec<(String, VideoFingerprints)>> {
        if self.videos.is_empty() {
            return Err(Error::AnalyzerMissingPaths);
        }
        if let Some(dir) = output_dir {
            std::fs::create_dir_all(dir)?;
        }

        let analyze = |path: &P| -> Result<(String, VideoFingerprints)> {
            let name = crate::util::name_from_path(path);
            Ok((name, self.run_single(path, config, output_dir)?))
        };

        let mut data = Vec::new();

        if cfg!(feature = "rayon") && threading {
            #[cfg(feature = "rayon")]
            {
                data = self
                    .videos
                    .par_iter()
                    .map(analyze)
                    .collect::<Result<Vec<_>>>()?;
            }
        } else {
            data = self.videos.iter().map(analyze).collect::<Result<Vec<_>>>()?;
        }

        Ok(data)
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_analyzer_requires_paths() {
        let analyzer = Analyzer::<PathBuf>::from_files(Vec::new(), false, false);
        let err = analyzer.run(&Config::default(), None, false).unwrap_err();
        assert!(matches!(err, Error::AnalyzerMissingPaths));
    }

    #[test]
    fn test_resize_gray() {
        let fingerprint = resize_gray(4, 2, vec![10; 8], 2, 1).unwrap();
        assert_eq!(fingerprint.as_slice(), &[10, 10]);

        let err = resize_gray(4, 2, vec![10; 5], 2, 1).unwrap_err();
        assert!(matches!(err, Error::DegenerateInput(_)));
    }

    #[test]
    fn test_analyzer_missing_video() {
        let analyzer = Analyzer::<&Path>::default();
        let err = analyzer
            .run_single(Path::new("/nonexistent/ad.mpg"), &Config::default(), None)
            .unwrap_err();
        assert!(matches!(err, Error::MissingResource(_)));
    }
}
