use std::path::Path;
use std::time::Duration;

use crate::{Error, Result};

// Converts a timestamp in time base units into a [std::time::Duration] that
// represents the timestamp in time units.
pub(crate) fn to_timestamp(
    time_base: ffmpeg_next::util::rational::Rational,
    raw_timestamp: i64,
) -> Duration {
    let time_base: f64 = time_base.into();
    let ts = raw_timestamp as f64 * time_base;
    Duration::from_secs_f64(ts.max(0.0))
}

pub(crate) fn find_best_video_stream<'a>(
    input: &'a ffmpeg_next::format::context::Input,
    path: &Path,
) -> Result<ffmpeg_next::format::stream::Stream<'a>> {
    input
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .ok_or_else(|| Error::MissingVideoStream(path.to_owned()))
}

// Try to get the duration from the stream info. If it is invalid, get it
// from the format context.
//
// As an example, Matroska does not store the duration in the stream; it
// only stores it in the format context.
pub(crate) fn stream_duration(
    ctx: &ffmpeg_next::format::context::Input,
    stream: &ffmpeg_next::format::stream::Stream,
) -> Duration {
    if stream.duration() >= 0 {
        to_timestamp(stream.time_base(), stream.duration())
    } else if ctx.duration() > 0 {
        // The format-level duration is in AV_TIME_BASE (microsecond) units.
        Duration::from_micros(ctx.duration() as u64)
    } else {
        Duration::ZERO
    }
}
