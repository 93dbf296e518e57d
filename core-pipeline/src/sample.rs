//! # Decoded Samples
//!
//! Immutable units of decoded output. A sample is produced exactly once by a
//! decode backend, wrapped in an [`Arc`], and shared read-only from then on.
//! Retiming or trimming never mutates a published sample; it builds a new one
//! that shares the underlying buffer or image where possible.
//!
//! All times are expressed in microseconds.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Microseconds per second.
pub const USECS_PER_S: i64 = 1_000_000;

/// Media time in microseconds.
pub type Usecs = i64;

/// Converts a frame count at `rate` Hz into microseconds.
///
/// Returns `None` on overflow or when `rate` is zero.
pub fn frames_to_usecs(frames: u64, rate: u32) -> Option<Usecs> {
    if rate == 0 {
        return None;
    }
    let frames = i64::try_from(frames).ok()?;
    frames.checked_mul(USECS_PER_S).map(|v| v / rate as i64)
}

/// Converts microseconds into a frame count at `rate` Hz (rounded down).
pub fn usecs_to_frames(usecs: Usecs, rate: u32) -> Option<i64> {
    usecs.checked_mul(rate as i64).map(|v| v / USECS_PER_S)
}

// ============================================================================
// Sample Kinds
// ============================================================================

/// Which elementary stream a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Common metadata shared by every decoded sample.
pub trait MediaSample: fmt::Debug + Send + Sync + 'static {
    /// Stream kind of this sample.
    fn kind(&self) -> MediaKind;

    /// Approximate byte offset in the source this sample was decoded from.
    fn offset(&self) -> i64;

    /// Presentation start time.
    fn time(&self) -> Usecs;

    /// Presentation duration.
    fn duration(&self) -> Usecs;

    /// Presentation end time (`time + duration`).
    fn end_time(&self) -> Usecs {
        self.time() + self.duration()
    }

    /// Number of frames carried. Video samples always carry one.
    fn frames(&self) -> u32;

    /// Approximate heap footprint, used for memory accounting.
    fn size_in_bytes(&self) -> usize;
}

/// A sample handed to a consumer by the orchestrator.
///
/// `discontinuity` is set on the first sample delivered after a reset so the
/// consumer can resynchronize its presentation clock.
#[derive(Debug)]
pub struct Decoded<T> {
    pub sample: Arc<T>,
    pub discontinuity: bool,
}

impl<T> Decoded<T> {
    pub fn new(sample: Arc<T>, discontinuity: bool) -> Self {
        Self {
            sample,
            discontinuity,
        }
    }
}

impl<T> Clone for Decoded<T> {
    fn clone(&self) -> Self {
        Self {
            sample: Arc::clone(&self.sample),
            discontinuity: self.discontinuity,
        }
    }
}

// ============================================================================
// Audio
// ============================================================================

/// A block of decoded PCM audio.
///
/// Samples are interleaved `f32` values in `[-1.0, 1.0]`:
/// `data.len() == frames * channels`.
#[derive(Clone)]
pub struct AudioSample {
    offset: i64,
    time: Usecs,
    duration: Usecs,
    frames: u32,
    channels: u32,
    rate: u32,
    data: Arc<[f32]>,
}

impl AudioSample {
    /// Create a new audio sample from an already populated buffer.
    pub fn new(
        offset: i64,
        time: Usecs,
        duration: Usecs,
        frames: u32,
        channels: u32,
        rate: u32,
        data: Arc<[f32]>,
    ) -> Self {
        debug_assert_eq!(data.len(), frames as usize * channels as usize);
        Self {
            offset,
            time,
            duration,
            frames,
            channels,
            rate,
            data,
        }
    }

    /// Number of interleaved channels.
    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Sample rate in Hz.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Interleaved PCM data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Build a copy of this sample with the frames before `target` removed.
    ///
    /// The result starts exactly at `target` and its duration is recomputed
    /// from the remaining frame count.
    pub fn trimmed_to(&self, target: Usecs) -> Result<AudioSample> {
        if target <= self.time {
            return Ok(self.clone());
        }

        let to_prune = usecs_to_frames(target - self.time, self.rate)
            .ok_or_else(|| PipelineError::Internal("Audio trim overflow".to_string()))?;
        if to_prune > self.frames as i64 {
            return Err(PipelineError::Internal(format!(
                "Cannot prune {} frames from a sample of {} frames",
                to_prune, self.frames
            )));
        }

        let frames = self.frames - to_prune as u32;
        let duration = frames_to_usecs(frames as u64, self.rate)
            .ok_or_else(|| PipelineError::Internal("Audio duration overflow".to_string()))?;
        let start = to_prune as usize * self.channels as usize;

        Ok(AudioSample {
            offset: self.offset,
            time: target,
            duration,
            frames,
            channels: self.channels,
            rate: self.rate,
            data: Arc::from(&self.data[start..]),
        })
    }
}

impl fmt::Debug for AudioSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSample")
            .field("offset", &self.offset)
            .field("time", &self.time)
            .field("duration", &self.duration)
            .field("frames", &self.frames)
            .field("channels", &self.channels)
            .field("rate", &self.rate)
            .finish()
    }
}

impl MediaSample for AudioSample {
    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn offset(&self) -> i64 {
        self.offset
    }

    fn time(&self) -> Usecs {
        self.time
    }

    fn duration(&self) -> Usecs {
        self.duration
    }

    fn frames(&self) -> u32 {
        self.frames
    }

    fn size_in_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.data.len() * std::mem::size_of::<f32>()
    }
}

// ============================================================================
// Video
// ============================================================================

/// Opaque decoded picture owned by the graphics subsystem.
///
/// The pipeline never inspects pixels; it only keeps a shared reference.
pub trait DecodedImage: fmt::Debug + Send + Sync {
    /// Approximate memory held by the image.
    fn size_in_bytes(&self) -> usize {
        0
    }
}

/// Shared handle to a decoded picture.
pub type ImageHandle = Arc<dyn DecodedImage>;

/// Display dimensions of a video frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl DisplaySize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// One decoded video frame.
///
/// A frame without an image is a duplicate: the consumer should keep showing
/// the previous picture for this frame's time window.
#[derive(Debug, Clone)]
pub struct VideoSample {
    offset: i64,
    time: Usecs,
    duration: Usecs,
    display: DisplaySize,
    timecode: i64,
    image: Option<ImageHandle>,
    keyframe: bool,
}

impl VideoSample {
    /// Create a frame carrying a decoded picture.
    pub fn new(
        offset: i64,
        time: Usecs,
        duration: Usecs,
        display: DisplaySize,
        timecode: i64,
        image: ImageHandle,
        keyframe: bool,
    ) -> Self {
        Self {
            offset,
            time,
            duration,
            display,
            timecode,
            image: Some(image),
            keyframe,
        }
    }

    /// Create a duplicate frame that redisplays the previous picture.
    pub fn duplicate(offset: i64, time: Usecs, duration: Usecs, timecode: i64) -> Self {
        Self {
            offset,
            time,
            duration,
            display: DisplaySize::default(),
            timecode,
            image: None,
            keyframe: false,
        }
    }

    pub fn display_size(&self) -> DisplaySize {
        self.display
    }

    /// Codec-specific timecode.
    pub fn timecode(&self) -> i64 {
        self.timecode
    }

    pub fn image(&self) -> Option<&ImageHandle> {
        self.image.as_ref()
    }

    pub fn is_keyframe(&self) -> bool {
        self.keyframe
    }

    pub fn is_duplicate(&self) -> bool {
        self.image.is_none()
    }

    /// Shallow copy with a new presentation window. The image is shared.
    pub fn retimed(&self, time: Usecs, duration: Usecs) -> VideoSample {
        VideoSample {
            time,
            duration,
            ..self.clone()
        }
    }
}

impl MediaSample for VideoSample {
    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn offset(&self) -> i64 {
        self.offset
    }

    fn time(&self) -> Usecs {
        self.time
    }

    fn duration(&self) -> Usecs {
        self.duration
    }

    fn frames(&self) -> u32 {
        1
    }

    fn size_in_bytes(&self) -> usize {
        std::mem::size_of::<Self>() + self.image.as_ref().map_or(0, |i| i.size_in_bytes())
    }
}
