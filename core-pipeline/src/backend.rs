//! # Decode Backend Contract
//!
//! Boundary between the pipeline and codec-specific decoders. A backend
//! decodes one unit at a time into the sample queues the orchestrator hands
//! it; everything about scheduling, delivery and seeking lives above this
//! trait.
//!
//! ## Threading Model
//!
//! Backends are owned by a single [`DecodeOrchestrator`](crate::orchestrator::DecodeOrchestrator)
//! and only ever called from its task queue, so they need `Send` but not
//! `Sync`.

use crate::compactor::PacketCompactor;
use crate::config::CompactorConfig;
use crate::error::Result;
use crate::queue::SampleQueue;
use crate::sample::{AudioSample, DisplaySize, Usecs, VideoSample};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// ============================================================================
// Stream Description
// ============================================================================

/// Audio track parameters reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    /// Sample rate in Hz
    pub rate: u32,
    /// Number of interleaved channels
    pub channels: u32,
}

/// Video track parameters reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub display: DisplaySize,
}

/// What the media resource contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub audio: Option<AudioInfo>,
    pub video: Option<VideoInfo>,
    /// Total media duration, when known
    pub duration: Option<Usecs>,
    /// Whether the backend can honor `seek`
    pub seekable: bool,
}

impl StreamInfo {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn with_audio(mut self, rate: u32, channels: u32) -> Self {
        self.audio = Some(AudioInfo { rate, channels });
        self
    }

    pub fn with_video(mut self, display: DisplaySize) -> Self {
        self.video = Some(VideoInfo { display });
        self
    }

    pub fn with_duration(mut self, duration: Option<Usecs>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_seekable(mut self, seekable: bool) -> Self {
        self.seekable = seekable;
        self
    }
}

/// Free-form metadata tags (title, artist, ...).
pub type MetadataTags = HashMap<String, String>;

// ============================================================================
// Audio Output
// ============================================================================

/// Where a backend writes decoded audio.
///
/// Backends with well-shaped output push whole samples; backends with
/// irregular frame counts go through [`AudioSink::compactor`].
pub struct AudioSink<'a> {
    queue: &'a SampleQueue<AudioSample>,
    compactor: &'a CompactorConfig,
}

impl<'a> AudioSink<'a> {
    pub fn new(queue: &'a SampleQueue<AudioSample>, compactor: &'a CompactorConfig) -> Self {
        Self { queue, compactor }
    }

    pub fn push(&self, sample: AudioSample) {
        self.queue.push(Arc::new(sample));
    }

    /// Packet compactor writing into the same queue.
    pub fn compactor(&self) -> PacketCompactor<'a> {
        PacketCompactor::new(self.queue, self.compactor)
    }

    pub fn queue(&self) -> &'a SampleQueue<AudioSample> {
        self.queue
    }
}

// ============================================================================
// Backend Trait
// ============================================================================

/// A codec-specific decoder driven by the orchestrator.
///
/// Each `decode_*_unit` call decodes one unit of input and pushes zero or
/// more samples. `Ok(false)` means the stream is permanently exhausted; an
/// error is treated as permanent for that stream.
pub trait DecodeBackend: Send {
    /// Probe the resource.
    fn read_metadata(&mut self) -> Result<(StreamInfo, MetadataTags)>;

    /// Decode one unit of audio into `sink`.
    fn decode_audio_unit(&mut self, sink: &AudioSink<'_>) -> Result<bool>;

    /// Decode one unit of video into `queue`.
    ///
    /// While `keyframe_skip` is set, non-keyframes before `time_threshold`
    /// may be decoded but must not be enqueued. The backend clears the flag
    /// once it reaches a keyframe; a flag that is still set on return means
    /// more input is needed.
    fn decode_video_unit(
        &mut self,
        queue: &SampleQueue<VideoSample>,
        keyframe_skip: &mut bool,
        time_threshold: Usecs,
    ) -> Result<bool>;

    /// Coarse seek to the sync point at or before `target`.
    ///
    /// `start`/`end` bound the seekable range and `current` is the playback
    /// position before the seek.
    fn seek(&mut self, target: Usecs, start: Usecs, end: Usecs, current: Usecs) -> Result<()>;
}

// ============================================================================
// Buffered Ranges
// ============================================================================

/// Half-open byte range `[start, end)` held in the resource cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Half-open media time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Usecs,
    pub end: Usecs,
}

impl TimeRange {
    pub fn new(start: Usecs, end: Usecs) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: Usecs) -> bool {
        time >= self.start && time < self.end
    }
}

/// Maps cached byte ranges to playable time ranges.
pub trait BufferedRangeEstimator: Send + Sync {
    fn estimate(&self, cached: &[ByteRange], duration: Usecs) -> Vec<TimeRange>;
}
