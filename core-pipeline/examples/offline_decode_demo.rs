//! # Offline Decode Example
//!
//! Drives a synthetic sine-wave backend through the decode pipeline: an
//! accurate seek on the serial decode thread, then a whole-stream offline
//! decode of what follows.
//!
//! Run with: `cargo run --example offline_decode_demo --package core-pipeline`

use core_pipeline::{
    AudioSink, DecodeBackend, DecodeOrchestrator, MediaSample, MetadataTags,
    OfflineAudioDecoder, PipelineConfig, Result, SampleQueue, SeekJob, SeekTask, StreamInfo,
    Usecs, VideoSample,
};
use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
use std::f64::consts::PI;

const RATE: u32 = 44_100;
const CHANNELS: u32 = 2;
/// MPEG-1 Layer III packet size; never a power of two.
const PACKET_FRAMES: u32 = 1_152;

// ============================================================================
// Synthetic Backend
// ============================================================================

struct SineBackend {
    frequency: f64,
    total_frames: u64,
    position: u64,
}

impl SineBackend {
    fn new(duration_secs: f64, frequency: f64) -> Self {
        Self {
            frequency,
            total_frames: (RATE as f64 * duration_secs) as u64,
            position: 0,
        }
    }

    fn frame_time(&self, frame: u64) -> Usecs {
        (frame * 1_000_000 / RATE as u64) as Usecs
    }

    fn duration(&self) -> Usecs {
        self.frame_time(self.total_frames)
    }
}

impl DecodeBackend for SineBackend {
    fn read_metadata(&mut self) -> Result<(StreamInfo, MetadataTags)> {
        let info = StreamInfo::default()
            .with_audio(RATE, CHANNELS)
            .with_duration(Some(self.duration()))
            .with_seekable(true);
        let mut tags = MetadataTags::new();
        tags.insert("title".to_string(), format!("{} Hz sine", self.frequency));
        Ok((info, tags))
    }

    fn decode_audio_unit(&mut self, sink: &AudioSink<'_>) -> Result<bool> {
        let remaining = self.total_frames - self.position;
        if remaining == 0 {
            return Ok(false);
        }

        let frames = remaining.min(PACKET_FRAMES as u64) as u32;
        let time = self.frame_time(self.position);
        let mut cursor = self.position;
        let step = 2.0 * PI * self.frequency / RATE as f64;

        sink.compactor()
            .push(0, time, RATE, frames, CHANNELS, |buffer: &mut [f32]| {
                let written = (buffer.len() / CHANNELS as usize) as u32;
                for frame in buffer.chunks_exact_mut(CHANNELS as usize) {
                    let value = ((cursor as f64 * step).sin() * 0.3) as f32;
                    frame.fill(value);
                    cursor += 1;
                }
                written
            })?;

        self.position += frames as u64;
        Ok(true)
    }

    fn decode_video_unit(
        &mut self,
        _queue: &SampleQueue<VideoSample>,
        _keyframe_skip: &mut bool,
        _time_threshold: Usecs,
    ) -> Result<bool> {
        Ok(false)
    }

    fn seek(&mut self, target: Usecs, _start: Usecs, _end: Usecs, _current: Usecs) -> Result<()> {
        // Packet boundary at or before the target.
        let frame = target.max(0) as u64 * RATE as u64 / 1_000_000;
        self.position = (frame / PACKET_FRAMES as u64 * PACKET_FRAMES as u64).min(self.total_frames);
        Ok(())
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> anyhow::Result<()> {
    init_logging(
        LoggingConfig::default()
            .with_format(LogFormat::Compact)
            .with_level(LogLevel::Debug),
    )?;

    let backend = SineBackend::new(2.0, 440.0);
    let duration = backend.duration();
    let (orchestrator, worker) =
        DecodeOrchestrator::with_serial_queue(Box::new(backend), PipelineConfig::default())?;

    let (info, tags) = orchestrator.read_metadata()?;
    println!(
        "Opened '{}': {:?} us, audio {:?}",
        tags.get("title").map(String::as_str).unwrap_or("untitled"),
        info.duration,
        info.audio
    );

    let target = 1_250_000;
    let (_seek, handle) =
        SeekTask::start(orchestrator.clone(), SeekJob::new(target, 0, duration, 0, info))?;
    let outcome = handle.blocking_wait()?;
    if let Some(first) = outcome.audio {
        println!(
            "Seek to {} us landed at {} us ({} frames, discontinuity: {})",
            target,
            first.sample.time(),
            first.sample.frames(),
            first.discontinuity
        );
    }

    let decoder = OfflineAudioDecoder::new(orchestrator.clone());
    let decoded = decoder.decode()?;
    println!(
        "Decoded {} frames ({:.3} s) after the seek point",
        decoded.frames,
        decoded.duration_secs()
    );
    println!("Stats: {:?}", orchestrator.stats());

    orchestrator.shutdown();
    worker.shutdown();
    Ok(())
}
