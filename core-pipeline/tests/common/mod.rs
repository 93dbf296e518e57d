//! Scripted decode backend shared by the integration tests.

#![allow(dead_code)]

use core_pipeline::{
    AudioSample, AudioSink, DecodeBackend, DecodedImage, DisplaySize, MediaSample, MetadataTags,
    PipelineError, Result, SampleQueue, StreamInfo, Usecs, VideoSample,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;

pub const RATE: u32 = 48_000;

#[derive(Debug)]
pub struct TestImage;

impl DecodedImage for TestImage {
    fn size_in_bytes(&self) -> usize {
        64
    }
}

/// Mono audio sample at 48 kHz covering `[time, time + duration)`.
pub fn audio(time: Usecs, duration: Usecs) -> AudioSample {
    let frames = (duration * RATE as i64 / 1_000_000) as u32;
    let data: Vec<f32> = (0..frames).map(|i| i as f32).collect();
    AudioSample::new(0, time, duration, frames, 1, RATE, data.into())
}

pub fn frame(time: Usecs, duration: Usecs, keyframe: bool) -> VideoSample {
    VideoSample::new(
        0,
        time,
        duration,
        DisplaySize::new(320, 240),
        time,
        Arc::new(TestImage),
        keyframe,
    )
}

/// Calls observed by a [`ScriptedBackend`].
#[derive(Debug, Default)]
pub struct BackendLog {
    pub audio_calls: usize,
    pub video_calls: usize,
    pub seeks: Vec<Usecs>,
}

/// Backend that replays pre-built samples, one per decode call.
///
/// Seeking does not move the script: output always starts from the first
/// remaining sample, like a coarse seek to an earlier sync point.
pub struct ScriptedBackend {
    info: StreamInfo,
    audio: VecDeque<AudioSample>,
    video: VecDeque<VideoSample>,
    audio_error: Option<PipelineError>,
    video_error: Option<PipelineError>,
    seek_error: Option<PipelineError>,
    seek_gate: Option<SeekGate>,
    log: Arc<Mutex<BackendLog>>,
}

/// Holds the backend inside `seek` until the test releases it.
struct SeekGate {
    entered: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            info: StreamInfo::default().with_seekable(true),
            audio: VecDeque::new(),
            video: VecDeque::new(),
            audio_error: None,
            video_error: None,
            seek_error: None,
            seek_gate: None,
            log: Arc::new(Mutex::new(BackendLog::default())),
        }
    }

    pub fn with_audio(mut self, samples: Vec<AudioSample>) -> Self {
        self.info = self.info.with_audio(RATE, 1);
        self.audio = samples.into();
        self
    }

    pub fn with_video(mut self, frames: Vec<VideoSample>) -> Self {
        self.info = self.info.with_video(DisplaySize::new(320, 240));
        self.video = frames.into();
        self
    }

    pub fn with_duration(mut self, duration: Usecs) -> Self {
        self.info = self.info.with_duration(Some(duration));
        self
    }

    /// Fail audio decoding once the script runs out.
    pub fn failing_audio(mut self, error: PipelineError) -> Self {
        self.audio_error = Some(error);
        self
    }

    /// Fail video decoding once the script runs out.
    pub fn failing_video(mut self, error: PipelineError) -> Self {
        self.video_error = Some(error);
        self
    }

    pub fn failing_seek(mut self, error: PipelineError) -> Self {
        self.seek_error = Some(error);
        self
    }

    /// Block every backend seek until the test sends on the returned
    /// release channel. The first receiver fires once the seek has started.
    pub fn gated_seek(mut self) -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.seek_gate = Some(SeekGate {
            entered: entered_tx,
            release: release_rx,
        });
        (self, entered_rx, release_tx)
    }

    pub fn info(&self) -> StreamInfo {
        self.info.clone()
    }

    pub fn log(&self) -> Arc<Mutex<BackendLog>> {
        Arc::clone(&self.log)
    }

    pub fn boxed(self) -> Box<dyn DecodeBackend> {
        Box::new(self)
    }
}

impl DecodeBackend for ScriptedBackend {
    fn read_metadata(&mut self) -> Result<(StreamInfo, MetadataTags)> {
        let mut tags = MetadataTags::new();
        tags.insert("title".to_string(), "Scripted".to_string());
        Ok((self.info.clone(), tags))
    }

    fn decode_audio_unit(&mut self, sink: &AudioSink<'_>) -> Result<bool> {
        self.log.lock().audio_calls += 1;
        match self.audio.pop_front() {
            Some(sample) => {
                sink.push(sample);
                Ok(true)
            }
            None => match &self.audio_error {
                Some(error) => Err(error.clone()),
                None => Ok(false),
            },
        }
    }

    fn decode_video_unit(
        &mut self,
        queue: &SampleQueue<VideoSample>,
        keyframe_skip: &mut bool,
        time_threshold: Usecs,
    ) -> Result<bool> {
        self.log.lock().video_calls += 1;
        let frame = match self.video.pop_front() {
            Some(frame) => frame,
            None => {
                return match &self.video_error {
                    Some(error) => Err(error.clone()),
                    None => Ok(false),
                }
            }
        };

        if *keyframe_skip {
            if !frame.is_keyframe() {
                return Ok(true);
            }
            *keyframe_skip = false;
        }
        if frame.end_time() < time_threshold && !frame.is_keyframe() {
            return Ok(true);
        }
        queue.push(Arc::new(frame));
        Ok(true)
    }

    fn seek(&mut self, target: Usecs, _start: Usecs, _end: Usecs, _current: Usecs) -> Result<()> {
        self.log.lock().seeks.push(target);
        if let Some(gate) = &self.seek_gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }
        match &self.seek_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
