//! # Decode Orchestrator
//!
//! The active component of the pipeline. It owns the decode backend and one
//! [`SampleQueue`] per stream, drives the backend until a queue has data or
//! the stream is exhausted, and reports every request through a
//! [`DecodeCallback`].
//!
//! ## Request Flow
//!
//! ```text
//! post_*_request ──dispatch──▶ TaskQueue ──▶ request_*_data
//!                                               │ decode units until
//!                                               │ queue non-empty / finished
//!                                               ▼
//!                     on_*_decoded | on_*_eos | on_decode_error
//! ```
//!
//! A video request asked to skip to the next keyframe performs at most one
//! backend call per turn. While the backend still needs input it re-posts
//! itself to the task queue, so a long skip never monopolizes the worker.
//!
//! ## Cancellation
//!
//! Every posted continuation captures the current generation. Bumping the
//! generation (`reset_decode`, `cancel_pending_requests`, `shutdown`) turns
//! all earlier continuations into no-ops.
//!
//! ## Threading
//!
//! Request methods are meant to run on the task queue. Queue accessors,
//! statistics and cancellation are safe from any thread.

use crate::backend::{
    AudioSink, BufferedRangeEstimator, ByteRange, DecodeBackend, MetadataTags, StreamInfo,
    TimeRange,
};
use crate::callback::DecodeCallback;
use crate::config::{PipelineConfig, StreamPhase};
use crate::error::{PipelineError, Result};
use crate::queue::SampleQueue;
use crate::sample::{AudioSample, Decoded, MediaKind, MediaSample, Usecs, VideoSample};
use crate::scheduler::{SerialTaskQueue, TaskQueue};
use crate::stats::{DecodeStats, StatsCounters};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Per-stream decode state.
struct StreamState<T> {
    kind: MediaKind,
    queue: SampleQueue<T>,
    discontinuity: AtomicBool,
    outstanding: AtomicBool,
    phase: Mutex<StreamPhase>,
}

impl<T: MediaSample> StreamState<T> {
    fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            queue: SampleQueue::new(),
            discontinuity: AtomicBool::new(false),
            outstanding: AtomicBool::new(false),
            phase: Mutex::new(StreamPhase::Idle),
        }
    }

    fn set_phase(&self, phase: StreamPhase) {
        *self.phase.lock() = phase;
    }

    fn phase(&self) -> StreamPhase {
        *self.phase.lock()
    }

    fn reset(&self) {
        self.queue.reset();
        self.discontinuity.store(true, Ordering::Release);
        self.outstanding.store(false, Ordering::Release);
        self.set_phase(StreamPhase::Idle);
    }
}

/// How a video request loop ended.
enum VideoStep {
    Ready,
    Repost(bool),
}

/// Drives a [`DecodeBackend`] and delivers its output asynchronously.
pub struct DecodeOrchestrator {
    backend: Mutex<Box<dyn DecodeBackend>>,
    audio: StreamState<AudioSample>,
    video: StreamState<VideoSample>,
    task_queue: Arc<dyn TaskQueue>,
    callback: RwLock<Option<Arc<dyn DecodeCallback>>>,
    info: RwLock<Option<StreamInfo>>,
    generation: AtomicU64,
    skip_streak: AtomicU32,
    shut_down: AtomicBool,
    stats: StatsCounters,
    config: PipelineConfig,
}

impl DecodeOrchestrator {
    /// Create an orchestrator that posts its continuations to `task_queue`.
    pub fn new(
        backend: Box<dyn DecodeBackend>,
        task_queue: Arc<dyn TaskQueue>,
        config: PipelineConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        Ok(Arc::new(Self {
            backend: Mutex::new(backend),
            audio: StreamState::new(MediaKind::Audio),
            video: StreamState::new(MediaKind::Video),
            task_queue,
            callback: RwLock::new(None),
            info: RwLock::new(None),
            generation: AtomicU64::new(0),
            skip_streak: AtomicU32::new(0),
            shut_down: AtomicBool::new(false),
            stats: StatsCounters::default(),
            config,
        }))
    }

    /// Create an orchestrator with its own decode worker thread, named after
    /// `config.decode_thread_name`.
    pub fn with_serial_queue(
        backend: Box<dyn DecodeBackend>,
        config: PipelineConfig,
    ) -> Result<(Arc<Self>, Arc<SerialTaskQueue>)> {
        config.validate()?;
        let worker = SerialTaskQueue::new(config.decode_thread_name.clone())?;
        let task_queue: Arc<dyn TaskQueue> = worker.clone();
        let orchestrator = Self::new(backend, task_queue, config)?;
        Ok((orchestrator, worker))
    }

    // ========================================================================
    // Callback Management
    // ========================================================================

    pub fn set_callback(&self, callback: Option<Arc<dyn DecodeCallback>>) {
        *self.callback.write() = callback;
    }

    /// Install `callback` and return the one it replaced.
    pub fn replace_callback(
        &self,
        callback: Option<Arc<dyn DecodeCallback>>,
    ) -> Option<Arc<dyn DecodeCallback>> {
        std::mem::replace(&mut *self.callback.write(), callback)
    }

    /// Put `previous` back, but only if `current` is still the installed
    /// callback. Returns `true` if the swap happened.
    pub fn restore_callback(
        &self,
        current: &Arc<dyn DecodeCallback>,
        previous: Option<Arc<dyn DecodeCallback>>,
    ) -> bool {
        let mut slot = self.callback.write();
        let installed = slot
            .as_ref()
            .map(|cb| Arc::as_ptr(cb) as *const () == Arc::as_ptr(current) as *const ())
            .unwrap_or(false);
        if installed {
            *slot = previous;
        }
        installed
    }

    fn callback(&self) -> Option<Arc<dyn DecodeCallback>> {
        self.callback.read().clone()
    }

    // ========================================================================
    // Synchronous Probing
    // ========================================================================

    /// Probe the resource and cache its [`StreamInfo`].
    pub fn read_metadata(&self) -> Result<(StreamInfo, MetadataTags)> {
        let (info, tags) = self.backend.lock().read_metadata()?;
        debug!(
            has_audio = info.has_audio(),
            has_video = info.has_video(),
            duration = ?info.duration,
            "Read stream metadata"
        );
        *self.info.write() = Some(info.clone());
        Ok((info, tags))
    }

    /// Stream description from the last `read_metadata` call.
    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.info.read().clone()
    }

    /// Decode until the audio queue has a sample or the stream is
    /// exhausted, and return the first queued sample.
    pub fn decode_to_first_audio(&self) -> Result<Option<Arc<AudioSample>>> {
        let mut backend = self.backend.lock();
        self.fill_audio(backend.as_mut())?;
        Ok(self.audio.queue.peek_front())
    }

    /// Decode until the video queue has a frame or the stream is exhausted,
    /// and return the first queued frame.
    pub fn decode_to_first_video(&self) -> Result<Option<Arc<VideoSample>>> {
        let mut backend = self.backend.lock();
        let queue = &self.video.queue;
        let mut skip = false;
        while queue.is_empty() && !queue.is_finished() {
            if !backend.decode_video_unit(queue, &mut skip, 0)? {
                queue.finish();
            }
        }
        Ok(queue.peek_front())
    }

    /// Playable time ranges for the given cached byte ranges. Empty while
    /// the duration is unknown.
    pub fn get_buffered(
        &self,
        estimator: &dyn BufferedRangeEstimator,
        cached: &[ByteRange],
    ) -> Vec<TimeRange> {
        match self.stream_info().and_then(|info| info.duration) {
            Some(duration) => estimator.estimate(cached, duration),
            None => Vec::new(),
        }
    }

    // ========================================================================
    // Asynchronous Requests
    // ========================================================================

    /// Post an audio request to the task queue.
    pub fn post_audio_request(self: &Arc<Self>) -> Result<()> {
        self.ensure_running()?;
        self.audio.outstanding.store(true, Ordering::Release);
        let generation = self.generation.load(Ordering::Acquire);
        let this = Arc::clone(self);
        self.dispatch_or_clear(&self.audio, move || {
            if this.is_current(generation) {
                this.request_audio_data();
            }
        })
    }

    /// Post a video request to the task queue.
    pub fn post_video_request(
        self: &Arc<Self>,
        skip_to_keyframe: bool,
        time_threshold: Usecs,
    ) -> Result<()> {
        self.ensure_running()?;
        self.video.outstanding.store(true, Ordering::Release);
        self.post_video_continuation(skip_to_keyframe, time_threshold)
    }

    /// Decode until an audio sample is available, then deliver it.
    pub fn request_audio_data(&self) {
        if self.reject_if_shut_down(MediaKind::Audio) {
            return;
        }
        self.audio.outstanding.store(true, Ordering::Release);
        self.audio.set_phase(StreamPhase::Decoding);
        debug!("Audio request started");

        let result = {
            let mut backend = self.backend.lock();
            self.fill_audio(backend.as_mut())
        };

        self.complete_request(
            &self.audio,
            result,
            &self.stats.audio_samples_delivered,
            |callback, sample| callback.on_audio_decoded(sample),
            |callback| callback.on_audio_eos(),
        );
    }

    /// Decode until a video frame is available, then deliver it.
    ///
    /// With `skip_to_keyframe` set, each turn makes a single backend call.
    /// If the backend still needs input to reach a keyframe the request is
    /// re-posted instead of looping.
    pub fn request_video_data(self: &Arc<Self>, skip_to_keyframe: bool, time_threshold: Usecs) {
        if self.reject_if_shut_down(MediaKind::Video) {
            return;
        }
        self.video.outstanding.store(true, Ordering::Release);
        self.video.set_phase(StreamPhase::Decoding);
        trace!(skip_to_keyframe, time_threshold, "Video request started");

        let step = {
            let mut backend = self.backend.lock();
            let queue = &self.video.queue;
            let mut skip = skip_to_keyframe;
            loop {
                if !queue.is_empty() || queue.is_finished() {
                    break Ok(VideoStep::Ready);
                }
                match backend.decode_video_unit(queue, &mut skip, time_threshold) {
                    Ok(true) if skip && queue.is_empty() => break Ok(VideoStep::Repost(skip)),
                    Ok(true) => {}
                    Ok(false) => queue.finish(),
                    Err(e) => break Err(e),
                }
            }
        };

        match step {
            Ok(VideoStep::Repost(skip)) => self.repost_skip(skip, time_threshold),
            Ok(VideoStep::Ready) => {
                self.skip_streak.store(0, Ordering::Relaxed);
                self.complete_video(Ok(()));
            }
            Err(e) => {
                self.skip_streak.store(0, Ordering::Relaxed);
                self.complete_video(Err(e));
            }
        }
    }

    fn repost_skip(self: &Arc<Self>, skip: bool, time_threshold: Usecs) {
        self.video.set_phase(StreamPhase::Skipping);
        StatsCounters::bump(&self.stats.keyframe_skip_reposts);

        let streak = self.skip_streak.fetch_add(1, Ordering::Relaxed) + 1;
        if streak % self.config.keyframe_skip_warn_after == 0 {
            warn!(
                reposts = streak,
                time_threshold, "Still skipping to the next keyframe"
            );
        }

        if let Err(e) = self.post_video_continuation(skip, time_threshold) {
            self.complete_video(Err(e));
        }
    }

    fn complete_video(&self, result: Result<()>) {
        self.complete_request(
            &self.video,
            result,
            &self.stats.video_frames_delivered,
            |callback, frame| callback.on_video_decoded(frame),
            |callback| callback.on_video_eos(),
        );
    }

    fn post_video_continuation(
        self: &Arc<Self>,
        skip: bool,
        time_threshold: Usecs,
    ) -> Result<()> {
        let generation = self.generation.load(Ordering::Acquire);
        let this = Arc::clone(self);
        self.dispatch_or_clear(&self.video, move || {
            if this.is_current(generation) {
                this.request_video_data(skip, time_threshold);
            }
        })
    }

    fn fill_audio(&self, backend: &mut dyn DecodeBackend) -> Result<()> {
        let queue = &self.audio.queue;
        let sink = AudioSink::new(queue, &self.config.compactor);
        while queue.is_empty() && !queue.is_finished() {
            if !backend.decode_audio_unit(&sink)? {
                queue.finish();
            }
        }
        Ok(())
    }

    /// Pop one sample and hand it to the callback, or report EOS / error.
    fn complete_request<T, D, E>(
        &self,
        stream: &StreamState<T>,
        result: Result<()>,
        delivered: &AtomicU64,
        deliver: D,
        eos: E,
    ) where
        T: MediaSample,
        D: FnOnce(&dyn DecodeCallback, Decoded<T>),
        E: FnOnce(&dyn DecodeCallback),
    {
        stream.outstanding.store(false, Ordering::Release);
        let callback = self.callback();

        if let Err(e) = result {
            let e = Self::backend_error(e);
            error!(stream = %stream.kind, error = %e, "Decode failed");
            stream.set_phase(StreamPhase::Errored);
            StatsCounters::bump(&self.stats.decode_errors);
            if let Some(callback) = callback {
                callback.on_decode_error(stream.kind, e);
            }
            return;
        }

        match stream.queue.pop_front() {
            Some(sample) => {
                let discontinuity = stream.discontinuity.swap(false, Ordering::AcqRel);
                trace!(
                    stream = %stream.kind,
                    time = sample.time(),
                    discontinuity,
                    "Delivering sample"
                );
                stream.set_phase(StreamPhase::Delivering);
                StatsCounters::bump(delivered);
                match callback {
                    Some(callback) => deliver(&*callback, Decoded::new(sample, discontinuity)),
                    None => trace!(stream = %stream.kind, "No callback installed, sample dropped"),
                }
            }
            None if stream.queue.is_finished() => {
                debug!(stream = %stream.kind, "End of stream");
                stream.set_phase(StreamPhase::Eos);
                StatsCounters::bump(&self.stats.eos_notifications);
                if let Some(callback) = callback {
                    eos(&*callback);
                }
            }
            None => {
                debug!(stream = %stream.kind, "Queue reset during request");
                stream.set_phase(StreamPhase::Idle);
            }
        }
    }

    fn backend_error(e: PipelineError) -> PipelineError {
        if e.is_backend_failure() || e.is_cancellation() {
            e
        } else {
            PipelineError::BackendRejected(e.to_string())
        }
    }

    fn dispatch_or_clear<T, F>(&self, stream: &StreamState<T>, task: F) -> Result<()>
    where
        T: MediaSample,
        F: FnOnce() + Send + 'static,
    {
        self.task_queue.dispatch(Box::new(task)).map_err(|e| {
            stream.outstanding.store(false, Ordering::Release);
            warn!(stream = %stream.kind, error = %e, "Task queue refused request");
            e
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PipelineError::ShuttingDown);
        }
        Ok(())
    }

    fn reject_if_shut_down(&self, kind: MediaKind) -> bool {
        if !self.shut_down.load(Ordering::Acquire) {
            return false;
        }
        debug!(stream = %kind, "Request after shutdown");
        if let Some(callback) = self.callback() {
            callback.on_decode_error(kind, PipelineError::ShuttingDown);
        }
        true
    }

    // ========================================================================
    // Reset, Seek and Trimming
    // ========================================================================

    /// Drop everything queued and pending, and tag the next sample of each
    /// stream as a discontinuity.
    pub fn reset_decode(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.task_queue.flush();
        self.audio.reset();
        self.video.reset();
        self.skip_streak.store(0, Ordering::Relaxed);
        StatsCounters::bump(&self.stats.resets);
        debug!("Decode reset");
    }

    /// Make every continuation posted so far a no-op.
    pub fn cancel_pending_requests(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.audio.outstanding.store(false, Ordering::Release);
        self.video.outstanding.store(false, Ordering::Release);
        debug!(generation, "Pending requests cancelled");
    }

    /// Coarse backend seek.
    pub fn seek(&self, target: Usecs, start: Usecs, end: Usecs, current: Usecs) -> Result<()> {
        self.backend
            .lock()
            .seek(target, start, end, current)
            .map_err(|e| match e {
                PipelineError::SeekFailed(_) => e,
                other => PipelineError::SeekFailed(other.to_string()),
            })
    }

    /// Discard audio samples that end at or before `target`, and retime the
    /// video frame straddling `target` so it starts there.
    ///
    /// When video runs out before reaching `target`, the last frame is put
    /// back so there is still something to show.
    pub fn decode_to_target(&self, target: Usecs) -> Result<()> {
        let info = self.stream_info();
        let mut backend = self.backend.lock();

        if info.as_ref().map_or(true, |i| i.has_audio()) {
            self.skip_audio_to(backend.as_mut(), target)?;
        }
        if info.as_ref().map_or(true, |i| i.has_video()) {
            self.skip_video_to(backend.as_mut(), target)?;
        }
        Ok(())
    }

    fn skip_audio_to(&self, backend: &mut dyn DecodeBackend, target: Usecs) -> Result<()> {
        let queue = &self.audio.queue;
        let sink = AudioSink::new(queue, &self.config.compactor);
        let mut dropped = 0usize;

        loop {
            match queue.peek_front() {
                Some(sample) if sample.end_time() <= target => {
                    queue.pop_front();
                    dropped += 1;
                }
                Some(_) => break,
                None if queue.is_finished() => break,
                None => {
                    if !backend.decode_audio_unit(&sink)? {
                        queue.finish();
                    }
                }
            }
        }

        trace!(seek_target = target, dropped, "Audio skipped to target");
        Ok(())
    }

    fn skip_video_to(&self, backend: &mut dyn DecodeBackend, target: Usecs) -> Result<()> {
        let queue = &self.video.queue;
        let mut last: Option<Arc<VideoSample>> = None;
        let mut skip = false;

        loop {
            match queue.peek_front() {
                Some(frame) if frame.end_time() <= target => {
                    last = queue.pop_front();
                }
                Some(frame) if frame.time() < target => {
                    queue.pop_front();
                    let retimed = frame.retimed(target, frame.end_time() - target);
                    queue.push_front(Arc::new(retimed));
                    break;
                }
                Some(_) => break,
                None if queue.is_finished() => {
                    if let Some(frame) = last.take() {
                        queue.push_front(frame);
                    }
                    break;
                }
                None => {
                    if !backend.decode_video_unit(queue, &mut skip, target)? {
                        queue.finish();
                    }
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop the orchestrator. Outstanding requests are answered with
    /// [`PipelineError::ShuttingDown`]; later requests fail the same way.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.task_queue.flush();

        let audio_pending = self.audio.outstanding.swap(false, Ordering::AcqRel);
        let video_pending = self.video.outstanding.swap(false, Ordering::AcqRel);
        self.audio.reset();
        self.video.reset();

        if let Some(callback) = self.callback() {
            if audio_pending {
                callback.on_decode_error(MediaKind::Audio, PipelineError::ShuttingDown);
            }
            if video_pending {
                callback.on_decode_error(MediaKind::Video, PipelineError::ShuttingDown);
            }
        }
        info!(audio_pending, video_pending, "Decode orchestrator shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn audio_queue(&self) -> &SampleQueue<AudioSample> {
        &self.audio.queue
    }

    pub fn video_queue(&self) -> &SampleQueue<VideoSample> {
        &self.video.queue
    }

    pub fn audio_phase(&self) -> StreamPhase {
        self.audio.phase()
    }

    pub fn video_phase(&self) -> StreamPhase {
        self.video.phase()
    }

    /// Bytes held by both queues.
    pub fn queued_memory(&self) -> usize {
        self.audio.queue.size_in_bytes() + self.video.queue.size_in_bytes()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats.snapshot()
    }

    pub fn task_queue(&self) -> &Arc<dyn TaskQueue> {
        &self.task_queue
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
