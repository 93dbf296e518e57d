//! # Seek Task
//!
//! One-shot state machine that seeks the orchestrator and resolves with the
//! first audio sample and video frame at the target.
//!
//! ## Protocol
//!
//! 1. Reset the orchestrator and issue the coarse backend seek.
//! 2. Request audio and video independently. For an accurate seek, samples
//!    ending at or before the target are dropped and the next one is
//!    requested; the sample straddling the target is trimmed (audio) or
//!    retimed (video) so it starts exactly at the target.
//! 3. Resolve once every stream present in the resource is done.
//!
//! If video hits end of stream before reaching the target, the last frame
//! decoded on the way is used instead. End of stream is never an error.
//!
//! While running, the task is installed as the orchestrator's callback. The
//! previous callback is put back when the task resolves. A task that is
//! discarded or rejected first cancels whatever requests it still has
//! pending, so none of its traffic reaches the restored callback.

use crate::backend::StreamInfo;
use crate::callback::DecodeCallback;
use crate::error::{PipelineError, Result};
use crate::orchestrator::DecodeOrchestrator;
use crate::sample::{AudioSample, Decoded, MediaKind, MediaSample, Usecs, VideoSample};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

/// How precisely to land on the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeekKind {
    /// Trim decoded output so playback resumes exactly at the target.
    #[default]
    Accurate,
    /// Resume at the sync point the backend seeked to, untrimmed.
    PrevSyncPoint,
}

/// Parameters of one seek.
#[derive(Debug, Clone)]
pub struct SeekJob {
    pub target: Usecs,
    /// Start of the seekable range
    pub start: Usecs,
    /// End of the seekable range
    pub end: Usecs,
    /// Playback position before the seek
    pub current: Usecs,
    pub info: StreamInfo,
    pub kind: SeekKind,
}

impl SeekJob {
    pub fn new(target: Usecs, start: Usecs, end: Usecs, current: Usecs, info: StreamInfo) -> Self {
        Self {
            target,
            start,
            end,
            current,
            info,
            kind: SeekKind::Accurate,
        }
    }

    pub fn with_kind(mut self, kind: SeekKind) -> Self {
        self.kind = kind;
        self
    }

    /// Target clamped into `[start, end]`.
    pub fn clamped_target(&self) -> Usecs {
        if self.end < self.start {
            return self.start;
        }
        self.target.clamp(self.start, self.end)
    }
}

/// What a resolved seek produced.
///
/// A stream absent from the resource has neither a sample nor an EOS flag.
#[derive(Debug, Clone, Default)]
pub struct SeekOutcome {
    pub audio: Option<Decoded<AudioSample>>,
    pub video: Option<Decoded<VideoSample>>,
    pub audio_eos: bool,
    pub video_eos: bool,
}

/// Receiving end of a seek result.
pub struct SeekHandle {
    rx: oneshot::Receiver<Result<SeekOutcome>>,
}

impl SeekHandle {
    /// Wait for the seek to resolve.
    pub async fn resolved(self) -> Result<SeekOutcome> {
        self.rx.await.unwrap_or(Err(PipelineError::Aborted))
    }

    /// Block the current thread until the seek resolves.
    ///
    /// Must not be called from within an async runtime.
    pub fn blocking_wait(self) -> Result<SeekOutcome> {
        self.rx.blocking_recv().unwrap_or(Err(PipelineError::Aborted))
    }

    /// The result, if the seek has already resolved.
    pub fn try_result(&mut self) -> Option<Result<SeekOutcome>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PipelineError::Aborted)),
        }
    }
}

#[derive(Default)]
struct SeekState {
    started: bool,
    finished: bool,
    audio_done: bool,
    video_done: bool,
    outcome: SeekOutcome,
    /// Most recent frame that ended before the target.
    last_frame_before_target: Option<Decoded<VideoSample>>,
    previous_callback: Option<Arc<dyn DecodeCallback>>,
    responder: Option<oneshot::Sender<Result<SeekOutcome>>>,
}

/// A seek in progress.
pub struct SeekTask {
    orchestrator: Arc<DecodeOrchestrator>,
    job: SeekJob,
    target: Usecs,
    state: Mutex<SeekState>,
    me: Weak<SeekTask>,
}

impl SeekTask {
    /// Install the task as the orchestrator's callback and schedule the seek
    /// on its task queue.
    pub fn start(
        orchestrator: Arc<DecodeOrchestrator>,
        job: SeekJob,
    ) -> Result<(Arc<SeekTask>, SeekHandle)> {
        let (tx, rx) = oneshot::channel();
        let target = job.clamped_target();
        if target != job.target {
            debug!(requested = job.target, seek_target = target, "Seek target clamped");
        }

        let task = Arc::new_cyclic(|me| SeekTask {
            orchestrator: Arc::clone(&orchestrator),
            job,
            target,
            state: Mutex::new(SeekState {
                responder: Some(tx),
                ..Default::default()
            }),
            me: me.clone(),
        });

        let callback: Arc<dyn DecodeCallback> = task.clone();
        let previous = orchestrator.replace_callback(Some(callback));
        task.state.lock().previous_callback = previous;

        let runner = Arc::clone(&task);
        if let Err(e) = orchestrator.task_queue().dispatch(Box::new(move || runner.run())) {
            task.resolve(Err(e));
        }

        Ok((task, SeekHandle { rx }))
    }

    /// The target the task is seeking to, after clamping.
    pub fn target(&self) -> Usecs {
        self.target
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Cancel the seek. The result resolves as [`PipelineError::Aborted`]
    /// unless it already resolved. Safe from any thread; idempotent.
    pub fn discard(&self) {
        if self.is_finished() {
            return;
        }
        self.resolve(Err(PipelineError::Aborted));
    }

    #[instrument(skip(self), fields(seek_target = self.target, kind = ?self.job.kind))]
    fn run(&self) {
        {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.started = true;
        }
        info!("Seek started");

        self.orchestrator.reset_decode();
        if self.is_finished() {
            debug!("Seek discarded before backend seek");
            return;
        }
        if let Err(e) = self.orchestrator.seek(
            self.target,
            self.job.start,
            self.job.end,
            self.job.current,
        ) {
            self.resolve(Err(e));
            return;
        }
        if self.is_finished() {
            debug!("Seek discarded during backend seek");
            return;
        }

        let has_audio = self.job.info.has_audio();
        let has_video = self.job.info.has_video();
        {
            let mut state = self.state.lock();
            state.audio_done = !has_audio;
            state.video_done = !has_video;
        }

        if has_audio {
            self.request(MediaKind::Audio);
        }
        if has_video {
            self.request(MediaKind::Video);
        }
        self.resolve_if_done();
    }

    /// Post a request for `kind` unless the task has already resolved.
    ///
    /// The state lock is held across the post so a concurrent `resolve`
    /// either sees the request and cancels it, or the request is never made.
    fn request(&self, kind: MediaKind) {
        let posted = {
            let state = self.state.lock();
            if state.finished {
                return;
            }
            match kind {
                MediaKind::Audio => self.orchestrator.post_audio_request(),
                MediaKind::Video => self.orchestrator.post_video_request(false, 0),
            }
        };
        if let Err(e) = posted {
            self.resolve(Err(e));
        }
    }

    fn resolve_if_done(&self) {
        let outcome = {
            let state = self.state.lock();
            if !(state.started && state.audio_done && state.video_done) {
                return;
            }
            state.outcome.clone()
        };
        self.resolve(Ok(outcome));
    }

    fn resolve(&self, result: Result<SeekOutcome>) {
        let (responder, previous) = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            (state.responder.take(), state.previous_callback.take())
        };

        // The other stream may still have a request in flight.
        if result.is_err() {
            self.orchestrator.cancel_pending_requests();
        }

        if let Some(me) = self.me.upgrade() {
            let me: Arc<dyn DecodeCallback> = me;
            self.orchestrator.restore_callback(&me, previous);
        }

        match &result {
            Ok(_) => info!(seek_target = self.target, "Seek resolved"),
            Err(e) => warn!(seek_target = self.target, error = %e, "Seek rejected"),
        }

        if let Some(responder) = responder {
            if responder.send(result).is_err() {
                debug!("Seek result receiver dropped");
            }
        }
    }

    fn accept_audio(&self, decoded: Decoded<AudioSample>) -> Result<Option<Decoded<AudioSample>>> {
        let sample = &decoded.sample;
        if self.job.kind == SeekKind::PrevSyncPoint || sample.time() >= self.target {
            return Ok(Some(Decoded::new(Arc::clone(sample), true)));
        }
        if sample.end_time() <= self.target {
            return Ok(None);
        }
        let trimmed = sample.trimmed_to(self.target)?;
        Ok(Some(Decoded::new(Arc::new(trimmed), true)))
    }
}

impl DecodeCallback for SeekTask {
    fn on_audio_decoded(&self, decoded: Decoded<AudioSample>) {
        {
            let state = self.state.lock();
            if state.finished || state.audio_done {
                return;
            }
        }

        match self.accept_audio(decoded) {
            Ok(Some(sample)) => {
                debug!(time = sample.sample.time(), "Seek audio reached target");
                let mut state = self.state.lock();
                state.outcome.audio = Some(sample);
                state.audio_done = true;
            }
            Ok(None) => {
                self.request(MediaKind::Audio);
                return;
            }
            Err(e) => {
                self.resolve(Err(e));
                return;
            }
        }
        self.resolve_if_done();
    }

    fn on_video_decoded(&self, decoded: Decoded<VideoSample>) {
        let frame = Arc::clone(&decoded.sample);
        {
            let mut state = self.state.lock();
            if state.finished || state.video_done {
                return;
            }

            if self.job.kind == SeekKind::Accurate && frame.end_time() <= self.target {
                state.last_frame_before_target = Some(Decoded::new(frame, true));
                drop(state);
                self.request(MediaKind::Video);
                return;
            }

            let kept = if self.job.kind == SeekKind::Accurate && frame.time() < self.target {
                Arc::new(frame.retimed(self.target, frame.end_time() - self.target))
            } else {
                frame
            };
            debug!(time = kept.time(), "Seek video reached target");
            state.outcome.video = Some(Decoded::new(kept, true));
            state.video_done = true;
        }
        self.resolve_if_done();
    }

    fn on_audio_eos(&self) {
        {
            let mut state = self.state.lock();
            if state.finished || state.audio_done {
                return;
            }
            state.outcome.audio_eos = true;
            state.audio_done = true;
        }
        self.resolve_if_done();
    }

    fn on_video_eos(&self) {
        {
            let mut state = self.state.lock();
            if state.finished || state.video_done {
                return;
            }
            state.outcome.video = state.last_frame_before_target.take();
            state.outcome.video_eos = true;
            state.video_done = true;
        }
        self.resolve_if_done();
    }

    fn on_decode_error(&self, kind: MediaKind, error: PipelineError) {
        warn!(stream = %kind, error = %error, "Decode error during seek");
        self.resolve(Err(error));
    }
}
