//! # Offline Audio Decode
//!
//! Decodes a whole audio stream to a single interleaved buffer on the
//! calling thread, using a [`Rendezvous`] to turn the orchestrator's
//! asynchronous requests into sequential code.
//!
//! The job must run on its own thread. Calling [`OfflineAudioDecoder::decode`]
//! from the orchestrator's task queue would wait on itself.

use crate::callback::DecodeCallback;
use crate::error::{PipelineError, Result};
use crate::orchestrator::DecodeOrchestrator;
use crate::rendezvous::Rendezvous;
use crate::sample::MediaSample;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, trace, warn};

/// A fully decoded audio stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u32,
    /// Frames per channel
    pub frames: u64,
    /// Interleaved PCM
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }
}

/// Decode job for consumers that want the whole stream at once.
pub struct OfflineAudioDecoder {
    orchestrator: Arc<DecodeOrchestrator>,
    rendezvous: Arc<Rendezvous>,
    cancel_token: CancellationToken,
}

impl OfflineAudioDecoder {
    pub fn new(orchestrator: Arc<DecodeOrchestrator>) -> Self {
        Self {
            orchestrator,
            rendezvous: Arc::new(Rendezvous::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Stop a running `decode`, which then fails with
    /// [`PipelineError::Aborted`]. Safe from any thread.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
        self.rendezvous.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Decode every remaining audio sample.
    #[instrument(skip(self))]
    pub fn decode(&self) -> Result<DecodedAudio> {
        let (info, _tags) = self.orchestrator.read_metadata()?;
        let audio = info.audio.ok_or_else(|| {
            PipelineError::BackendRejected("Resource has no audio track".to_string())
        })?;

        let callback: Arc<dyn DecodeCallback> = self.rendezvous.clone();
        let previous = self.orchestrator.replace_callback(Some(callback.clone()));

        let mut output = DecodedAudio {
            sample_rate: audio.rate,
            channels: audio.channels,
            ..Default::default()
        };
        let result = self.decode_into(&mut output);

        self.orchestrator.restore_callback(&callback, previous);
        if let Err(e) = result {
            if e.is_cancellation() {
                self.orchestrator.cancel_pending_requests();
            }
            warn!(error = %e, "Offline decode stopped");
            return Err(e);
        }

        info!(
            frames = output.frames,
            sample_rate = output.sample_rate,
            channels = output.channels,
            "Offline decode complete"
        );
        Ok(output)
    }

    fn decode_into(&self, output: &mut DecodedAudio) -> Result<()> {
        loop {
            self.rendezvous.reset();
            if self.is_cancelled() {
                return Err(PipelineError::Aborted);
            }

            self.orchestrator.post_audio_request()?;
            let decoded = match self.rendezvous.wait()? {
                Some(decoded) => decoded,
                None => return Ok(()),
            };

            let sample = decoded.sample;
            if sample.channels() != output.channels || sample.rate() != output.sample_rate {
                return Err(PipelineError::Internal(format!(
                    "Audio layout changed mid-stream: {} Hz, {} channels",
                    sample.rate(),
                    sample.channels()
                )));
            }

            trace!(time = sample.time(), frames = sample.frames(), "Appending sample");
            output.samples.extend_from_slice(sample.data());
            output.frames += sample.frames() as u64;
        }
    }
}
