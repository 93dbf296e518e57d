//! # Decode Callbacks
//!
//! The asynchronous result surface of the orchestrator. Every request ends
//! in exactly one callback: a decoded sample, end of stream, or an error.
//!
//! [`ChannelCallback`] turns the surface into [`DecodeEvent`] messages for
//! consumers that prefer to `await` on a channel.

use crate::error::PipelineError;
use crate::sample::{AudioSample, Decoded, MediaKind, VideoSample};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Receiver of decode results.
///
/// Callbacks run on the decode task queue and must not block on it.
pub trait DecodeCallback: Send + Sync {
    fn on_audio_decoded(&self, sample: Decoded<AudioSample>);

    fn on_video_decoded(&self, sample: Decoded<VideoSample>);

    fn on_audio_eos(&self);

    fn on_video_eos(&self);

    /// A request for `kind` failed. No further decoding of that stream
    /// happens until the next reset.
    fn on_decode_error(&self, kind: MediaKind, error: PipelineError);
}

/// Decode result as a message.
#[derive(Debug, Clone)]
pub enum DecodeEvent {
    AudioDecoded(Decoded<AudioSample>),
    VideoDecoded(Decoded<VideoSample>),
    AudioEos,
    VideoEos,
    DecodeError {
        kind: MediaKind,
        error: PipelineError,
    },
}

impl DecodeEvent {
    /// Stream the event belongs to.
    pub fn kind(&self) -> MediaKind {
        match self {
            DecodeEvent::AudioDecoded(_) | DecodeEvent::AudioEos => MediaKind::Audio,
            DecodeEvent::VideoDecoded(_) | DecodeEvent::VideoEos => MediaKind::Video,
            DecodeEvent::DecodeError { kind, .. } => *kind,
        }
    }

    pub fn is_eos(&self) -> bool {
        matches!(self, DecodeEvent::AudioEos | DecodeEvent::VideoEos)
    }
}

/// Callback that forwards every result over an unbounded channel.
pub struct ChannelCallback {
    tx: mpsc::UnboundedSender<DecodeEvent>,
}

impl ChannelCallback {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<DecodeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn send(&self, event: DecodeEvent) {
        if self.tx.send(event).is_err() {
            trace!("Decode event receiver dropped");
        }
    }
}

impl DecodeCallback for ChannelCallback {
    fn on_audio_decoded(&self, sample: Decoded<AudioSample>) {
        self.send(DecodeEvent::AudioDecoded(sample));
    }

    fn on_video_decoded(&self, sample: Decoded<VideoSample>) {
        self.send(DecodeEvent::VideoDecoded(sample));
    }

    fn on_audio_eos(&self) {
        self.send(DecodeEvent::AudioEos);
    }

    fn on_video_eos(&self) {
        self.send(DecodeEvent::VideoEos);
    }

    fn on_decode_error(&self, kind: MediaKind, error: PipelineError) {
        self.send(DecodeEvent::DecodeError { kind, error });
    }
}
