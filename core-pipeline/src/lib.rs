//! # Media Decode Pipeline
//!
//! Scheduling, queueing and sequencing layer between codec-specific decode
//! backends and the consumers of decoded media.
//!
//! ## Overview
//!
//! - [`queue::SampleQueue`]: thread-safe, time-ordered queue of decoded samples
//! - [`compactor::PacketCompactor`]: reshapes irregular audio output into
//!   allocation-friendly chunks
//! - [`orchestrator::DecodeOrchestrator`]: drives a [`backend::DecodeBackend`]
//!   and reports results through a [`callback::DecodeCallback`]
//! - [`seek::SeekTask`]: sample-accurate seeking on top of the orchestrator
//! - [`rendezvous::Rendezvous`]: blocking adapter for consumers on their own
//!   thread, used by [`offline::OfflineAudioDecoder`]
//! - [`scheduler`]: the cooperative task queues decode work runs on
//!
//! ## Usage
//!
//! ```rust,no_run
//! use core_pipeline::{ChannelCallback, DecodeBackend, DecodeOrchestrator, PipelineConfig};
//!
//! fn start(backend: Box<dyn DecodeBackend>) -> core_pipeline::Result<()> {
//!     let (orchestrator, _worker) =
//!         DecodeOrchestrator::with_serial_queue(backend, PipelineConfig::default())?;
//!     let (callback, mut events) = ChannelCallback::new();
//!     orchestrator.set_callback(Some(callback));
//!
//!     orchestrator.read_metadata()?;
//!     orchestrator.post_audio_request()?;
//!     let _first = events.blocking_recv();
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod callback;
pub mod compactor;
pub mod config;
pub mod error;
pub mod offline;
pub mod orchestrator;
pub mod queue;
pub mod rendezvous;
pub mod sample;
pub mod scheduler;
pub mod seek;
pub mod stats;

pub use backend::{
    AudioInfo, AudioSink, BufferedRangeEstimator, ByteRange, DecodeBackend, MetadataTags,
    StreamInfo, TimeRange, VideoInfo,
};
pub use callback::{ChannelCallback, DecodeCallback, DecodeEvent};
pub use compactor::PacketCompactor;
pub use config::{CompactorConfig, PipelineConfig, StreamPhase};
pub use error::{PipelineError, Result};
pub use offline::{DecodedAudio, OfflineAudioDecoder};
pub use orchestrator::DecodeOrchestrator;
pub use queue::SampleQueue;
pub use rendezvous::Rendezvous;
pub use sample::{
    AudioSample, Decoded, DecodedImage, DisplaySize, ImageHandle, MediaKind, MediaSample, Usecs,
    VideoSample,
};
pub use scheduler::{ManualTaskQueue, SerialTaskQueue, Task, TaskQueue};
pub use seek::{SeekHandle, SeekJob, SeekKind, SeekOutcome, SeekTask};
pub use stats::DecodeStats;
