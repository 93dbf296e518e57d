//! # Synchronous Rendezvous
//!
//! Single-slot blocking handoff between the orchestrator's audio callbacks
//! and a consumer thread. Install it as the callback, post a request, then
//! [`Rendezvous::wait`] for the outcome. [`Rendezvous::reset`] rearms the
//! slot for the next request.
//!
//! Video callbacks are ignored.

use crate::callback::DecodeCallback;
use crate::error::{PipelineError, Result};
use crate::sample::{AudioSample, Decoded, MediaKind, VideoSample};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

enum Slot {
    Empty,
    Decoded(Decoded<AudioSample>),
    Eos,
    Failed(PipelineError),
    Cancelled,
    /// The outcome was handed to a waiter.
    Taken,
}

/// Monitor-based single-slot rendezvous.
pub struct Rendezvous {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            ready: Condvar::new(),
        }
    }

    /// Block until a sample, end of stream, an error or a cancellation is
    /// observed.
    ///
    /// Returns `Ok(Some(_))` for a sample, `Ok(None)` at end of stream, and
    /// [`PipelineError::Aborted`] after [`Rendezvous::cancel`]. Waiting again
    /// without a `reset` or a new outcome is a programming error.
    pub fn wait(&self) -> Result<Option<Decoded<AudioSample>>> {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Taken) {
            debug_assert!(false, "Rendezvous awaited twice without a reset");
            return Err(PipelineError::Internal(
                "Rendezvous awaited twice without a reset".to_string(),
            ));
        }

        while matches!(*slot, Slot::Empty) {
            self.ready.wait(&mut slot);
        }

        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Decoded(sample) => Ok(Some(sample)),
            Slot::Eos => Ok(None),
            Slot::Failed(e) => Err(e),
            Slot::Cancelled => Err(PipelineError::Aborted),
            Slot::Empty | Slot::Taken => Err(PipelineError::Internal(
                "Rendezvous woke without an outcome".to_string(),
            )),
        }
    }

    /// Rearm for the next request.
    pub fn reset(&self) {
        *self.slot.lock() = Slot::Empty;
    }

    /// Wake the waiter with [`PipelineError::Aborted`]. Outcomes arriving
    /// afterwards are ignored until the next `reset`.
    pub fn cancel(&self) {
        debug!("Rendezvous cancelled");
        self.store(Slot::Cancelled);
    }

    fn store(&self, outcome: Slot) {
        let mut slot = self.slot.lock();
        if matches!(*slot, Slot::Cancelled) {
            trace!("Outcome after cancellation dropped");
            return;
        }
        *slot = outcome;
        self.ready.notify_one();
    }
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeCallback for Rendezvous {
    fn on_audio_decoded(&self, sample: Decoded<AudioSample>) {
        self.store(Slot::Decoded(sample));
    }

    fn on_video_decoded(&self, _sample: Decoded<VideoSample>) {}

    fn on_audio_eos(&self) {
        self.store(Slot::Eos);
    }

    fn on_video_eos(&self) {}

    fn on_decode_error(&self, kind: MediaKind, error: PipelineError) {
        if kind == MediaKind::Audio {
            self.store(Slot::Failed(error));
        }
    }
}
