//! Decode statistics and monitoring

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing decode activity since the orchestrator was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeStats {
    /// Audio samples handed to the callback
    pub audio_samples_delivered: u64,

    /// Video frames handed to the callback
    pub video_frames_delivered: u64,

    /// Keyframe-skip continuations re-posted to the task queue
    pub keyframe_skip_reposts: u64,

    /// End-of-stream notifications sent (both streams)
    pub eos_notifications: u64,

    /// Backend failures surfaced through `on_decode_error`
    pub decode_errors: u64,

    /// Number of `reset_decode` calls
    pub resets: u64,
}

impl DecodeStats {
    /// Total samples delivered across both streams.
    pub fn total_delivered(&self) -> u64 {
        self.audio_samples_delivered + self.video_frames_delivered
    }

    /// Average keyframe-skip re-posts per delivered video frame.
    pub fn skip_ratio(&self) -> f64 {
        if self.video_frames_delivered == 0 {
            return 0.0;
        }

        self.keyframe_skip_reposts as f64 / self.video_frames_delivered as f64
    }
}

/// Lock-free counters updated from the decode worker.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub audio_samples_delivered: AtomicU64,
    pub video_frames_delivered: AtomicU64,
    pub keyframe_skip_reposts: AtomicU64,
    pub eos_notifications: AtomicU64,
    pub decode_errors: AtomicU64,
    pub resets: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DecodeStats {
        DecodeStats {
            audio_samples_delivered: self.audio_samples_delivered.load(Ordering::Relaxed),
            video_frames_delivered: self.video_frames_delivered.load(Ordering::Relaxed),
            keyframe_skip_reposts: self.keyframe_skip_reposts.load(Ordering::Relaxed),
            eos_notifications: self.eos_notifications.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }
}
