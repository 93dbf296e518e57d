//! # Packet Compactor
//!
//! Write-side adapter in front of the audio [`SampleQueue`]. Backends that
//! produce audio in awkward frame counts hand their output to
//! [`PacketCompactor::push`], which pulls converted frames through a
//! caller-supplied producer into buffers sized to what the allocator will
//! hand out anyway, and pushes one [`AudioSample`] per buffer.
//!
//! Timestamps are accumulated from the initial start time by frame count,
//! so splitting a packet never introduces rounding drift.

use crate::config::CompactorConfig;
use crate::error::{PipelineError, Result};
use crate::queue::SampleQueue;
use crate::sample::{frames_to_usecs, AudioSample, Usecs};
use std::sync::Arc;
use tracing::{debug, trace};

const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();
const PAGE_SIZE: usize = 4096;
const MIN_ALLOC_SIZE: usize = 16;

/// Size class an allocator would round a request of `size` bytes up to:
/// powers of two up to a page, whole pages above that.
pub fn good_alloc_size(size: usize) -> usize {
    if size <= MIN_ALLOC_SIZE {
        MIN_ALLOC_SIZE
    } else if size <= PAGE_SIZE {
        size.next_power_of_two()
    } else {
        size.div_ceil(PAGE_SIZE) * PAGE_SIZE
    }
}

/// Coalesces irregular decoder output into well-sized audio samples.
pub struct PacketCompactor<'a> {
    queue: &'a SampleQueue<AudioSample>,
    config: CompactorConfig,
}

impl<'a> PacketCompactor<'a> {
    pub fn new(queue: &'a SampleQueue<AudioSample>, config: &CompactorConfig) -> Self {
        Self {
            queue,
            config: config.clone(),
        }
    }

    /// Pull `frames` frames of `channels`-channel audio out of `producer` and
    /// push them to the queue as one or more samples.
    ///
    /// `producer` receives an interleaved buffer with room for up to
    /// `buffer.len() / channels` frames and returns how many frames it wrote.
    /// Returning zero ends the packet early.
    ///
    /// Returns the number of samples pushed.
    pub fn push<F>(
        &self,
        offset: i64,
        time: Usecs,
        rate: u32,
        frames: u32,
        channels: u32,
        mut producer: F,
    ) -> Result<usize>
    where
        F: FnMut(&mut [f32]) -> u32,
    {
        if rate == 0 || channels == 0 {
            return Err(PipelineError::Internal(format!(
                "Invalid audio layout: {} Hz, {} channels",
                rate, channels
            )));
        }

        let max_slop = frames as usize * channels as usize * BYTES_PER_SAMPLE
            / self.config.max_slop_divisor;
        let mut remaining = frames;
        let mut emitted: u64 = 0;
        let mut pushed = 0;

        while remaining > 0 {
            let chunk = self.chunk_frames(remaining, channels, max_slop);
            let mut buffer = vec![0.0f32; chunk as usize * channels as usize];

            let copied = producer(&mut buffer);
            if copied == 0 {
                debug!(remaining, "Frame producer ran dry before packet end");
                break;
            }
            if copied > chunk {
                return Err(PipelineError::Internal(format!(
                    "Frame producer wrote {} frames into a {} frame buffer",
                    copied, chunk
                )));
            }
            buffer.truncate(copied as usize * channels as usize);

            let start = Self::offset_usecs(time, emitted, rate)?;
            emitted += copied as u64;
            let end = Self::offset_usecs(time, emitted, rate)?;

            trace!(start, frames = copied, "Compacted audio chunk");
            self.queue.push(Arc::new(AudioSample::new(
                offset,
                start,
                end - start,
                copied,
                channels,
                rate,
                buffer.into(),
            )));

            remaining -= copied;
            pushed += 1;
        }

        Ok(pushed)
    }

    /// Frames to place in the next chunk so that allocator slop stays under
    /// `max_slop` bytes, without shrinking below the configured floor.
    fn chunk_frames(&self, frames: u32, channels: u32, max_slop: usize) -> u32 {
        let bytes_per_frame = channels as usize * BYTES_PER_SAMPLE;
        let size = frames as usize * bytes_per_frame;
        let mut chunk = good_alloc_size(size);

        while chunk.saturating_sub(size) > max_slop && chunk > self.config.min_chunk_bytes {
            let smaller = good_alloc_size(chunk / 2);
            if smaller >= chunk {
                break;
            }
            chunk = smaller;
        }

        let chunk_frames = (chunk / bytes_per_frame).min(u32::MAX as usize) as u32;
        chunk_frames.clamp(1, frames)
    }

    fn offset_usecs(time: Usecs, frames: u64, rate: u32) -> Result<Usecs> {
        frames_to_usecs(frames, rate)
            .and_then(|d| time.checked_add(d))
            .ok_or_else(|| PipelineError::Internal("Audio timestamp overflow".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::MediaSample;

    fn ramp_producer(total: u32, channels: u32) -> impl FnMut(&mut [f32]) -> u32 {
        let mut next = 0u32;
        move |buffer: &mut [f32]| {
            let room = buffer.len() as u32 / channels;
            let n = room.min(total - next);
            for frame in 0..n {
                for ch in 0..channels {
                    buffer[(frame * channels + ch) as usize] = (next + frame) as f32;
                }
            }
            next += n;
            n
        }
    }

    #[test]
    fn test_good_alloc_size() {
        assert_eq!(good_alloc_size(1), 16);
        assert_eq!(good_alloc_size(100), 128);
        assert_eq!(good_alloc_size(4096), 4096);
        assert_eq!(good_alloc_size(4097), 8192);
        assert_eq!(good_alloc_size(8800), 12288);
    }

    #[test]
    fn test_exact_fit_single_chunk() {
        let queue = SampleQueue::new();
        let compactor = PacketCompactor::new(&queue, &CompactorConfig::default());

        // 512 stereo frames = 4096 bytes, no slop.
        let pushed = compactor
            .push(7, 1_000, 48_000, 512, 2, ramp_producer(512, 2))
            .unwrap();

        assert_eq!(pushed, 1);
        let sample = queue.pop_front().unwrap();
        assert_eq!(sample.frames(), 512);
        assert_eq!(sample.time(), 1_000);
        assert_eq!(sample.offset(), 7);
    }

    #[test]
    fn test_awkward_size_is_split_and_conserves_frames() {
        let queue = SampleQueue::new();
        let compactor = PacketCompactor::new(&queue, &CompactorConfig::default());

        // 1100 stereo frames = 8800 bytes would waste 3488 bytes in one block.
        let pushed = compactor
            .push(0, 0, 44_100, 1_100, 2, ramp_producer(1_100, 2))
            .unwrap();
        assert!(pushed > 1);

        let samples = queue.snapshot();
        let total: u32 = samples.iter().map(|s| s.frames()).sum();
        assert_eq!(total, 1_100);

        // Contiguous timestamps and contiguous PCM.
        for pair in samples.windows(2) {
            assert_eq!(pair[0].end_time(), pair[1].time());
        }
        assert_eq!(samples.last().unwrap().end_time(), frames_to_usecs(1_100, 44_100).unwrap());
        let first_of_second = samples[1].data()[0];
        assert_eq!(first_of_second, samples[0].frames() as f32);
    }

    #[test]
    fn test_producer_short_read_is_repulled() {
        let queue = SampleQueue::new();
        let compactor = PacketCompactor::new(&queue, &CompactorConfig::default());

        // Producer never yields more than 100 frames per call.
        let mut inner = ramp_producer(300, 1);
        let pushed = compactor
            .push(0, 0, 1_000, 300, 1, move |buffer: &mut [f32]| {
                let limit = buffer.len().min(100);
                inner(&mut buffer[..limit])
            })
            .unwrap();

        assert_eq!(pushed, 3);
        let times: Vec<_> = queue.snapshot().iter().map(|s| s.time()).collect();
        assert_eq!(times, vec![0, 100_000, 200_000]);
    }

    #[test]
    fn test_producer_running_dry_stops() {
        let queue = SampleQueue::new();
        let compactor = PacketCompactor::new(&queue, &CompactorConfig::default());
        let pushed = compactor
            .push(0, 0, 48_000, 1_000, 2, ramp_producer(0, 2))
            .unwrap();
        assert_eq!(pushed, 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_producer_overrun_is_error() {
        let queue = SampleQueue::new();
        let compactor = PacketCompactor::new(&queue, &CompactorConfig::default());
        let result = compactor.push(0, 0, 48_000, 10, 1, |_buffer: &mut [f32]| 1_000);
        assert!(matches!(result, Err(PipelineError::Internal(_))));
    }

    #[test]
    fn test_invalid_layout_rejected() {
        let queue = SampleQueue::new();
        let compactor = PacketCompactor::new(&queue, &CompactorConfig::default());
        assert!(compactor.push(0, 0, 0, 10, 2, |_b: &mut [f32]| 0).is_err());
        assert!(compactor.push(0, 0, 48_000, 10, 0, |_b: &mut [f32]| 0).is_err());
    }
}
