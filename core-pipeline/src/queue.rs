//! # Sample Queue
//!
//! Thread-safe, time-ordered double-ended queue of decoded samples of one
//! kind.
//!
//! ## Design
//!
//! - Every operation takes the queue's single lock for a short, non-I/O
//!   critical section. The queue itself never blocks on decode work.
//! - `finished` is sticky until [`SampleQueue::reset`].
//! - Pop listeners are dispatched to their own [`TaskQueue`] after the lock
//!   is released, so a listener never observes a state older than the pop
//!   that triggered it.
//! - Accessors that need to look at every element return a snapshot of the
//!   shared references; callers work on the copy outside the lock.
//!
//! ## Usage
//!
//! ```rust
//! use core_pipeline::queue::SampleQueue;
//! use core_pipeline::sample::{AudioSample, MediaSample};
//! use std::sync::Arc;
//!
//! let queue: SampleQueue<AudioSample> = SampleQueue::new();
//! for time in [0, 10, 20] {
//!     let sample = AudioSample::new(0, time, 10, 1, 1, 100_000, vec![0.0].into());
//!     queue.push(Arc::new(sample));
//! }
//! assert_eq!(queue.duration(), 30);
//! assert_eq!(queue.pop_front().map(|s| s.time()), Some(0));
//! ```

use crate::sample::{MediaSample, Usecs};
use crate::scheduler::TaskQueue;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Callback invoked with the sample that was just popped.
pub type PopCallback<T> = Arc<dyn Fn(Arc<T>) + Send + Sync>;

struct PopListener<T> {
    callback: PopCallback<T>,
    target: Arc<dyn TaskQueue>,
}

impl<T> Clone for PopListener<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            target: Arc::clone(&self.target),
        }
    }
}

struct QueueState<T> {
    items: VecDeque<Arc<T>>,
    finished: bool,
}

/// Monitor-protected FIFO of shared samples.
pub struct SampleQueue<T> {
    state: Mutex<QueueState<T>>,
    changed: Condvar,
    listeners: Mutex<Vec<PopListener<T>>>,
}

impl<T: MediaSample> SampleQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                finished: false,
            }),
            changed: Condvar::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Append a sample at the back.
    pub fn push(&self, item: Arc<T>) {
        self.state.lock().items.push_back(item);
        self.changed.notify_all();
    }

    /// Re-insert a partially consumed sample at the front.
    ///
    /// Must not race with ordinary pushes for the same logical stream.
    pub fn push_front(&self, item: Arc<T>) {
        self.state.lock().items.push_front(item);
        self.changed.notify_all();
    }

    /// Remove and return the oldest sample, notifying pop listeners.
    pub fn pop_front(&self) -> Option<Arc<T>> {
        let item = self.state.lock().items.pop_front()?;
        self.notify_pop_listeners(&item);
        Some(item)
    }

    /// Mark that no more samples will arrive. Idempotent.
    pub fn finish(&self) {
        self.state.lock().finished = true;
        self.changed.notify_all();
    }

    /// Drop every queued sample and clear the finished flag.
    pub fn reset(&self) {
        let dropped = {
            let mut state = self.state.lock();
            state.finished = false;
            std::mem::take(&mut state.items)
        };
        trace!(count = dropped.len(), "Sample queue reset");
        drop(dropped);
        self.changed.notify_all();
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Oldest sample, without removing it.
    pub fn peek_front(&self) -> Option<Arc<T>> {
        self.state.lock().items.front().cloned()
    }

    /// Newest sample, without removing it.
    pub fn peek(&self) -> Option<Arc<T>> {
        self.state.lock().items.back().cloned()
    }

    pub fn size(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Empty and finished.
    pub fn at_end_of_stream(&self) -> bool {
        let state = self.state.lock();
        state.finished && state.items.is_empty()
    }

    /// Media time spanned by the queued samples: `back.end - front.start`.
    ///
    /// This approximates queued media time; it is not wall-clock duration.
    pub fn duration(&self) -> Usecs {
        let state = self.state.lock();
        match (state.items.front(), state.items.back()) {
            (Some(front), Some(back)) => back.end_time() - front.time(),
            _ => 0,
        }
    }

    /// Total frames queued.
    pub fn frame_count(&self) -> u64 {
        self.state
            .lock()
            .items
            .iter()
            .map(|item| item.frames() as u64)
            .sum()
    }

    /// Samples whose end time is at or after `time`, oldest first.
    ///
    /// Scans from the back and stops at the first sample that ends before
    /// `time`.
    pub fn get_elements_after(&self, time: Usecs) -> Vec<Arc<T>> {
        let state = self.state.lock();
        let mut found: Vec<Arc<T>> = state
            .items
            .iter()
            .rev()
            .take_while(|item| item.end_time() >= time)
            .cloned()
            .collect();
        drop(state);
        found.reverse();
        found
    }

    /// References to every queued sample, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.state.lock().items.iter().cloned().collect()
    }

    /// Approximate memory held by queued samples.
    pub fn size_in_bytes(&self) -> usize {
        self.snapshot().iter().map(|item| item.size_in_bytes()).sum()
    }

    /// Wait up to `timeout` for a sample or end of stream.
    ///
    /// Returns `true` if the queue is non-empty or finished on return.
    pub fn wait_for_data(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.finished {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        !state.items.is_empty() || state.finished
    }

    // ========================================================================
    // Pop Listeners
    // ========================================================================

    /// Register a callable that is dispatched to `target` after every pop.
    pub fn add_pop_listener<F>(&self, target: Arc<dyn TaskQueue>, callback: F)
    where
        F: Fn(Arc<T>) + Send + Sync + 'static,
    {
        self.listeners.lock().push(PopListener {
            callback: Arc::new(callback),
            target,
        });
    }

    pub fn clear_pop_listeners(&self) {
        self.listeners.lock().clear();
    }

    fn notify_pop_listeners(&self, item: &Arc<T>) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            let callback = listener.callback;
            let item = Arc::clone(item);
            if listener
                .target
                .dispatch(Box::new(move || callback(item)))
                .is_err()
            {
                trace!("Pop listener target no longer accepts work");
            }
        }
    }
}

impl<T: MediaSample> Default for SampleQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: MediaSample> fmt::Debug for SampleQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SampleQueue")
            .field("size", &state.items.len())
            .field("finished", &state.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::AudioSample;
    use crate::scheduler::ManualTaskQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn sample(time: Usecs, duration: Usecs) -> Arc<AudioSample> {
        Arc::new(AudioSample::new(0, time, duration, 1, 1, 1_000_000, vec![0.0].into()))
    }

    #[test]
    fn test_push_pop_fifo() {
        let queue = SampleQueue::new();
        for time in [0, 10, 20] {
            queue.push(sample(time, 10));
        }

        assert_eq!(queue.size(), 3);
        assert_eq!(queue.duration(), 30);
        let times: Vec<_> = std::iter::from_fn(|| queue.pop_front())
            .map(|s| s.time())
            .collect();
        assert_eq!(times, vec![0, 10, 20]);
        assert!(queue.is_empty());
        assert!(!queue.at_end_of_stream());

        queue.finish();
        assert!(queue.at_end_of_stream());
    }

    #[test]
    fn test_finish_with_items_is_not_eos() {
        let queue = SampleQueue::new();
        queue.push(sample(0, 10));
        queue.finish();
        assert!(queue.is_finished());
        assert!(!queue.at_end_of_stream());
        queue.pop_front();
        assert!(queue.at_end_of_stream());
    }

    #[test]
    fn test_reset_clears_finished() {
        let queue = SampleQueue::new();
        queue.push(sample(0, 10));
        queue.finish();
        queue.reset();

        assert!(queue.is_empty());
        assert!(!queue.is_finished());
        assert!(!queue.at_end_of_stream());
    }

    #[test]
    fn test_push_front_reinserts() {
        let queue = SampleQueue::new();
        queue.push(sample(10, 10));
        queue.push_front(sample(0, 10));
        assert_eq!(queue.peek_front().unwrap().time(), 0);
        assert_eq!(queue.peek().unwrap().time(), 10);
    }

    #[test]
    fn test_duration_empty_is_zero() {
        let queue: SampleQueue<AudioSample> = SampleQueue::new();
        assert_eq!(queue.duration(), 0);
        assert_eq!(queue.frame_count(), 0);
    }

    #[test]
    fn test_get_elements_after() {
        let queue = SampleQueue::new();
        for time in [0, 10, 20, 30] {
            queue.push(sample(time, 10));
        }

        let after: Vec<_> = queue.get_elements_after(20).iter().map(|s| s.time()).collect();
        // [10, 20) ends exactly at 20 and is included.
        assert_eq!(after, vec![10, 20, 30]);

        assert!(queue.get_elements_after(100).is_empty());
        assert_eq!(queue.get_elements_after(0).len(), 4);
        assert_eq!(queue.size(), 4);
    }

    #[test]
    fn test_pop_listener_dispatched_once_per_pop() {
        let queue = SampleQueue::new();
        let listener_queue = ManualTaskQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        queue.add_pop_listener(listener_queue.clone(), move |item: Arc<AudioSample>| {
            sink.lock().push(item.time());
        });

        queue.push(sample(0, 10));
        queue.push(sample(10, 10));
        queue.pop_front();
        queue.pop_front();
        assert!(queue.pop_front().is_none());

        // Notifications are asynchronous.
        assert!(seen.lock().is_empty());
        assert_eq!(listener_queue.run_until_idle(), 2);
        assert_eq!(*seen.lock(), vec![0, 10]);
    }

    #[test]
    fn test_pop_listener_sees_post_pop_state() {
        let queue = Arc::new(SampleQueue::new());
        let listener_queue = ManualTaskQueue::new();
        let observed = Arc::new(AtomicUsize::new(usize::MAX));

        let probe = Arc::clone(&queue);
        let out = Arc::clone(&observed);
        queue.add_pop_listener(listener_queue.clone(), move |_item: Arc<AudioSample>| {
            out.store(probe.size(), Ordering::SeqCst);
        });

        queue.push(sample(0, 10));
        queue.push(sample(10, 10));
        queue.pop_front();
        listener_queue.run_until_idle();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_for_data_wakes_on_push() {
        let queue = Arc::new(SampleQueue::new());
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(sample(0, 10));
        });

        assert!(queue.wait_for_data(Duration::from_secs(5)));
        handle.join().unwrap();
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_wait_for_data_times_out() {
        let queue: SampleQueue<AudioSample> = SampleQueue::new();
        assert!(!queue.wait_for_data(Duration::from_millis(10)));
        queue.finish();
        assert!(queue.wait_for_data(Duration::from_millis(10)));
    }

    #[test]
    fn test_concurrent_producer_consumer_preserves_order() {
        let queue = Arc::new(SampleQueue::new());
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            for i in 0..500 {
                producer.push(sample(i * 10, 10));
            }
            producer.finish();
        });

        let mut times = Vec::new();
        while !queue.at_end_of_stream() {
            if let Some(item) = queue.pop_front() {
                times.push(item.time());
            } else {
                queue.wait_for_data(Duration::from_millis(50));
            }
        }
        handle.join().unwrap();

        assert_eq!(times.len(), 500);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_size_in_bytes_tracks_contents() {
        let queue = SampleQueue::new();
        assert_eq!(queue.size_in_bytes(), 0);
        queue.push(sample(0, 10));
        assert!(queue.size_in_bytes() > 0);
    }
}
