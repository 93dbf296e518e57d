//! Integration tests for the decode orchestrator request/callback surface.

mod common;

use common::{audio, frame, ScriptedBackend};
use core_pipeline::{
    AudioSample, BufferedRangeEstimator, ByteRange, ChannelCallback, DecodeCallback, DecodeEvent,
    DecodeOrchestrator, Decoded, ManualTaskQueue, MediaKind, MediaSample, PipelineConfig,
    PipelineError, StreamPhase, TimeRange, Usecs, VideoSample,
};
use mockall::mock;
use std::sync::Arc;
use std::time::Duration;

mock! {
    pub Callback {}

    impl DecodeCallback for Callback {
        fn on_audio_decoded(&self, sample: Decoded<AudioSample>);
        fn on_video_decoded(&self, sample: Decoded<VideoSample>);
        fn on_audio_eos(&self);
        fn on_video_eos(&self);
        fn on_decode_error(&self, kind: MediaKind, error: PipelineError);
    }
}

mock! {
    pub Estimator {}

    impl BufferedRangeEstimator for Estimator {
        fn estimate(&self, cached: &[ByteRange], duration: Usecs) -> Vec<TimeRange>;
    }
}

fn manual(backend: ScriptedBackend) -> (Arc<DecodeOrchestrator>, Arc<ManualTaskQueue>) {
    let queue = ManualTaskQueue::new();
    let orchestrator =
        DecodeOrchestrator::new(backend.boxed(), queue.clone(), PipelineConfig::default())
            .unwrap();
    (orchestrator, queue)
}

// ============================================================================
// Video Requests
// ============================================================================

#[test]
fn test_empty_video_reports_eos_once() {
    let (orchestrator, queue) = manual(ScriptedBackend::new().with_video(vec![]));

    let mut callback = MockCallback::new();
    callback.expect_on_video_eos().times(1).return_const(());
    callback.expect_on_video_decoded().times(0);
    callback.expect_on_decode_error().times(0);
    orchestrator.set_callback(Some(Arc::new(callback)));

    orchestrator.request_video_data(false, 0);

    assert_eq!(queue.dispatched_count(), 0);
    assert_eq!(orchestrator.video_phase(), StreamPhase::Eos);
    assert!(orchestrator.video_queue().at_end_of_stream());
    orchestrator.set_callback(None);
}

#[test]
fn test_keyframe_skip_reposts_until_keyframe() {
    let backend = ScriptedBackend::new().with_video(vec![
        frame(0, 1_000, false),
        frame(1_000, 1_000, false),
        frame(2_500, 1_000, true),
    ]);
    let log = backend.log();
    let (orchestrator, queue) = manual(backend);
    let (callback, mut rx) = ChannelCallback::new();
    orchestrator.set_callback(Some(callback));

    orchestrator.request_video_data(true, 1_000);
    assert_eq!(orchestrator.video_phase(), StreamPhase::Skipping);
    assert!(rx.try_recv().is_err());

    assert_eq!(queue.run_until_idle(), 2);
    assert_eq!(queue.dispatched_count(), 2);
    assert_eq!(orchestrator.stats().keyframe_skip_reposts, 2);
    assert_eq!(log.lock().video_calls, 3);

    match rx.try_recv().unwrap() {
        DecodeEvent::VideoDecoded(decoded) => {
            assert_eq!(decoded.sample.time(), 2_500);
            assert!(decoded.sample.is_keyframe());
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(rx.try_recv().is_err());
    assert_eq!(orchestrator.video_phase(), StreamPhase::Delivering);
}

#[test]
fn test_keyframe_skip_terminates_at_eos() {
    let frames = (0..5).map(|i| frame(i * 1_000, 1_000, false)).collect();
    let (orchestrator, queue) = manual(ScriptedBackend::new().with_video(frames));
    let (callback, mut rx) = ChannelCallback::new();
    orchestrator.set_callback(Some(callback));

    orchestrator.request_video_data(true, 10_000);
    let reposts = queue.run_until_idle();

    assert_eq!(reposts, 5);
    assert!(matches!(rx.try_recv().unwrap(), DecodeEvent::VideoEos));
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_skip_not_requested_decodes_synchronously() {
    let frames = vec![frame(0, 1_000, false), frame(1_000, 1_000, true)];
    let (orchestrator, queue) = manual(ScriptedBackend::new().with_video(frames));
    let (callback, mut rx) = ChannelCallback::new();
    orchestrator.set_callback(Some(callback));

    orchestrator.request_video_data(false, 0);

    assert_eq!(queue.dispatched_count(), 0);
    match rx.try_recv().unwrap() {
        DecodeEvent::VideoDecoded(decoded) => assert_eq!(decoded.sample.time(), 0),
        other => panic!("unexpected event: {:?}", other),
    }
}

// ============================================================================
// Error Isolation
// ============================================================================

#[test]
fn test_video_failure_does_not_stop_audio() {
    let backend = ScriptedBackend::new()
        .with_audio(vec![audio(0, 1_000)])
        .with_video(vec![])
        .failing_video(PipelineError::BackendRejected("bad slice".into()));
    let (orchestrator, _queue) = manual(backend);

    let mut callback = MockCallback::new();
    callback
        .expect_on_decode_error()
        .withf(|kind, error| {
            *kind == MediaKind::Video && matches!(error, PipelineError::BackendRejected(_))
        })
        .times(1)
        .return_const(());
    callback
        .expect_on_audio_decoded()
        .withf(|decoded| decoded.sample.time() == 0)
        .times(1)
        .return_const(());
    orchestrator.set_callback(Some(Arc::new(callback)));

    orchestrator.request_video_data(false, 0);
    orchestrator.request_audio_data();

    assert_eq!(orchestrator.video_phase(), StreamPhase::Errored);
    assert!(!orchestrator.video_queue().is_finished());
    assert_eq!(orchestrator.stats().decode_errors, 1);
    orchestrator.set_callback(None);
}

#[test]
fn test_non_backend_error_is_classified_as_rejection() {
    let backend = ScriptedBackend::new()
        .with_audio(vec![])
        .failing_audio(PipelineError::Internal("codec state".into()));
    let (orchestrator, _queue) = manual(backend);
    let (callback, mut rx) = ChannelCallback::new();
    orchestrator.set_callback(Some(callback));

    orchestrator.request_audio_data();

    match rx.try_recv().unwrap() {
        DecodeEvent::DecodeError { kind, error } => {
            assert_eq!(kind, MediaKind::Audio);
            assert!(matches!(error, PipelineError::BackendRejected(_)));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

// ============================================================================
// Probing, Trimming and Buffered Ranges
// ============================================================================

#[test]
fn test_decode_to_first_samples() {
    let backend = ScriptedBackend::new()
        .with_audio(vec![audio(0, 1_000), audio(1_000, 1_000)])
        .with_video(vec![frame(0, 33_000, true)]);
    let (orchestrator, _queue) = manual(backend);

    let (info, tags) = orchestrator.read_metadata().unwrap();
    assert!(info.has_audio() && info.has_video());
    assert_eq!(tags.get("title").map(String::as_str), Some("Scripted"));

    let first_audio = orchestrator.decode_to_first_audio().unwrap().unwrap();
    let first_video = orchestrator.decode_to_first_video().unwrap().unwrap();
    assert_eq!(first_audio.time(), 0);
    assert!(first_video.is_keyframe());
    assert_eq!(orchestrator.audio_queue().size(), 1);
    assert!(orchestrator.queued_memory() > 0);
}

#[test]
fn test_decode_to_target_retimes_straddling_frame() {
    let backend = ScriptedBackend::new().with_video(vec![
        frame(0, 33_000, true),
        frame(33_000, 33_000, false),
        frame(66_000, 33_000, false),
    ]);
    let (orchestrator, _queue) = manual(backend);
    orchestrator.read_metadata().unwrap();

    orchestrator.decode_to_target(50_000).unwrap();

    let front = orchestrator.video_queue().peek_front().unwrap();
    assert_eq!(front.time(), 50_000);
    assert_eq!(front.duration(), 16_000);
    assert_eq!(front.end_time(), 66_000);
}

#[test]
fn test_decode_to_target_past_end_keeps_last_frame() {
    let backend = ScriptedBackend::new().with_video(vec![
        frame(0, 33_000, true),
        frame(33_000, 33_000, false),
    ]);
    let (orchestrator, _queue) = manual(backend);
    orchestrator.read_metadata().unwrap();

    orchestrator.decode_to_target(1_000_000).unwrap();

    let queue = orchestrator.video_queue();
    assert_eq!(queue.size(), 1);
    assert!(queue.is_finished());
    assert!(queue.peek_front().unwrap().image().is_some());
}

#[test]
fn test_get_buffered_uses_estimator_once_duration_known() {
    let backend = ScriptedBackend::new()
        .with_audio(vec![])
        .with_duration(10_000_000);
    let (orchestrator, _queue) = manual(backend);
    let cached = [ByteRange::new(0, 4_096)];

    let mut unused = MockEstimator::new();
    unused.expect_estimate().times(0);
    assert!(orchestrator.get_buffered(&unused, &cached).is_empty());

    orchestrator.read_metadata().unwrap();
    let mut estimator = MockEstimator::new();
    estimator
        .expect_estimate()
        .withf(|cached, duration| cached.len() == 1 && *duration == 10_000_000)
        .times(1)
        .returning(|_, _| vec![TimeRange::new(0, 2_000_000)]);

    let ranges = orchestrator.get_buffered(&estimator, &cached);
    assert_eq!(ranges, vec![TimeRange::new(0, 2_000_000)]);
}

// ============================================================================
// Threaded Worker
// ============================================================================

#[tokio::test]
async fn test_serial_worker_delivers_in_order() {
    let backend = ScriptedBackend::new().with_audio(vec![
        audio(0, 1_000),
        audio(1_000, 1_000),
        audio(2_000, 1_000),
    ]);
    let config = PipelineConfig {
        decode_thread_name: "decode-test".to_string(),
        ..Default::default()
    };
    let (orchestrator, worker) =
        DecodeOrchestrator::with_serial_queue(backend.boxed(), config).unwrap();
    assert_eq!(worker.name(), "decode-test");

    let (callback, mut rx) = ChannelCallback::new();
    orchestrator.set_callback(Some(callback));

    let mut times = Vec::new();
    loop {
        orchestrator.post_audio_request().unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("decode worker stalled")
            .expect("callback channel closed");
        match event {
            DecodeEvent::AudioDecoded(decoded) => times.push(decoded.sample.time()),
            DecodeEvent::AudioEos => break,
            other => panic!("unexpected event: {:?}", other),
        }
    }

    assert_eq!(times, vec![0, 1_000, 2_000]);
    orchestrator.shutdown();
    worker.shutdown();
}
