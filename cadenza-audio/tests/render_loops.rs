//! Render loop behavior against scripted endpoints: ready-signal service,
//! timeout and underrun handling, transient-error tolerance.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use cadenza_audio::backend::event::EventBackend;
use cadenza_audio::backend::polling::PollingBackend;
use cadenza_audio::backend::{shared_callback_slot, Backend};
use cadenza_audio::endpoint::{DeviceDirection, EndpointProvider};
use cadenza_audio::AudioFormat;
use cadenza_report::{ErrorKind, ErrorReportingSystem};

use common::MockProvider;

fn test_format() -> AudioFormat {
    AudioFormat::new(48_000, 1, 480)
}

fn reporter() -> Arc<ErrorReportingSystem> {
    Arc::new(ErrorReportingSystem::new())
}

#[test]
fn test_event_loop_primes_and_follows_ready_signals() {
    let provider = MockProvider::reliable();
    let format = test_format();
    let endpoint = provider
        .open_event(None, &format, DeviceDirection::Output)
        .unwrap();
    let state = provider.event_state();

    let callback = shared_callback_slot();
    *callback.lock() = Some(Box::new(|span: &mut [f32]| {
        span.fill(0.25);
        Ok(())
    }));

    let mut backend = EventBackend::new(
        endpoint,
        format,
        DeviceDirection::Output,
        callback,
        reporter(),
    );
    backend.start().unwrap();
    std::thread::sleep(Duration::from_millis(30));

    // Priming filled the whole hardware buffer.
    assert_eq!(state.submitted_samples(), 480);
    assert_eq!(state.padding.load(Ordering::SeqCst), 480);
    assert!(backend.healthy());

    // Hardware plays half the buffer and signals; the loop tops it up.
    state.drain(240);
    state.signal_ready();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(state.submitted_samples(), 720);
    assert_eq!(state.padding.load(Ordering::SeqCst), 480);
    assert_eq!(backend.live_padding(), Some(240));
    assert!(backend.average_render_ms() >= 0.0);

    backend.stop().unwrap();
    assert!(state.stopped.load(Ordering::SeqCst));
}

#[test]
fn test_event_loop_skips_slivers() {
    let provider = MockProvider::reliable();
    let format = test_format();
    let endpoint = provider
        .open_event(None, &format, DeviceDirection::Output)
        .unwrap();
    let state = provider.event_state();

    let mut backend = EventBackend::new(
        endpoint,
        format,
        DeviceDirection::Output,
        shared_callback_slot(),
        reporter(),
    );
    backend.start().unwrap();
    std::thread::sleep(Duration::from_millis(30));

    // Less than a quarter of the buffer free: the pass does nothing.
    state.drain(100);
    state.signal_ready();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(state.submitted_samples(), 480);

    backend.stop().unwrap();
}

#[test]
fn test_event_loop_timeout_reports_underrun_and_refills() {
    let provider = MockProvider::reliable();
    let format = test_format();
    let endpoint = provider
        .open_event(None, &format, DeviceDirection::Output)
        .unwrap();
    let state = provider.event_state();
    let reporter = reporter();

    let mut backend = EventBackend::new(
        endpoint,
        format,
        DeviceDirection::Output,
        shared_callback_slot(),
        Arc::clone(&reporter),
    );
    backend.start().unwrap();
    std::thread::sleep(Duration::from_millis(30));

    // The buffer runs dry with no ready signal; the 100ms timeout must
    // notice, report the underrun and refill on its own.
    state.drain(480);
    std::thread::sleep(Duration::from_millis(250));

    assert_eq!(
        reporter.last_error().unwrap().kind,
        ErrorKind::BufferUnderrun
    );
    assert_eq!(state.padding.load(Ordering::SeqCst), 480);

    backend.stop().unwrap();
}

#[test]
fn test_event_loop_exits_on_endpoint_failure() {
    let provider = MockProvider::reliable();
    let format = test_format();
    let endpoint = provider
        .open_event(None, &format, DeviceDirection::Output)
        .unwrap();
    let state = provider.event_state();
    let reporter = reporter();

    let mut backend = EventBackend::new(
        endpoint,
        format,
        DeviceDirection::Output,
        shared_callback_slot(),
        Arc::clone(&reporter),
    );
    backend.start().unwrap();
    std::thread::sleep(Duration::from_millis(30));

    state.fail_padding.store(true, Ordering::SeqCst);
    state.signal_ready();
    std::thread::sleep(Duration::from_millis(50));

    assert!(!backend.healthy());
    assert_eq!(
        reporter.last_error().unwrap().kind,
        ErrorKind::DeviceDisconnected
    );
    // The endpoint still comes back for reuse.
    backend.stop().unwrap();
}

#[test]
fn test_polling_loop_services_safe_spans() {
    let provider = MockProvider::reliable();
    let format = test_format();
    let endpoint = provider
        .open_polling(None, &format, DeviceDirection::Output)
        .unwrap();
    let state = provider.polling_state();

    let mut backend = PollingBackend::new(
        endpoint,
        format,
        DeviceDirection::Output,
        shared_callback_slot(),
        reporter(),
    );
    backend.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));

    // First tick services the initial lead (100ms = 4800 samples).
    {
        let writes = state.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, 0);
        assert_eq!(writes[0].1.len(), 4800);
    }

    // Play advances by 50ms; the next tick services exactly that much.
    state.advance_play(2_400);
    std::thread::sleep(Duration::from_millis(100));
    {
        let writes = state.writes.lock();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1].0, 4_800);
        assert_eq!(writes[1].1.len(), 2_400);
    }

    backend.stop().unwrap();
    assert!(state.stopped.load(Ordering::SeqCst));
}

#[test]
fn test_polling_loop_ignores_spans_below_min_chunk() {
    let provider = MockProvider::reliable();
    let format = test_format();
    let endpoint = provider
        .open_polling(None, &format, DeviceDirection::Output)
        .unwrap();
    let state = provider.polling_state();

    let mut backend = PollingBackend::new(
        endpoint,
        format,
        DeviceDirection::Output,
        shared_callback_slot(),
        reporter(),
    );
    backend.start().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(state.writes.lock().len(), 1);

    // 10ms of play progress is below the 20ms minimum chunk.
    state.advance_play(480);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(state.writes.lock().len(), 1);

    // Another 15ms pushes the span over the threshold.
    state.advance_play(720);
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(state.writes.lock().len(), 2);
    assert_eq!(state.writes.lock()[1].1.len(), 1_200);

    backend.stop().unwrap();
}

#[test]
fn test_polling_loop_survives_transient_errors() {
    let provider = MockProvider::reliable();
    let format = test_format();
    let endpoint = provider
        .open_polling(None, &format, DeviceDirection::Output)
        .unwrap();
    let state = provider.polling_state();
    let reporter = reporter();

    // Three cursor failures, then clean: below the consecutive-error
    // budget, so the worker keeps going.
    state.cursor_failures.store(3, Ordering::SeqCst);

    let mut backend = PollingBackend::new(
        endpoint,
        format,
        DeviceDirection::Output,
        shared_callback_slot(),
        Arc::clone(&reporter),
    );
    backend.start().unwrap();
    std::thread::sleep(Duration::from_millis(400));

    assert!(backend.healthy());
    assert!(!state.writes.lock().is_empty());
    assert!(reporter.last_error().is_none(), "transient errors stay local");

    backend.stop().unwrap();
}

#[test]
fn test_polling_loop_gives_up_after_consecutive_errors() {
    let provider = MockProvider::reliable();
    let format = test_format();
    let endpoint = provider
        .open_polling(None, &format, DeviceDirection::Output)
        .unwrap();
    let state = provider.polling_state();
    let reporter = reporter();

    state.cursor_failures.store(u32::MAX, Ordering::SeqCst);

    let mut backend = PollingBackend::new(
        endpoint,
        format,
        DeviceDirection::Output,
        shared_callback_slot(),
        Arc::clone(&reporter),
    );
    backend.start().unwrap();
    std::thread::sleep(Duration::from_millis(900));

    assert!(!backend.healthy());
    assert_eq!(reporter.last_error().unwrap().kind, ErrorKind::BufferLost);
    backend.stop().unwrap();
}
