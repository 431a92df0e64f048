//! Scripted endpoints for driving the backends without hardware.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use cadenza_audio::endpoint::{DeviceDirection, EndpointProvider, EventEndpoint, PollingEndpoint};
use cadenza_audio::error::{AudioError, Result};
use cadenza_audio::format::AudioFormat;

/// Shared state of one scripted event endpoint. Tests hold the `Arc` and
/// poke it while the render thread drives the trait object.
pub struct EventState {
    pub buffer_frames: u32,
    pub channels: u32,
    /// Frames "queued in hardware". Submits raise it, [`EventState::drain`]
    /// lowers it.
    pub padding: AtomicU32,
    pub submitted: Mutex<Vec<f32>>,
    /// Samples an input endpoint hands out on capture.
    pub capture_source: Mutex<Vec<f32>>,
    pub fail_padding: AtomicBool,
    pub started: AtomicBool,
    pub stopped: AtomicBool,
    ready_tx: Sender<()>,
    ready_rx: Receiver<()>,
}

impl EventState {
    pub fn new(buffer_frames: u32, channels: u32) -> Arc<Self> {
        let (ready_tx, ready_rx) = unbounded();
        Arc::new(EventState {
            buffer_frames,
            channels,
            padding: AtomicU32::new(0),
            submitted: Mutex::new(Vec::new()),
            capture_source: Mutex::new(Vec::new()),
            fail_padding: AtomicBool::new(false),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            ready_tx,
            ready_rx,
        })
    }

    /// Simulates the hardware playing `frames` frames.
    pub fn drain(&self, frames: u32) {
        let padding = self.padding.load(Ordering::SeqCst);
        self.padding
            .store(padding.saturating_sub(frames), Ordering::SeqCst);
    }

    /// Simulates the hardware capturing `samples`.
    pub fn feed_capture(&self, samples: &[f32]) {
        self.capture_source.lock().extend_from_slice(samples);
        let frames = samples.len() as u32 / self.channels;
        self.padding.fetch_add(frames, Ordering::SeqCst);
    }

    pub fn signal_ready(&self) {
        let _ = self.ready_tx.send(());
    }

    pub fn submitted_samples(&self) -> usize {
        self.submitted.lock().len()
    }
}

pub struct MockEventEndpoint {
    state: Arc<EventState>,
    direction: DeviceDirection,
}

impl EventEndpoint for MockEventEndpoint {
    fn buffer_frames(&self) -> u32 {
        self.state.buffer_frames
    }

    fn current_padding(&self) -> Result<u32> {
        if self.state.fail_padding.load(Ordering::SeqCst) {
            return Err(AudioError::endpoint("scripted padding failure"));
        }
        Ok(self.state.padding.load(Ordering::SeqCst))
    }

    fn submit(&mut self, samples: &[f32]) -> Result<()> {
        if self.direction != DeviceDirection::Output {
            return Err(AudioError::invalid_state("submit on input endpoint"));
        }
        self.state.submitted.lock().extend_from_slice(samples);
        let frames = samples.len() as u32 / self.state.channels;
        self.state.padding.fetch_add(frames, Ordering::SeqCst);
        Ok(())
    }

    fn capture(&mut self, out: &mut [f32]) -> Result<usize> {
        if self.direction != DeviceDirection::Input {
            return Err(AudioError::invalid_state("capture on output endpoint"));
        }
        let mut source = self.state.capture_source.lock();
        let take = out.len().min(source.len());
        out[..take].copy_from_slice(&source[..take]);
        source.drain(..take);
        let frames = take / self.state.channels as usize;
        self.state
            .padding
            .fetch_sub(frames as u32, Ordering::SeqCst);
        Ok(frames)
    }

    fn ready_signal(&self) -> Receiver<()> {
        self.state.ready_rx.clone()
    }

    fn start(&mut self) -> Result<()> {
        self.state.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.stopped.store(true, Ordering::SeqCst);
    }

    fn healthy(&self) -> bool {
        !self.state.stopped.load(Ordering::SeqCst)
    }
}

/// Shared state of one scripted polling endpoint.
pub struct PollingState {
    pub len_samples: u32,
    /// Emulated write-cursor lead over the play cursor, in samples.
    pub lead: u32,
    pub play: AtomicU32,
    /// Every span the backend serviced, as `(offset, samples)`.
    pub writes: Mutex<Vec<(u32, Vec<f32>)>>,
    /// Next N cursor queries fail (`u32::MAX` = always).
    pub cursor_failures: AtomicU32,
    pub started: AtomicBool,
    pub stopped: AtomicBool,
}

impl PollingState {
    pub fn new(len_samples: u32, lead: u32) -> Arc<Self> {
        Arc::new(PollingState {
            len_samples,
            lead,
            play: AtomicU32::new(0),
            writes: Mutex::new(Vec::new()),
            cursor_failures: AtomicU32::new(0),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// Simulates playback advancing by `samples`.
    pub fn advance_play(&self, samples: u32) {
        let play = self.play.load(Ordering::SeqCst);
        self.play
            .store((play + samples) % self.len_samples, Ordering::SeqCst);
    }

    pub fn serviced_samples(&self) -> usize {
        self.writes.lock().iter().map(|(_, s)| s.len()).sum()
    }
}

pub struct MockPollingEndpoint {
    state: Arc<PollingState>,
    direction: DeviceDirection,
}

impl PollingEndpoint for MockPollingEndpoint {
    fn buffer_samples(&self) -> u32 {
        self.state.len_samples
    }

    fn cursors(&self) -> Result<(u32, u32)> {
        let failures = self.state.cursor_failures.load(Ordering::SeqCst);
        if failures > 0 {
            if failures != u32::MAX {
                self.state
                    .cursor_failures
                    .store(failures - 1, Ordering::SeqCst);
            }
            return Err(AudioError::endpoint("scripted cursor failure"));
        }
        let play = self.state.play.load(Ordering::SeqCst);
        Ok((play, (play + self.state.lead) % self.state.len_samples))
    }

    fn write_span(&mut self, offset: u32, samples: &[f32]) -> Result<()> {
        if self.direction != DeviceDirection::Output {
            return Err(AudioError::invalid_state("write_span on input endpoint"));
        }
        self.state.writes.lock().push((offset, samples.to_vec()));
        Ok(())
    }

    fn read_span(&mut self, offset: u32, out: &mut [f32]) -> Result<()> {
        if self.direction != DeviceDirection::Input {
            return Err(AudioError::invalid_state("read_span on output endpoint"));
        }
        out.fill(0.25);
        self.state.writes.lock().push((offset, out.to_vec()));
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.state.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.state.stopped.store(true, Ordering::SeqCst);
    }

    fn healthy(&self) -> bool {
        !self.state.stopped.load(Ordering::SeqCst)
    }
}

/// Provider with scripted failure budgets and open-call instrumentation.
pub struct MockProvider {
    /// Next N event opens fail (`u32::MAX` = always).
    pub event_failures: AtomicU32,
    /// Next N polling opens fail (`u32::MAX` = always).
    pub polling_failures: AtomicU32,
    pub event_opens: AtomicUsize,
    pub polling_opens: AtomicUsize,
    pub last_event: Mutex<Option<Arc<EventState>>>,
    pub last_polling: Mutex<Option<Arc<PollingState>>>,
    /// Lead handed to polling endpoints, in milliseconds of audio.
    pub polling_lead_ms: u32,
}

impl MockProvider {
    pub fn reliable() -> Arc<Self> {
        Self::with_failures(0, 0)
    }

    pub fn failing_event() -> Arc<Self> {
        Self::with_failures(u32::MAX, 0)
    }

    pub fn failing_both() -> Arc<Self> {
        Self::with_failures(u32::MAX, u32::MAX)
    }

    pub fn with_failures(event: u32, polling: u32) -> Arc<Self> {
        Arc::new(MockProvider {
            event_failures: AtomicU32::new(event),
            polling_failures: AtomicU32::new(polling),
            event_opens: AtomicUsize::new(0),
            polling_opens: AtomicUsize::new(0),
            last_event: Mutex::new(None),
            last_polling: Mutex::new(None),
            polling_lead_ms: 100,
        })
    }

    fn take_failure(budget: &AtomicU32) -> bool {
        let remaining = budget.load(Ordering::SeqCst);
        if remaining == 0 {
            return false;
        }
        if remaining != u32::MAX {
            budget.store(remaining - 1, Ordering::SeqCst);
        }
        true
    }

    pub fn event_state(&self) -> Arc<EventState> {
        self.last_event.lock().clone().expect("no event endpoint opened")
    }

    pub fn polling_state(&self) -> Arc<PollingState> {
        self.last_polling
            .lock()
            .clone()
            .expect("no polling endpoint opened")
    }
}

impl EndpointProvider for MockProvider {
    fn open_event(
        &self,
        _name: Option<&str>,
        format: &AudioFormat,
        direction: DeviceDirection,
    ) -> Result<Box<dyn EventEndpoint>> {
        self.event_opens.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.event_failures) {
            return Err(AudioError::endpoint("scripted event open failure"));
        }
        let state = EventState::new(format.buffer_frames, format.channels as u32);
        *self.last_event.lock() = Some(Arc::clone(&state));
        Ok(Box::new(MockEventEndpoint { state, direction }))
    }

    fn open_polling(
        &self,
        _name: Option<&str>,
        format: &AudioFormat,
        direction: DeviceDirection,
    ) -> Result<Box<dyn PollingEndpoint>> {
        self.polling_opens.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.polling_failures) {
            return Err(AudioError::endpoint("scripted polling open failure"));
        }
        let len = format.frames_for_ms(200) * format.channels as u32;
        let lead = format.frames_for_ms(self.polling_lead_ms) * format.channels as u32;
        let state = PollingState::new(len, lead);
        *self.last_polling.lock() = Some(Arc::clone(&state));
        Ok(Box::new(MockPollingEndpoint { state, direction }))
    }
}
