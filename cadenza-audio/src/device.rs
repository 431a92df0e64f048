//! Audio device: the caller-facing handle tying together format, ring
//! buffer, callback slot and the backend chain.

use std::sync::Arc;

use cadenza_report::{report_error, ErrorKind, ErrorReportingSystem};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{shared_callback_slot, BackendKind, SharedCallback};
use crate::buffer::RingBuffer;
use crate::endpoint::{DeviceDirection, EndpointProvider};
use crate::error::{AudioError, CallbackError, Result};
use crate::fallback::FallbackManager;
use crate::format::AudioFormat;

/// Ring capacity relative to the hardware buffer.
const RING_BUFFER_FACTOR: usize = 4;

/// Lifecycle of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Stopped,
    Running,
    Paused,
}

/// One open audio stream.
///
/// Samples move either through the caller-supplied callback or, when none
/// is registered, through the device's ring buffer: [`AudioDevice::write`]
/// queues frames that the render thread drains (output), or captured
/// frames pile up for [`AudioDevice::read`] (input).
pub struct AudioDevice {
    name: Option<String>,
    format: AudioFormat,
    direction: DeviceDirection,
    state: DeviceState,
    callback: SharedCallback,
    ring: Arc<Mutex<RingBuffer>>,
    manager: FallbackManager,
    reporter: Arc<ErrorReportingSystem>,
    closed: bool,
}

impl AudioDevice {
    pub(crate) fn open(
        provider: Arc<dyn EndpointProvider>,
        reporter: Arc<ErrorReportingSystem>,
        name: Option<&str>,
        format: &AudioFormat,
        direction: DeviceDirection,
    ) -> Result<Self> {
        format.validate()?;
        let ring = Arc::new(Mutex::new(RingBuffer::new(
            format.buffer_frames as usize * RING_BUFFER_FACTOR,
            format.channels,
        )));
        let callback = shared_callback_slot();
        install_ring_bridge(&callback, &ring, direction);

        let mut manager = FallbackManager::new(provider, Arc::clone(&reporter));
        manager.init_with_fallback(name, format, direction, Arc::clone(&callback))?;

        info!(?direction, rate = format.sample_rate, "audio device opened");
        Ok(AudioDevice {
            name: name.map(String::from),
            format: *format,
            direction,
            state: DeviceState::Stopped,
            callback,
            ring,
            manager,
            reporter,
            closed: false,
        })
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(AudioError::Closed);
        }
        Ok(())
    }

    /// Replaces the sample callback. Valid in any state; a running stream
    /// picks the new callback up on its next pass.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: FnMut(&mut [f32]) -> std::result::Result<(), CallbackError> + Send + 'static,
    {
        *self.callback.lock() = Some(Box::new(callback));
    }

    /// Removes the caller's callback and reconnects the ring buffer.
    pub fn clear_callback(&self) {
        install_ring_bridge(&self.callback, &self.ring, self.direction);
    }

    /// Starts (or resumes) the stream.
    pub fn start(&mut self) -> Result<()> {
        self.check_open()?;
        match self.state {
            DeviceState::Running => Ok(()),
            DeviceState::Stopped | DeviceState::Paused => {
                let backend = self
                    .manager
                    .backend_mut()
                    .ok_or_else(|| AudioError::invalid_state("no backend available"))?;
                backend.start()?;
                self.state = DeviceState::Running;
                Ok(())
            }
        }
    }

    /// Stops the stream. Idempotent: stopping a stopped device does
    /// nothing and touches no backend.
    pub fn stop(&mut self) -> Result<()> {
        self.check_open()?;
        if self.state == DeviceState::Stopped {
            return Ok(());
        }
        if let Some(backend) = self.manager.backend_mut() {
            backend.stop()?;
        }
        self.state = DeviceState::Stopped;
        Ok(())
    }

    /// Pauses the stream. Backends without a true pause degrade to
    /// stop-and-restart; `start` resumes either way.
    pub fn pause(&mut self) -> Result<()> {
        self.check_open()?;
        match self.state {
            DeviceState::Paused => Ok(()),
            DeviceState::Stopped => Err(AudioError::invalid_state("pause on a stopped device")),
            DeviceState::Running => {
                let backend = self
                    .manager
                    .backend_mut()
                    .ok_or_else(|| AudioError::invalid_state("no backend available"))?;
                match backend.pause() {
                    Ok(()) => {}
                    Err(AudioError::PauseUnsupported) => {
                        report_error!(
                            self.reporter,
                            ErrorKind::PauseUnsupported,
                            "pause",
                            "stream stopped, will restart on resume"
                        );
                        backend.stop()?;
                    }
                    Err(e) => return Err(e),
                }
                self.state = DeviceState::Paused;
                Ok(())
            }
        }
    }

    /// Stops the stream and releases the backend. Further operations fail
    /// with [`AudioError::Closed`]. Called automatically on drop.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let stop_result = self.stop();
        self.manager.release();
        self.ring.lock().reset();
        self.closed = true;
        debug!("audio device closed");
        stop_result
    }

    /// Queues interleaved frames for playback through the ring buffer.
    /// Returns frames accepted. Output devices only.
    pub fn write(&self, samples: &[f32]) -> Result<usize> {
        self.check_open()?;
        if self.direction != DeviceDirection::Output {
            return Err(AudioError::invalid_state("write on an input device"));
        }
        Ok(self.ring.lock().write(samples))
    }

    /// Reads captured interleaved frames from the ring buffer. Returns
    /// frames read. Input devices only.
    pub fn read(&self, out: &mut [f32]) -> Result<usize> {
        self.check_open()?;
        if self.direction != DeviceDirection::Input {
            return Err(AudioError::invalid_state("read on an output device"));
        }
        Ok(self.ring.lock().read(out))
    }

    /// Frames queued in the ring buffer.
    pub fn buffered_frames(&self) -> usize {
        self.ring.lock().available_data()
    }

    /// Estimated output latency in milliseconds: live endpoint padding
    /// when the backend publishes it, otherwise the hardware buffer span.
    pub fn latency_ms(&self) -> f64 {
        let live = self.manager.backend().and_then(|b| b.live_padding());
        match live {
            Some(padding) => padding as f64 * 1_000.0 / self.format.sample_rate as f64,
            None => self.format.buffer_duration_ms(),
        }
    }

    /// Health probe of the active backend.
    pub fn check_status(&self) -> bool {
        !self.closed && self.manager.check_status()
    }

    /// Tries to bring a healthy backend back, preferring the event-driven
    /// one. A recovered device resumes in its previous running state.
    pub fn attempt_recovery(&mut self) -> Result<BackendKind> {
        self.check_open()?;
        let kind = self.manager.attempt_recovery(
            self.name.as_deref(),
            &self.format,
            self.direction,
            Arc::clone(&self.callback),
        )?;
        if self.state != DeviceState::Running {
            // Recovery starts the backend; put it back in step with us.
            if let Some(backend) = self.manager.backend_mut() {
                backend.stop()?;
            }
        }
        Ok(kind)
    }

    pub fn set_auto_recovery(&mut self, enabled: bool) {
        self.manager.set_auto_recovery(enabled);
    }

    pub fn status_summary(&self) -> String {
        self.manager.status_summary()
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    pub fn direction(&self) -> DeviceDirection {
        self.direction
    }

    /// Kind of the backend currently serving this device.
    pub fn backend_kind(&self) -> Option<BackendKind> {
        self.manager.backend().map(|b| b.kind())
    }

    /// Moving average of render pass duration, in milliseconds.
    pub fn average_render_ms(&self) -> f64 {
        self.manager
            .backend()
            .map(|b| b.average_render_ms())
            .unwrap_or(0.0)
    }

    pub fn reporter(&self) -> &Arc<ErrorReportingSystem> {
        &self.reporter
    }
}

impl Drop for AudioDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("error while closing audio device: {e}");
        }
    }
}

impl std::fmt::Debug for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioDevice")
            .field("format", &self.format)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("backend", &self.backend_kind())
            .finish()
    }
}

/// Installs the default callback bridging the device ring buffer to the
/// render thread: output pops queued frames (silence on shortfall), input
/// pushes captured frames (overflow dropped).
fn install_ring_bridge(
    callback: &SharedCallback,
    ring: &Arc<Mutex<RingBuffer>>,
    direction: DeviceDirection,
) {
    let ring = Arc::clone(ring);
    let bridge: Box<
        dyn FnMut(&mut [f32]) -> std::result::Result<(), CallbackError> + Send + 'static,
    > = match direction {
        DeviceDirection::Output => Box::new(move |span: &mut [f32]| {
            let mut ring = ring.lock();
            let frames = ring.read(span);
            let filled = frames * ring.channels();
            span[filled..].fill(0.0);
            Ok(())
        }),
        DeviceDirection::Input => Box::new(move |span: &mut [f32]| {
            let mut ring = ring.lock();
            let wrote = ring.write(span);
            if wrote * ring.channels() < span.len() {
                debug!("capture ring full, frames dropped");
            }
            Ok(())
        }),
    };
    *callback.lock() = Some(bridge);
}
