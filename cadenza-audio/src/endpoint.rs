//! Hardware endpoint abstraction.
//!
//! Backends never talk to the platform audio API directly; they drive one
//! of these traits. The production implementation is
//! [`CpalHost`](crate::host::CpalHost); tests substitute scripted
//! endpoints to exercise the render loops headless.

use crossbeam_channel::Receiver;

use crate::error::Result;
use crate::format::AudioFormat;

/// Which way samples flow through a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceDirection {
    /// Engine renders, endpoint plays.
    Output,
    /// Endpoint captures, engine consumes.
    Input,
}

/// An endpoint that signals readiness through an event channel.
///
/// For output, `current_padding` is the number of frames queued and not
/// yet played; `buffer_frames - padding` frames may be submitted. For
/// input, `current_padding` is the number of captured frames waiting to
/// be read.
pub trait EventEndpoint: Send {
    /// Hardware buffer size in frames.
    fn buffer_frames(&self) -> u32;

    /// Frames currently queued (output) or waiting (input).
    fn current_padding(&self) -> Result<u32>;

    /// Queues interleaved samples for playback. Output direction only.
    fn submit(&mut self, samples: &[f32]) -> Result<()>;

    /// Reads captured interleaved samples. Returns frames read. Input
    /// direction only.
    fn capture(&mut self, out: &mut [f32]) -> Result<usize>;

    /// Channel signalled whenever the endpoint wants service. The render
    /// loop also times out on its own, so a missed signal is not fatal.
    fn ready_signal(&self) -> Receiver<()>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    /// Health probe. False once the endpoint has failed terminally.
    fn healthy(&self) -> bool;
}

/// An endpoint exposing a looping buffer with play/write cursors, serviced
/// by periodic polling.
pub trait PollingEndpoint: Send {
    /// Looping buffer length in samples.
    fn buffer_samples(&self) -> u32;

    /// Current `(play, write)` cursor offsets in samples.
    ///
    /// The span from the backend's own cursor up to `write` is safe to
    /// fill (output) or drain (input); the hardware owns the rest.
    fn cursors(&self) -> Result<(u32, u32)>;

    /// Copies samples into the looping buffer starting at `offset`,
    /// wrapping as needed. Output direction only.
    fn write_span(&mut self, offset: u32, samples: &[f32]) -> Result<()>;

    /// Copies samples out of the looping buffer starting at `offset`,
    /// wrapping as needed. Input direction only.
    fn read_span(&mut self, offset: u32, out: &mut [f32]) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    fn healthy(&self) -> bool;
}

/// Opens endpoints. One provider per host audio API.
pub trait EndpointProvider: Send + Sync {
    /// Opens an event-driven endpoint on the named device, or the default
    /// device when `name` is `None`.
    fn open_event(
        &self,
        name: Option<&str>,
        format: &AudioFormat,
        direction: DeviceDirection,
    ) -> Result<Box<dyn EventEndpoint>>;

    /// Opens a polling endpoint on the named device, or the default device
    /// when `name` is `None`.
    fn open_polling(
        &self,
        name: Option<&str>,
        format: &AudioFormat,
        direction: DeviceDirection,
    ) -> Result<Box<dyn PollingEndpoint>>;
}
