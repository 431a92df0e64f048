//! cpal-backed endpoint provider.
//!
//! cpal streams are not `Send`, so each endpoint parks its stream on a
//! dedicated holder thread and talks to it through shared state: a
//! staging ring (event endpoints) or a looping buffer with a play cursor
//! (polling endpoints). The holder thread reports its build result back
//! before the endpoint's `start` returns.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::buffer::RingBuffer;
use crate::endpoint::{DeviceDirection, EndpointProvider, EventEndpoint, PollingEndpoint};
use crate::error::{AudioError, Result};
use crate::format::AudioFormat;

/// Length of the polling endpoints' looping buffer, in milliseconds.
const LOOP_BUFFER_MS: u32 = 200;
/// How far the emulated write cursor leads the play cursor, in milliseconds.
const WRITE_CURSOR_LEAD_MS: u32 = 15;
/// How long `start` waits for the holder thread to report.
const STREAM_BUILD_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens endpoints through the host's default cpal backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHost;

impl CpalHost {
    pub fn new() -> Self {
        CpalHost
    }
}

impl EndpointProvider for CpalHost {
    fn open_event(
        &self,
        name: Option<&str>,
        format: &AudioFormat,
        direction: DeviceDirection,
    ) -> Result<Box<dyn EventEndpoint>> {
        format.validate()?;
        // Fail fast if the device is not there; the stream itself is
        // built lazily on start.
        find_device(name, direction)?;
        let (ready_tx, ready_rx) = bounded(1);
        debug!(?direction, rate = format.sample_rate, "opened cpal event endpoint");
        Ok(Box::new(CpalEventEndpoint {
            name: name.map(String::from),
            format: *format,
            direction,
            staging: Arc::new(Mutex::new(RingBuffer::new(
                format.buffer_frames as usize,
                format.channels,
            ))),
            failed: Arc::new(AtomicBool::new(false)),
            ready_tx,
            ready_rx,
            holder: None,
        }))
    }

    fn open_polling(
        &self,
        name: Option<&str>,
        format: &AudioFormat,
        direction: DeviceDirection,
    ) -> Result<Box<dyn PollingEndpoint>> {
        format.validate()?;
        find_device(name, direction)?;
        let samples = loop_buffer_frames(format) as usize * format.channels as usize;
        let lead = format.frames_for_ms(WRITE_CURSOR_LEAD_MS) * format.channels as u32;
        debug!(?direction, rate = format.sample_rate, "opened cpal polling endpoint");
        Ok(Box::new(CpalPollingEndpoint {
            name: name.map(String::from),
            format: *format,
            direction,
            loop_buffer: Arc::new(Mutex::new(vec![0.0; samples])),
            play_cursor: Arc::new(AtomicU32::new(0)),
            lead,
            failed: Arc::new(AtomicBool::new(false)),
            holder: None,
        }))
    }
}

fn find_device(name: Option<&str>, direction: DeviceDirection) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match (name, direction) {
        (None, DeviceDirection::Output) => host
            .default_output_device()
            .ok_or_else(|| AudioError::endpoint("no default output device")),
        (None, DeviceDirection::Input) => host
            .default_input_device()
            .ok_or_else(|| AudioError::endpoint("no default input device")),
        (Some(wanted), DeviceDirection::Output) => host
            .output_devices()
            .map_err(|e| AudioError::endpoint(format!("device enumeration failed: {e}")))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| AudioError::endpoint(format!("output device '{wanted}' not found"))),
        (Some(wanted), DeviceDirection::Input) => host
            .input_devices()
            .map_err(|e| AudioError::endpoint(format!("device enumeration failed: {e}")))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| AudioError::endpoint(format!("input device '{wanted}' not found"))),
    }
}

/// Loop buffer length in frames: nominally [`LOOP_BUFFER_MS`], but never
/// shorter than two hardware buffers so one callback span cannot lap the
/// loop at low sample rates.
fn loop_buffer_frames(format: &AudioFormat) -> u32 {
    format
        .frames_for_ms(LOOP_BUFFER_MS)
        .max(format.buffer_frames * 2)
}

fn stream_config(format: &AudioFormat) -> cpal::StreamConfig {
    cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(format.buffer_frames),
    }
}

struct StreamHolder {
    stop_tx: Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// Spawns the holder thread and waits for its build result.
fn spawn_holder<F>(build_and_hold: F, failed: &Arc<AtomicBool>) -> Result<StreamHolder>
where
    F: FnOnce(Receiver<()>, Sender<Result<()>>) + Send + 'static,
{
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let (result_tx, result_rx) = bounded::<Result<()>>(1);
    let handle = thread::Builder::new()
        .name("cadenza-cpal-stream".into())
        .spawn(move || build_and_hold(stop_rx, result_tx))
        .map_err(|e| AudioError::endpoint(format!("failed to spawn stream thread: {e}")))?;
    match result_rx.recv_timeout(STREAM_BUILD_TIMEOUT) {
        Ok(Ok(())) => Ok(StreamHolder { stop_tx, handle }),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            failed.store(true, Ordering::SeqCst);
            drop(handle);
            Err(AudioError::endpoint("stream thread did not report readiness"))
        }
    }
}

fn stop_holder(holder: Option<StreamHolder>) {
    if let Some(holder) = holder {
        let _ = holder.stop_tx.send(());
        if holder.handle.join().is_err() {
            warn!("stream holder thread panicked");
        }
    }
}

// ---------------------------------------------------------------------------
// Event endpoint
// ---------------------------------------------------------------------------

struct CpalEventEndpoint {
    name: Option<String>,
    format: AudioFormat,
    direction: DeviceDirection,
    /// Bridge between `submit`/`capture` and the cpal callback. Occupied
    /// length doubles as the padding value.
    staging: Arc<Mutex<RingBuffer>>,
    failed: Arc<AtomicBool>,
    ready_tx: Sender<()>,
    ready_rx: Receiver<()>,
    holder: Option<StreamHolder>,
}

impl CpalEventEndpoint {
    fn check(&self) -> Result<()> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(AudioError::endpoint("stream failed"));
        }
        Ok(())
    }
}

impl EventEndpoint for CpalEventEndpoint {
    fn buffer_frames(&self) -> u32 {
        self.format.buffer_frames
    }

    fn current_padding(&self) -> Result<u32> {
        self.check()?;
        Ok(self.staging.lock().available_data() as u32)
    }

    fn submit(&mut self, samples: &[f32]) -> Result<()> {
        if self.direction != DeviceDirection::Output {
            return Err(AudioError::invalid_state("submit on an input endpoint"));
        }
        self.check()?;
        let mut staging = self.staging.lock();
        let want = samples.len() / staging.channels();
        let wrote = staging.write(samples);
        if wrote < want {
            debug!(dropped = want - wrote, "staging ring full, frames dropped");
        }
        Ok(())
    }

    fn capture(&mut self, out: &mut [f32]) -> Result<usize> {
        if self.direction != DeviceDirection::Input {
            return Err(AudioError::invalid_state("capture on an output endpoint"));
        }
        self.check()?;
        Ok(self.staging.lock().read(out))
    }

    fn ready_signal(&self) -> Receiver<()> {
        self.ready_rx.clone()
    }

    fn start(&mut self) -> Result<()> {
        if self.holder.is_some() {
            return Ok(());
        }
        self.check()?;
        let name = self.name.clone();
        let format = self.format;
        let direction = self.direction;
        let staging = Arc::clone(&self.staging);
        let failed = Arc::clone(&self.failed);
        let ready_tx = self.ready_tx.clone();
        let holder = spawn_holder(
            move |stop_rx, result_tx| {
                hold_event_stream(name, format, direction, staging, failed, ready_tx, stop_rx, result_tx)
            },
            &self.failed,
        )?;
        self.holder = Some(holder);
        Ok(())
    }

    fn stop(&mut self) {
        stop_holder(self.holder.take());
    }

    fn healthy(&self) -> bool {
        self.holder.is_some() && !self.failed.load(Ordering::SeqCst)
    }
}

impl Drop for CpalEventEndpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn hold_event_stream(
    name: Option<String>,
    format: AudioFormat,
    direction: DeviceDirection,
    staging: Arc<Mutex<RingBuffer>>,
    failed: Arc<AtomicBool>,
    ready_tx: Sender<()>,
    stop_rx: Receiver<()>,
    result_tx: Sender<Result<()>>,
) {
    let built = build_event_stream(name, &format, direction, staging, &failed, ready_tx);
    match built {
        Ok(stream) => {
            if let Err(e) = stream.play() {
                failed.store(true, Ordering::SeqCst);
                let _ = result_tx.send(Err(AudioError::endpoint(format!("play failed: {e}"))));
                return;
            }
            let _ = result_tx.send(Ok(()));
            // Parked here until stop; the stream dies with this thread.
            let _ = stop_rx.recv();
        }
        Err(e) => {
            failed.store(true, Ordering::SeqCst);
            let _ = result_tx.send(Err(e));
        }
    }
}

fn build_event_stream(
    name: Option<String>,
    format: &AudioFormat,
    direction: DeviceDirection,
    staging: Arc<Mutex<RingBuffer>>,
    failed: &Arc<AtomicBool>,
    ready_tx: Sender<()>,
) -> Result<cpal::Stream> {
    let device = find_device(name.as_deref(), direction)?;
    let config = stream_config(format);
    let err_failed = Arc::clone(failed);
    let err_fn = move |e| {
        error!("cpal stream error: {e}");
        err_failed.store(true, Ordering::SeqCst);
    };
    match direction {
        DeviceDirection::Output => {
            let quarter_frames = (format.buffer_frames / 4).max(1) as usize;
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _| {
                        let mut staging = staging.lock();
                        let frames = staging.read(data);
                        let filled = frames * staging.channels();
                        data[filled..].fill(0.0);
                        if staging.available_space() >= quarter_frames {
                            let _ = ready_tx.try_send(());
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| AudioError::endpoint(format!("output stream build failed: {e}")))
        }
        DeviceDirection::Input => device
            .build_input_stream(
                &config,
                move |data: &[f32], _| {
                    let mut staging = staging.lock();
                    let wrote = staging.write(data);
                    if wrote * staging.channels() < data.len() {
                        debug!("capture staging full, frames dropped");
                    }
                    let _ = ready_tx.try_send(());
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::endpoint(format!("input stream build failed: {e}"))),
    }
}

// ---------------------------------------------------------------------------
// Polling endpoint
// ---------------------------------------------------------------------------

struct CpalPollingEndpoint {
    name: Option<String>,
    format: AudioFormat,
    direction: DeviceDirection,
    /// Looping buffer the cpal callback plays from (output) or captures
    /// into (input).
    loop_buffer: Arc<Mutex<Vec<f32>>>,
    /// Sample offset the cpal callback has reached, wrapping at the
    /// buffer length.
    play_cursor: Arc<AtomicU32>,
    /// Emulated write-cursor lead over the play cursor, in samples.
    lead: u32,
    failed: Arc<AtomicBool>,
    holder: Option<StreamHolder>,
}

impl CpalPollingEndpoint {
    fn check(&self) -> Result<()> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(AudioError::endpoint("stream failed"));
        }
        Ok(())
    }

    fn len(&self) -> u32 {
        self.loop_buffer.lock().len() as u32
    }
}

impl PollingEndpoint for CpalPollingEndpoint {
    fn buffer_samples(&self) -> u32 {
        self.len()
    }

    fn cursors(&self) -> Result<(u32, u32)> {
        self.check()?;
        let len = self.len();
        let play = self.play_cursor.load(Ordering::Acquire);
        Ok((play, (play + self.lead) % len))
    }

    fn write_span(&mut self, offset: u32, samples: &[f32]) -> Result<()> {
        if self.direction != DeviceDirection::Output {
            return Err(AudioError::invalid_state("write_span on an input endpoint"));
        }
        self.check()?;
        let mut buffer = self.loop_buffer.lock();
        copy_wrapping_into(&mut buffer, offset as usize, samples);
        Ok(())
    }

    fn read_span(&mut self, offset: u32, out: &mut [f32]) -> Result<()> {
        if self.direction != DeviceDirection::Input {
            return Err(AudioError::invalid_state("read_span on an output endpoint"));
        }
        self.check()?;
        let buffer = self.loop_buffer.lock();
        copy_wrapping_from(&buffer, offset as usize, out);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.holder.is_some() {
            return Ok(());
        }
        self.check()?;
        let name = self.name.clone();
        let format = self.format;
        let direction = self.direction;
        let loop_buffer = Arc::clone(&self.loop_buffer);
        let play_cursor = Arc::clone(&self.play_cursor);
        let failed = Arc::clone(&self.failed);
        let holder = spawn_holder(
            move |stop_rx, result_tx| {
                hold_polling_stream(
                    name, format, direction, loop_buffer, play_cursor, failed, stop_rx, result_tx,
                )
            },
            &self.failed,
        )?;
        self.holder = Some(holder);
        Ok(())
    }

    fn stop(&mut self) {
        stop_holder(self.holder.take());
    }

    fn healthy(&self) -> bool {
        self.holder.is_some() && !self.failed.load(Ordering::SeqCst)
    }
}

impl Drop for CpalPollingEndpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn hold_polling_stream(
    name: Option<String>,
    format: AudioFormat,
    direction: DeviceDirection,
    loop_buffer: Arc<Mutex<Vec<f32>>>,
    play_cursor: Arc<AtomicU32>,
    failed: Arc<AtomicBool>,
    stop_rx: Receiver<()>,
    result_tx: Sender<Result<()>>,
) {
    let built = build_polling_stream(name, &format, direction, loop_buffer, play_cursor, &failed);
    match built {
        Ok(stream) => {
            if let Err(e) = stream.play() {
                failed.store(true, Ordering::SeqCst);
                let _ = result_tx.send(Err(AudioError::endpoint(format!("play failed: {e}"))));
                return;
            }
            let _ = result_tx.send(Ok(()));
            let _ = stop_rx.recv();
        }
        Err(e) => {
            failed.store(true, Ordering::SeqCst);
            let _ = result_tx.send(Err(e));
        }
    }
}

fn build_polling_stream(
    name: Option<String>,
    format: &AudioFormat,
    direction: DeviceDirection,
    loop_buffer: Arc<Mutex<Vec<f32>>>,
    play_cursor: Arc<AtomicU32>,
    failed: &Arc<AtomicBool>,
) -> Result<cpal::Stream> {
    let device = find_device(name.as_deref(), direction)?;
    let config = stream_config(format);
    let err_failed = Arc::clone(failed);
    let err_fn = move |e| {
        error!("cpal stream error: {e}");
        err_failed.store(true, Ordering::SeqCst);
    };
    match direction {
        DeviceDirection::Output => device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _| {
                    let buffer = loop_buffer.lock();
                    let cursor = play_cursor.load(Ordering::Acquire) as usize;
                    copy_wrapping_from(&buffer, cursor, data);
                    let next = (cursor + data.len()) % buffer.len();
                    play_cursor.store(next as u32, Ordering::Release);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::endpoint(format!("output stream build failed: {e}"))),
        DeviceDirection::Input => device
            .build_input_stream(
                &config,
                move |data: &[f32], _| {
                    let mut buffer = loop_buffer.lock();
                    let cursor = play_cursor.load(Ordering::Acquire) as usize;
                    copy_wrapping_into(&mut buffer, cursor, data);
                    let next = (cursor + data.len()) % buffer.len();
                    play_cursor.store(next as u32, Ordering::Release);
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioError::endpoint(format!("input stream build failed: {e}"))),
    }
}

/// Copies `samples` into the loop buffer at `offset`, wrapping as often
/// as needed. A span longer than the buffer laps it; only the tail
/// survives, matching what the hardware would have played over.
fn copy_wrapping_into(buffer: &mut [f32], offset: usize, samples: &[f32]) {
    let len = buffer.len();
    if len == 0 {
        return;
    }
    let mut offset = offset % len;
    for chunk in samples.chunks(len) {
        let first = chunk.len().min(len - offset);
        buffer[offset..offset + first].copy_from_slice(&chunk[..first]);
        let rest = &chunk[first..];
        buffer[..rest.len()].copy_from_slice(rest);
        offset = (offset + chunk.len()) % len;
    }
}

/// Copies from the loop buffer at `offset` into `out`, wrapping as often
/// as needed.
fn copy_wrapping_from(buffer: &[f32], offset: usize, out: &mut [f32]) {
    let len = buffer.len();
    if len == 0 {
        out.fill(0.0);
        return;
    }
    let mut offset = offset % len;
    for chunk in out.chunks_mut(len) {
        let first = chunk.len().min(len - offset);
        chunk[..first].copy_from_slice(&buffer[offset..offset + first]);
        let rest_len = chunk.len() - first;
        chunk[first..].copy_from_slice(&buffer[..rest_len]);
        offset = (offset + chunk.len()) % len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_copies() {
        let mut buffer = vec![0.0_f32; 6];
        copy_wrapping_into(&mut buffer, 4, &[1.0, 2.0, 3.0]);
        assert_eq!(buffer, vec![3.0, 0.0, 0.0, 0.0, 1.0, 2.0]);

        let mut out = [0.0_f32; 3];
        copy_wrapping_from(&buffer, 4, &mut out);
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_wrapping_copies_longer_than_buffer_lap_it() {
        // A span that laps the loop twice: only the tail may survive, at
        // the positions the cursor would have reached.
        let mut buffer = vec![0.0_f32; 4];
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        copy_wrapping_into(&mut buffer, 2, &samples);
        assert_eq!(buffer, vec![6.0, 7.0, 8.0, 9.0]);

        let mut out = [0.0_f32; 10];
        copy_wrapping_from(&buffer, 2, &mut out);
        assert_eq!(out, [8.0, 9.0, 6.0, 7.0, 8.0, 9.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn test_loop_buffer_covers_large_hardware_buffers() {
        // 200ms at 8kHz is 1600 frames, shorter than a 4096-frame
        // hardware buffer; the loop must stretch to hold two callbacks.
        let format = AudioFormat::new(8_000, 1, 4_096);
        assert_eq!(loop_buffer_frames(&format), 8_192);

        // Common low-latency case keeps the nominal 200ms window.
        let format = AudioFormat::new(48_000, 1, 480);
        assert_eq!(loop_buffer_frames(&format), 9_600);
    }

    #[test]
    fn test_named_device_lookup_fails_cleanly() {
        let host = CpalHost::new();
        let format = AudioFormat::default();
        let result = host.open_event(
            Some("no-such-device-cadenza"),
            &format,
            DeviceDirection::Output,
        );
        assert!(result.is_err());
    }
}
