//! Event-driven render backend.
//!
//! A dedicated real-time thread waits on the endpoint's ready signal,
//! renders `buffer_frames - padding` frames per pass, and falls back to a
//! timed padding check when the signal goes quiet. This is the
//! lowest-latency path and the first one the fallback manager tries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cadenza_report::{report_error, ErrorKind, ErrorReportingSystem};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, info, warn};

use super::{
    consume_with_callback, fill_from_callback, Backend, BackendKind, RenderStats, SharedCallback,
};
use crate::endpoint::{DeviceDirection, EventEndpoint};
use crate::error::{AudioError, Result};
use crate::format::AudioFormat;
use crate::thread_priority::set_realtime_priority;

/// How long the render thread waits for a ready signal before checking
/// the padding on its own.
const WAIT_TIMEOUT: Duration = Duration::from_millis(100);
/// EMA weight kept from the previous average.
const AVG_KEEP: f64 = 0.95;
/// A render pass slower than this gets logged.
const SLOW_RENDER_MS: f64 = 10.0;
/// Buffer fills the hardware with this many passes before entering the
/// wait loop.
const PRIME_PASSES: u32 = 2;
/// How long `stop` waits for the render thread to hand the endpoint back.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

struct RenderContext {
    callback: SharedCallback,
    reporter: Arc<ErrorReportingSystem>,
    stats: Arc<RenderStats>,
    channels: usize,
    direction: DeviceDirection,
}

/// Event-driven backend over one [`EventEndpoint`].
pub struct EventBackend {
    endpoint: Option<Box<dyn EventEndpoint>>,
    callback: SharedCallback,
    reporter: Arc<ErrorReportingSystem>,
    format: AudioFormat,
    direction: DeviceDirection,
    stats: Arc<RenderStats>,
    stop_tx: Option<Sender<()>>,
    done_rx: Option<Receiver<Box<dyn EventEndpoint>>>,
    running: bool,
}

impl EventBackend {
    pub fn new(
        endpoint: Box<dyn EventEndpoint>,
        format: AudioFormat,
        direction: DeviceDirection,
        callback: SharedCallback,
        reporter: Arc<ErrorReportingSystem>,
    ) -> Self {
        EventBackend {
            endpoint: Some(endpoint),
            callback,
            reporter,
            format,
            direction,
            stats: RenderStats::new(),
            stop_tx: None,
            done_rx: None,
            running: false,
        }
    }
}

impl Backend for EventBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Event
    }

    fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        let mut endpoint = self.endpoint.take().ok_or_else(|| {
            AudioError::RenderThread("endpoint was not recovered from the previous run".into())
        })?;
        if let Err(e) = endpoint.start() {
            self.endpoint = Some(endpoint);
            return Err(e);
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<Box<dyn EventEndpoint>>(1);
        let ctx = RenderContext {
            callback: Arc::clone(&self.callback),
            reporter: Arc::clone(&self.reporter),
            stats: Arc::clone(&self.stats),
            channels: self.format.channels as usize,
            direction: self.direction,
        };
        let spawned = std::thread::Builder::new()
            .name("cadenza-event-render".into())
            .spawn(move || {
                let endpoint = run_event_loop(endpoint, ctx, stop_rx);
                let _ = done_tx.send(endpoint);
            });
        if let Err(e) = spawned {
            report_error!(
                self.reporter,
                ErrorKind::ThreadCreationFailed,
                "start",
                "event render thread: {e}"
            );
            return Err(AudioError::RenderThread(format!(
                "failed to spawn render thread: {e}"
            )));
        }
        self.stop_tx = Some(stop_tx);
        self.done_rx = Some(done_rx);
        self.running = true;
        info!("event backend started");
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        let Some(done_rx) = self.done_rx.take() else {
            return Ok(());
        };
        match done_rx.recv_timeout(JOIN_TIMEOUT) {
            Ok(mut endpoint) => {
                endpoint.stop();
                self.endpoint = Some(endpoint);
                info!("event backend stopped");
                Ok(())
            }
            Err(_) => {
                warn!("event render thread did not exit within {JOIN_TIMEOUT:?}, detaching");
                Err(AudioError::RenderThread(
                    "render thread did not exit in time".into(),
                ))
            }
        }
    }

    fn healthy(&self) -> bool {
        if self.running {
            // The thread sends the endpoint back right before exiting, so
            // a pending message means it died on its own.
            self.done_rx.as_ref().map(|rx| rx.is_empty()).unwrap_or(false)
        } else {
            self.endpoint.is_some()
        }
    }

    fn live_padding(&self) -> Option<u32> {
        self.stats.padding()
    }

    fn average_render_ms(&self) -> f64 {
        self.stats.avg_ms()
    }
}

impl Drop for EventBackend {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// The render thread. Returns the endpoint so the backend can reuse it.
fn run_event_loop(
    mut endpoint: Box<dyn EventEndpoint>,
    ctx: RenderContext,
    stop_rx: Receiver<()>,
) -> Box<dyn EventEndpoint> {
    let _ = set_realtime_priority();
    let total = endpoint.buffer_frames();
    let ready = endpoint.ready_signal();
    let mut temp = vec![0.0_f32; total as usize * ctx.channels];

    for _ in 0..PRIME_PASSES {
        if let Err(e) = render_pass(endpoint.as_mut(), &ctx, &mut temp, total) {
            report_error!(
                ctx.reporter,
                ErrorKind::DeviceDisconnected,
                "run_event_loop",
                "priming failed: {e}"
            );
            return endpoint;
        }
    }

    loop {
        select! {
            recv(stop_rx) -> _ => break,
            recv(ready) -> msg => {
                if msg.is_err() {
                    debug!("ready channel closed, exiting render loop");
                    break;
                }
                if let Err(e) = render_pass(endpoint.as_mut(), &ctx, &mut temp, total) {
                    report_error!(
                        ctx.reporter,
                        ErrorKind::DeviceDisconnected,
                        "run_event_loop",
                        "render pass failed: {e}"
                    );
                    break;
                }
            }
            default(WAIT_TIMEOUT) => {
                // No signal for a while; service the buffer ourselves if
                // it is draining.
                let padding = match endpoint.current_padding() {
                    Ok(p) => p,
                    Err(e) => {
                        report_error!(
                            ctx.reporter,
                            ErrorKind::SessionExpired,
                            "run_event_loop",
                            "padding query failed: {e}"
                        );
                        break;
                    }
                };
                if ctx.direction == DeviceDirection::Output && padding < total / 4 {
                    report_error!(
                        ctx.reporter,
                        ErrorKind::BufferUnderrun,
                        "run_event_loop",
                        "padding {padding} of {total} frames after signal timeout"
                    );
                }
                let should_service = match ctx.direction {
                    DeviceDirection::Output => padding < total / 2,
                    DeviceDirection::Input => padding > 0,
                };
                if should_service {
                    if let Err(e) = render_pass(endpoint.as_mut(), &ctx, &mut temp, total) {
                        report_error!(
                            ctx.reporter,
                            ErrorKind::DeviceDisconnected,
                            "run_event_loop",
                            "timeout render pass failed: {e}"
                        );
                        break;
                    }
                }
            }
        }
    }
    endpoint
}

/// One service pass. Output: fills `buffer_frames - padding` frames.
/// Input: drains whatever the endpoint has captured.
fn render_pass(
    endpoint: &mut dyn EventEndpoint,
    ctx: &RenderContext,
    temp: &mut [f32],
    total: u32,
) -> Result<u32> {
    let started = Instant::now();
    let padding = endpoint.current_padding()?;
    ctx.stats.set_padding(padding);

    let frames = match ctx.direction {
        DeviceDirection::Output => {
            let available = total.saturating_sub(padding);
            // Not worth waking the callback for a sliver of buffer.
            if available < total / 4 {
                return Ok(0);
            }
            let span = &mut temp[..available as usize * ctx.channels];
            fill_from_callback(&ctx.callback, span);
            endpoint.submit(span)?;
            available
        }
        DeviceDirection::Input => {
            if padding == 0 {
                return Ok(0);
            }
            let want = padding.min(total) as usize * ctx.channels;
            let got = endpoint.capture(&mut temp[..want])?;
            if got > 0 {
                consume_with_callback(&ctx.callback, &mut temp[..got * ctx.channels]);
            }
            got as u32
        }
    };

    let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
    ctx.stats.update_avg(elapsed_ms, AVG_KEEP);
    if elapsed_ms > SLOW_RENDER_MS {
        warn!(
            "slow render pass: {elapsed_ms:.2}ms for {frames} frames (avg {:.2}ms)",
            ctx.stats.avg_ms()
        );
    }
    Ok(frames)
}
