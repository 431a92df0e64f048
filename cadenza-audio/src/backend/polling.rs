//! Polling render backend.
//!
//! A worker thread wakes on a fixed tick, asks the endpoint for its
//! cursors and services the safe span of the looping buffer. Tolerant of
//! scheduling jitter and transient endpoint errors, at the cost of
//! latency; the fallback manager reaches for it when the event-driven
//! backend cannot start.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cadenza_report::{report_error, ErrorKind, ErrorReportingSystem};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::{info, warn};

use super::{
    consume_with_callback, fill_from_callback, Backend, BackendKind, RenderStats, SharedCallback,
};
use crate::endpoint::{DeviceDirection, PollingEndpoint};
use crate::error::{AudioError, Result};
use crate::format::AudioFormat;

/// Service tick period.
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Smallest span worth servicing, in milliseconds of audio.
const MIN_CHUNK_MS: u32 = 20;
/// Consecutive endpoint failures before the loop gives up.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;
/// Extra backoff after an endpoint failure.
const ERROR_BACKOFF: Duration = Duration::from_millis(50);
/// EMA weight kept from the previous average.
const AVG_KEEP: f64 = 0.9;
/// A tick slower than this gets logged.
const SLOW_TICK_MS: f64 = 15.0;
/// How long `stop` waits for the worker to hand the endpoint back.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

struct PollContext {
    callback: SharedCallback,
    reporter: Arc<ErrorReportingSystem>,
    stats: Arc<RenderStats>,
    channels: usize,
    direction: DeviceDirection,
    /// Spans below this many samples are left to accumulate.
    min_chunk_samples: u32,
}

/// Polling backend over one [`PollingEndpoint`].
pub struct PollingBackend {
    endpoint: Option<Box<dyn PollingEndpoint>>,
    callback: SharedCallback,
    reporter: Arc<ErrorReportingSystem>,
    format: AudioFormat,
    direction: DeviceDirection,
    stats: Arc<RenderStats>,
    stop_tx: Option<Sender<()>>,
    done_rx: Option<Receiver<Box<dyn PollingEndpoint>>>,
    running: bool,
}

impl PollingBackend {
    pub fn new(
        endpoint: Box<dyn PollingEndpoint>,
        format: AudioFormat,
        direction: DeviceDirection,
        callback: SharedCallback,
        reporter: Arc<ErrorReportingSystem>,
    ) -> Self {
        PollingBackend {
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

impl Backend for PollingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Polling
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
        let (done_tx, done_rx) = bounded::<Box<dyn PollingEndpoint>>(1);
        let ctx = PollContext {
            callback: Arc::clone(&self.callback),
            reporter: Arc::clone(&self.reporter),
            stats: Arc::clone(&self.stats),
            channels: self.format.channels as usize,
            direction: self.direction,
            min_chunk_samples: self.format.frames_for_ms(MIN_CHUNK_MS)
                * self.format.channels as u32,
        };
        let spawned = std::thread::Builder::new()
            .name("cadenza-polling-render".into())
            .spawn(move || {
                let endpoint = run_polling_loop(endpoint, ctx, stop_rx);
                let _ = done_tx.send(endpoint);
            });
        if let Err(e) = spawned {
            report_error!(
                self.reporter,
                ErrorKind::ThreadCreationFailed,
                "start",
                "polling render thread: {e}"
            );
            return Err(AudioError::RenderThread(format!(
                "failed to spawn polling thread: {e}"
            )));
        }
        self.stop_tx = Some(stop_tx);
        self.done_rx = Some(done_rx);
        self.running = true;
        info!("polling backend started");
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
                info!("polling backend stopped");
                Ok(())
            }
            Err(_) => {
                warn!("polling thread did not exit within {JOIN_TIMEOUT:?}, detaching");
                Err(AudioError::RenderThread(
                    "polling thread did not exit in time".into(),
                ))
            }
        }
    }

    fn healthy(&self) -> bool {
        if self.running {
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

impl Drop for PollingBackend {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// The worker thread. Runs at normal priority; the tick budget absorbs
/// scheduling jitter. Returns the endpoint for reuse.
fn run_polling_loop(
    mut endpoint: Box<dyn PollingEndpoint>,
    ctx: PollContext,
    stop_rx: Receiver<()>,
) -> Box<dyn PollingEndpoint> {
    let len = endpoint.buffer_samples();
    let mut cursor: u32 = 0;
    let mut consecutive_errors: u32 = 0;
    let mut temp = vec![0.0_f32; len as usize];

    loop {
        match stop_rx.recv_timeout(POLL_INTERVAL) {
            Ok(_) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        let started = Instant::now();

        let (play, write) = match endpoint.cursors() {
            Ok(cursors) => cursors,
            Err(e) => {
                consecutive_errors += 1;
                warn!("cursor query failed ({consecutive_errors} consecutive): {e}");
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    report_error!(
                        ctx.reporter,
                        ErrorKind::BufferLost,
                        "run_polling_loop",
                        "{consecutive_errors} consecutive endpoint errors, stopping"
                    );
                    break;
                }
                std::thread::sleep(ERROR_BACKOFF);
                continue;
            }
        };
        consecutive_errors = 0;

        // Safe span runs from our cursor up to the boundary the hardware
        // publishes, wrapping at the buffer length.
        let bound = match ctx.direction {
            DeviceDirection::Output => write,
            DeviceDirection::Input => play,
        };
        let safe = (bound + len - cursor) % len;

        if safe >= ctx.min_chunk_samples {
            let frames = safe as usize / ctx.channels;
            let span = &mut temp[..frames * ctx.channels];
            let advance = span.len() as u32;
            let serviced = match ctx.direction {
                DeviceDirection::Output => {
                    fill_from_callback(&ctx.callback, span);
                    endpoint.write_span(cursor, span)
                }
                DeviceDirection::Input => endpoint.read_span(cursor, span).map(|()| {
                    consume_with_callback(&ctx.callback, span);
                }),
            };
            match serviced {
                Ok(()) => cursor = (cursor + advance) % len,
                Err(e) => {
                    consecutive_errors += 1;
                    warn!("span service failed ({consecutive_errors} consecutive): {e}");
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        report_error!(
                            ctx.reporter,
                            ErrorKind::BufferLost,
                            "run_polling_loop",
                            "{consecutive_errors} consecutive endpoint errors, stopping"
                        );
                        break;
                    }
                    std::thread::sleep(ERROR_BACKOFF);
                    continue;
                }
            }
            ctx.stats.set_padding((len - safe) / ctx.channels as u32);
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
        ctx.stats.update_avg(elapsed_ms, AVG_KEEP);
        if elapsed_ms > SLOW_TICK_MS {
            warn!(
                "slow polling tick: {elapsed_ms:.2}ms (avg {:.2}ms)",
                ctx.stats.avg_ms()
            );
        }
    }
    endpoint
}
