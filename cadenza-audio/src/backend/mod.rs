//! Render backends.
//!
//! Two strategies feed the endpoint: [`event::EventBackend`] waits for
//! hardware readiness signals, [`polling::PollingBackend`] services a
//! looping buffer on a fixed tick. The fallback manager tries them in
//! that order.

pub mod event;
pub mod polling;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::error::{AudioError, CallbackError, Result};

/// Caller-supplied sample callback.
///
/// Output: fills the interleaved buffer it is handed. Input: consumes the
/// captured samples in the buffer. Runs on the render thread, so it must
/// not block.
pub type SampleCallback =
    Box<dyn FnMut(&mut [f32]) -> std::result::Result<(), CallbackError> + Send + 'static>;

/// Callback slot shared between the device and the render thread. Swapping
/// the callback while the stream runs takes effect on the next pass.
pub type SharedCallback = Arc<Mutex<Option<SampleCallback>>>;

pub fn shared_callback_slot() -> SharedCallback {
    Arc::new(Mutex::new(None))
}

/// Which render strategy a backend uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Event-driven, lowest latency. Tried first.
    Event,
    /// Timer-driven polling. The fallback.
    Polling,
}

/// A running render strategy over one endpoint.
pub trait Backend: Send {
    fn kind(&self) -> BackendKind;

    /// Starts the render thread. Idempotent while running.
    fn start(&mut self) -> Result<()>;

    /// Signals the render thread and waits for it to hand the endpoint
    /// back. Idempotent while stopped.
    fn stop(&mut self) -> Result<()>;

    /// True pause, if the strategy supports one. Callers degrade to
    /// stop-and-restart when this returns [`AudioError::PauseUnsupported`].
    fn pause(&mut self) -> Result<()> {
        Err(AudioError::PauseUnsupported)
    }

    /// Health probe: is the render path still alive?
    fn healthy(&self) -> bool;

    /// Frames currently queued in the endpoint, if the backend knows.
    fn live_padding(&self) -> Option<u32>;

    /// Exponential moving average of render pass duration in milliseconds.
    fn average_render_ms(&self) -> f64;
}

/// Telemetry shared between a render thread and its backend handle.
pub(crate) struct RenderStats {
    avg_ms_bits: AtomicU64,
    last_padding: AtomicU32,
    has_padding: AtomicBool,
}

impl RenderStats {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(RenderStats {
            avg_ms_bits: AtomicU64::new(0.0_f64.to_bits()),
            last_padding: AtomicU32::new(0),
            has_padding: AtomicBool::new(false),
        })
    }

    pub(crate) fn update_avg(&self, sample_ms: f64, keep: f64) {
        let avg = f64::from_bits(self.avg_ms_bits.load(Ordering::Relaxed));
        let next = if avg == 0.0 {
            sample_ms
        } else {
            avg * keep + sample_ms * (1.0 - keep)
        };
        self.avg_ms_bits.store(next.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn avg_ms(&self) -> f64 {
        f64::from_bits(self.avg_ms_bits.load(Ordering::Relaxed))
    }

    pub(crate) fn set_padding(&self, padding: u32) {
        self.last_padding.store(padding, Ordering::Relaxed);
        self.has_padding.store(true, Ordering::Relaxed);
    }

    pub(crate) fn padding(&self) -> Option<u32> {
        if self.has_padding.load(Ordering::Relaxed) {
            Some(self.last_padding.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

/// Runs the callback to fill an output span. The span is zeroed first and
/// re-zeroed if the callback fails or panics, so the endpoint always
/// receives something playable.
pub(crate) fn fill_from_callback(callback: &SharedCallback, span: &mut [f32]) -> bool {
    span.fill(0.0);
    let mut slot = callback.lock();
    let Some(cb) = slot.as_mut() else {
        return true; // no callback registered, play silence
    };
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(span))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("sample callback error, span zero-filled: {e}");
            span.fill(0.0);
            false
        }
        Err(_) => {
            error!("sample callback panicked, span zero-filled");
            span.fill(0.0);
            false
        }
    }
}

/// Hands a captured span to the callback. Failures are logged and the
/// captured data dropped.
pub(crate) fn consume_with_callback(callback: &SharedCallback, span: &mut [f32]) -> bool {
    let mut slot = callback.lock();
    let Some(cb) = slot.as_mut() else {
        return true; // no consumer, captured data discarded
    };
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(span))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("capture callback error, span dropped: {e}");
            false
        }
        Err(_) => {
            error!("capture callback panicked, span dropped");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_without_callback_is_silence() {
        let slot = shared_callback_slot();
        let mut span = [0.7_f32; 4];
        assert!(fill_from_callback(&slot, &mut span));
        assert_eq!(span, [0.0; 4]);
    }

    #[test]
    fn test_failing_callback_zero_fills() {
        let slot = shared_callback_slot();
        *slot.lock() = Some(Box::new(|span: &mut [f32]| {
            span.fill(1.0);
            Err(CallbackError::new("synth not ready"))
        }));
        let mut span = [0.7_f32; 4];
        assert!(!fill_from_callback(&slot, &mut span));
        assert_eq!(span, [0.0; 4]);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let slot = shared_callback_slot();
        *slot.lock() = Some(Box::new(|_: &mut [f32]| panic!("boom")));
        let mut span = [0.7_f32; 4];
        assert!(!fill_from_callback(&slot, &mut span));
        assert_eq!(span, [0.0; 4]);
        // Slot still usable after the panic.
        assert!(!consume_with_callback(&slot, &mut span));
    }

    #[test]
    fn test_ema_warmup_takes_first_sample() {
        let stats = RenderStats::new();
        stats.update_avg(4.0, 0.95);
        assert!((stats.avg_ms() - 4.0).abs() < 1e-9);
        stats.update_avg(8.0, 0.95);
        assert!((stats.avg_ms() - (4.0 * 0.95 + 8.0 * 0.05)).abs() < 1e-9);
    }
}
