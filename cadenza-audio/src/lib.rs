//! Low-latency audio I/O for the Cadenza voice engine
//!
//! Opens output and input devices over the host's audio API, feeds them
//! from a caller-supplied callback or a lock-free ring buffer, and keeps
//! playback alive through backend fallback and graceful degradation.
//!
//! # Architecture
//!
//! ```text
//! AudioSubsystem
//!     └── AudioDevice ── SharedCallback ─┐
//!           │                            │
//!           │ RingBuffer (SPSC)          ▼
//!           │                     FallbackManager
//!           │                      ├── EventBackend ──► EventEndpoint
//!           │                      └── PollingBackend ► PollingEndpoint
//!           │                                                │
//!           └── ErrorReportingSystem ◄──── reports ──── CpalHost
//! ```
//!
//! # Features
//!
//! - Event-driven render loop with a 100ms signal timeout and underrun
//!   guard; polling fallback on a 10ms tick
//! - Automatic backend fallback with attempt limit and cooldown
//! - Frame-based SPSC ring buffer between caller and render thread
//! - Error reporting with per-kind fallback actions and degradation
//!   (via `cadenza-report`)
//! - Best-effort real-time priority for the render thread
//!
//! # Example
//!
//! ```no_run
//! use cadenza_audio::{AudioFormat, AudioSubsystem};
//!
//! let audio = AudioSubsystem::new().unwrap();
//! let format = AudioFormat::new(44_100, 1, 1_024);
//! let mut device = audio.open_output_device(None, &format).unwrap();
//!
//! device.set_callback(|span| {
//!     span.fill(0.0); // synth renders here
//!     Ok(())
//! });
//! device.start().unwrap();
//! ```

pub mod backend;
pub mod buffer;
pub mod device;
pub mod dsp;
pub mod endpoint;
pub mod error;
pub mod fallback;
pub mod format;
pub mod host;
pub mod thread_priority;

pub use backend::{Backend, BackendKind, SampleCallback, SharedCallback};
pub use buffer::RingBuffer;
pub use device::{AudioDevice, DeviceState};
pub use endpoint::{DeviceDirection, EndpointProvider, EventEndpoint, PollingEndpoint};
pub use error::{AudioError, CallbackError, Result};
pub use fallback::{FallbackManager, FallbackState, FALLBACK_COOLDOWN, MAX_FALLBACK_ATTEMPTS};
pub use format::AudioFormat;
pub use host::CpalHost;
pub use thread_priority::{set_realtime_priority, PriorityResult};

use std::sync::Arc;

use cadenza_report::ErrorReportingSystem;

/// Entry point owning the endpoint provider and the error reporter.
///
/// Every device opened through one subsystem shares the same reporter, so
/// statistics and degradation state cover the whole audio path.
pub struct AudioSubsystem {
    provider: Arc<dyn EndpointProvider>,
    reporter: Arc<ErrorReportingSystem>,
}

impl AudioSubsystem {
    /// Builds a subsystem over the host's default audio API with the
    /// default fallback actions registered.
    pub fn new() -> Result<Self> {
        let reporter = Arc::new(ErrorReportingSystem::new());
        reporter
            .register_default_fallbacks()
            .map_err(|e| AudioError::invalid_state(format!("fallback registry: {e}")))?;
        reporter.log_system_info();
        Ok(AudioSubsystem {
            provider: Arc::new(CpalHost::new()),
            reporter,
        })
    }

    /// Builds a subsystem over a custom provider and reporter. Used by
    /// embedders and tests.
    pub fn with_provider(
        provider: Arc<dyn EndpointProvider>,
        reporter: Arc<ErrorReportingSystem>,
    ) -> Self {
        AudioSubsystem { provider, reporter }
    }

    /// Opens an output device, `None` for the system default.
    pub fn open_output_device(
        &self,
        name: Option<&str>,
        format: &AudioFormat,
    ) -> Result<AudioDevice> {
        AudioDevice::open(
            Arc::clone(&self.provider),
            Arc::clone(&self.reporter),
            name,
            format,
            DeviceDirection::Output,
        )
    }

    /// Opens an input device, `None` for the system default.
    pub fn open_input_device(
        &self,
        name: Option<&str>,
        format: &AudioFormat,
    ) -> Result<AudioDevice> {
        AudioDevice::open(
            Arc::clone(&self.provider),
            Arc::clone(&self.reporter),
            name,
            format,
            DeviceDirection::Input,
        )
    }

    /// The shared error reporter.
    pub fn reporter(&self) -> &Arc<ErrorReportingSystem> {
        &self.reporter
    }
}

impl std::fmt::Debug for AudioSubsystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSubsystem")
            .field("reporter", &self.reporter)
            .finish()
    }
}
