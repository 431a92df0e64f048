//! Backend selection with automatic fallback.
//!
//! Tries the event-driven backend first and drops to the polling backend
//! when it cannot start. Attempts are rate-limited: after the attempt
//! budget is spent, further initialization is refused until a cooldown
//! expires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cadenza_report::{report_error, ErrorKind, ErrorReportingSystem};
use tracing::{info, warn};

use crate::backend::event::EventBackend;
use crate::backend::polling::PollingBackend;
use crate::backend::{Backend, BackendKind, SharedCallback};
use crate::endpoint::{DeviceDirection, EndpointProvider};
use crate::error::{AudioError, Result};
use crate::format::AudioFormat;

/// Failed initializations tolerated before the cooldown gate closes.
pub const MAX_FALLBACK_ATTEMPTS: u32 = 3;
/// How long the gate stays closed.
pub const FALLBACK_COOLDOWN: Duration = Duration::from_millis(100);

/// Where the fallback chain currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    /// Nothing initialized yet.
    None,
    /// Event-driven backend running.
    PrimaryActive,
    /// Polling backend running after a fallback.
    SecondaryActive,
    /// Both backends failed.
    Failed,
}

/// Owns the active backend and the retry bookkeeping.
pub struct FallbackManager {
    provider: Arc<dyn EndpointProvider>,
    reporter: Arc<ErrorReportingSystem>,
    backend: Option<Box<dyn Backend>>,
    state: FallbackState,
    attempts: u32,
    max_attempts: u32,
    cooldown: Duration,
    last_attempt: Option<Instant>,
    /// Text of the most recent initialization failure, replayed by the
    /// cooldown gate.
    last_failure: Option<String>,
    auto_recovery: bool,
}

impl FallbackManager {
    pub fn new(provider: Arc<dyn EndpointProvider>, reporter: Arc<ErrorReportingSystem>) -> Self {
        FallbackManager {
            provider,
            reporter,
            backend: None,
            state: FallbackState::None,
            attempts: 0,
            max_attempts: MAX_FALLBACK_ATTEMPTS,
            cooldown: FALLBACK_COOLDOWN,
            last_attempt: None,
            last_failure: None,
            auto_recovery: true,
        }
    }

    /// Opens a backend for `format`, falling back from event-driven to
    /// polling. On success the backend is held but not started.
    pub fn init_with_fallback(
        &mut self,
        name: Option<&str>,
        format: &AudioFormat,
        direction: DeviceDirection,
        callback: SharedCallback,
    ) -> Result<()> {
        if self.attempts >= self.max_attempts {
            let expired = self
                .last_attempt
                .map(|at| at.elapsed() >= self.cooldown)
                .unwrap_or(true);
            if !expired {
                warn!("fallback attempt limit reached, waiting for cooldown");
                return Err(AudioError::FallbackCoolingDown(
                    self.last_failure
                        .clone()
                        .unwrap_or_else(|| "none recorded".into()),
                ));
            }
            info!("fallback cooldown expired, resetting attempt counter");
            self.attempts = 0;
        }

        match self.provider.open_event(name, format, direction) {
            Ok(endpoint) => {
                self.backend = Some(Box::new(EventBackend::new(
                    endpoint,
                    *format,
                    direction,
                    Arc::clone(&callback),
                    Arc::clone(&self.reporter),
                )));
                self.state = FallbackState::PrimaryActive;
                self.attempts = 0;
                info!("event-driven backend initialized");
                return Ok(());
            }
            Err(primary_err) => {
                self.last_attempt = Some(Instant::now());
                self.attempts += 1;
                self.last_failure = Some(primary_err.to_string());
                warn!(
                    "event-driven backend failed ({}), attempting polling fallback (attempt {}/{})",
                    primary_err, self.attempts, self.max_attempts
                );
                report_error!(
                    self.reporter,
                    ErrorKind::PrimaryInitFailed,
                    "init_with_fallback",
                    "{primary_err}"
                );

                match self.provider.open_polling(name, format, direction) {
                    Ok(endpoint) => {
                        self.backend = Some(Box::new(PollingBackend::new(
                            endpoint,
                            *format,
                            direction,
                            callback,
                            Arc::clone(&self.reporter),
                        )));
                        self.state = FallbackState::SecondaryActive;
                        info!("polling backend initialized after fallback");
                        Ok(())
                    }
                    Err(secondary_err) => {
                        self.backend = None;
                        self.state = FallbackState::Failed;
                        self.last_failure = Some(format!(
                            "event: {primary_err}; polling: {secondary_err}"
                        ));
                        report_error!(
                            self.reporter,
                            ErrorKind::FallbackExhausted,
                            "init_with_fallback",
                            "event: {primary_err}; polling: {secondary_err}"
                        );
                        Err(AudioError::BackendUnavailable(format!(
                            "event: {primary_err}; polling: {secondary_err}"
                        )))
                    }
                }
            }
        }
    }

    /// Health probe of the active backend.
    pub fn check_status(&self) -> bool {
        match self.state {
            FallbackState::PrimaryActive | FallbackState::SecondaryActive => self
                .backend
                .as_ref()
                .map(|backend| backend.healthy())
                .unwrap_or(false),
            FallbackState::None | FallbackState::Failed => false,
        }
    }

    /// Tries to bring a healthy backend back after a failure, preferring
    /// the event-driven one. Returns the kind now active.
    pub fn attempt_recovery(
        &mut self,
        name: Option<&str>,
        format: &AudioFormat,
        direction: DeviceDirection,
        callback: SharedCallback,
    ) -> Result<BackendKind> {
        if !self.auto_recovery {
            return Err(AudioError::invalid_state("auto recovery disabled"));
        }
        if self.check_status() {
            return self
                .backend
                .as_ref()
                .map(|backend| backend.kind())
                .ok_or_else(|| AudioError::invalid_state("no backend"));
        }

        info!("attempting audio backend recovery");
        if let Some(mut dead) = self.backend.take() {
            let _ = dead.stop();
        }
        self.state = FallbackState::None;
        self.attempts = 0;
        self.init_with_fallback(name, format, direction, callback)?;
        if self.state == FallbackState::PrimaryActive {
            // Back on the preferred backend; undo the quality flag the
            // original fallback set.
            self.reporter.set_audio_quality_reduced(false);
        }
        if let Some(backend) = self.backend.as_mut() {
            backend.start()?;
            Ok(backend.kind())
        } else {
            Err(AudioError::invalid_state("recovery produced no backend"))
        }
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn auto_recovery(&self) -> bool {
        self.auto_recovery
    }

    pub fn set_auto_recovery(&mut self, enabled: bool) {
        self.auto_recovery = enabled;
        info!(
            "audio auto recovery {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Active backend, if the chain holds one.
    pub fn backend_mut(&mut self) -> Option<&mut dyn Backend> {
        self.backend
            .as_mut()
            .map(|backend| backend.as_mut() as &mut dyn Backend)
    }

    pub fn backend(&self) -> Option<&dyn Backend> {
        self.backend
            .as_ref()
            .map(|backend| backend.as_ref() as &dyn Backend)
    }

    /// Drops the active backend after stopping it.
    pub fn release(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            let _ = backend.stop();
        }
        self.state = FallbackState::None;
    }

    /// Human-readable status block for diagnostics.
    pub fn status_summary(&self) -> String {
        let backend = match self.backend.as_ref().map(|b| b.kind()) {
            Some(BackendKind::Event) => "event-driven",
            Some(BackendKind::Polling) => "polling",
            None => "none",
        };
        let state = match self.state {
            FallbackState::None => "uninitialized",
            FallbackState::PrimaryActive => "primary active",
            FallbackState::SecondaryActive => "secondary fallback",
            FallbackState::Failed => "failed",
        };
        format!(
            "audio fallback status:\n  backend: {backend}\n  state: {state}\n  attempts: {}/{}\n  auto recovery: {}\n",
            self.attempts,
            self.max_attempts,
            if self.auto_recovery { "on" } else { "off" },
        )
    }
}

impl std::fmt::Debug for FallbackManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackManager")
            .field("state", &self.state)
            .field("attempts", &self.attempts)
            .field("auto_recovery", &self.auto_recovery)
            .finish()
    }
}
