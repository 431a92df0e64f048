//! The error reporting system: one lock, a fallback registry, statistics,
//! optional file logging and report generation.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::degrade::{
    CapabilityProbe, DegradationState, Feature, SystemProbe, BACKEND_SWITCH_SCALE,
    FAST_PATH_DISABLE_SCALE, LARGE_ALLOC_DISABLE_SCALE,
};
use crate::error::{ReportError, Result};
use crate::kind::{ErrorKind, FallbackStrategy, Severity};
use crate::record::{ErrorRecord, ErrorStatistics, Origin};

/// Most fallback registrations the registry will hold.
pub const MAX_FALLBACK_ENTRIES: usize = 64;

/// A fallback action. Runs with the reporter lock held and may mutate the
/// degradation state directly; must not call back into the reporter.
/// Returns true if the action considers the fault recovered.
pub type FallbackAction =
    Box<dyn FnMut(ErrorKind, &mut DegradationState) -> bool + Send + 'static>;

/// Observer invoked after each record is committed, outside the lock.
pub type ErrorCallback = Box<dyn Fn(&ErrorRecord) + Send + 'static>;

struct FallbackEntry {
    kind: ErrorKind,
    strategy: FallbackStrategy,
    action: Option<FallbackAction>,
}

#[derive(Default)]
struct Inner {
    last_error: Option<ErrorRecord>,
    stats: ErrorStatistics,
    kind_counts: HashMap<ErrorKind, u64>,
    registry: Vec<FallbackEntry>,
    degradation: DegradationState,
    log_file: Option<(PathBuf, File)>,
}

/// Central sink for every classified fault in the engine.
///
/// All state lives behind a single mutex: record bookkeeping, statistics,
/// the fallback registry and the degradation state are updated atomically
/// with respect to each other. Cloneable via `Arc` and shared across the
/// device, backend and render threads.
pub struct ErrorReportingSystem {
    inner: Mutex<Inner>,
    // Kept outside the inner lock so an observer can query the reporter.
    callback: Mutex<Option<ErrorCallback>>,
    probe: Arc<dyn CapabilityProbe>,
}

impl Default for ErrorReportingSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorReportingSystem {
    pub fn new() -> Self {
        Self::with_probe(Arc::new(SystemProbe))
    }

    /// Builds a reporter whose recovery path consults `probe` instead of
    /// the real host.
    pub fn with_probe(probe: Arc<dyn CapabilityProbe>) -> Self {
        ErrorReportingSystem {
            inner: Mutex::new(Inner::default()),
            callback: Mutex::new(None),
            probe,
        }
    }

    /// Registers the built-in fallback actions for the kinds whose default
    /// strategy is not [`FallbackStrategy::None`].
    pub fn register_default_fallbacks(&self) -> Result<()> {
        self.register_fallback(
            ErrorKind::PrimaryInitFailed,
            Box::new(|_, state: &mut DegradationState| {
                state.audio_quality_reduced = true;
                state.scale_by(BACKEND_SWITCH_SCALE);
                true
            }),
        )?;
        self.register_fallback(
            ErrorKind::PrimaryDeviceNotFound,
            Box::new(|_, state: &mut DegradationState| {
                state.audio_quality_reduced = true;
                state.scale_by(BACKEND_SWITCH_SCALE);
                true
            }),
        )?;
        self.register_fallback(
            ErrorKind::SimdUnavailable,
            Box::new(|_, state: &mut DegradationState| {
                state.fast_path_disabled = true;
                state.scale_by(FAST_PATH_DISABLE_SCALE);
                true
            }),
        )?;
        self.register_fallback(
            ErrorKind::PrivilegeDenied,
            Box::new(|_, state: &mut DegradationState| {
                state.large_alloc_disabled = true;
                state.scale_by(LARGE_ALLOC_DISABLE_SCALE);
                true
            }),
        )?;
        self.register_fallback(
            ErrorKind::ThreadCreationFailed,
            Box::new(|_, state: &mut DegradationState| {
                state.concurrency_limited = true;
                true
            }),
        )?;
        self.register_fallback(
            ErrorKind::TraceProviderFailed,
            Box::new(|_, state: &mut DegradationState| {
                state.diagnostics_disabled = true;
                true
            }),
        )?;
        Ok(())
    }

    /// Reports an error: classifies it, updates statistics, appends to the
    /// log file if enabled, runs the matching fallback action, then invokes
    /// the observer callback. Returns the committed record.
    pub fn report(
        &self,
        kind: ErrorKind,
        os_code: Option<i64>,
        status_code: Option<i64>,
        origin: Origin,
        detail: String,
    ) -> ErrorRecord {
        let record = {
            let mut inner = self.inner.lock();

            let strategy = inner
                .registry
                .iter()
                .find(|entry| entry.kind == kind)
                .map(|entry| entry.strategy)
                .unwrap_or_else(|| kind.default_strategy());

            let record = ErrorRecord {
                kind,
                os_code,
                status_code,
                severity: kind.severity(),
                strategy,
                message: kind.message(),
                detail,
                origin,
                timestamp: Utc::now(),
            };

            inner.stats.total_errors += 1;
            if record.severity == Severity::Critical {
                inner.stats.critical_errors += 1;
            }
            inner.stats.last_error_at = Some(record.timestamp);
            let count = inner.kind_counts.entry(kind).or_insert(0);
            *count += 1;
            let count = *count;
            let best = inner
                .stats
                .most_frequent
                .and_then(|k| inner.kind_counts.get(&k).copied())
                .unwrap_or(0);
            if count > best {
                inner.stats.most_frequent = Some(kind);
            }

            match record.severity {
                Severity::Critical | Severity::Error => {
                    error!(kind = kind.name(), origin = %record.origin, "{}: {}", record.message, record.detail)
                }
                Severity::Warning => {
                    warn!(kind = kind.name(), origin = %record.origin, "{}: {}", record.message, record.detail)
                }
                Severity::Info => {
                    info!(kind = kind.name(), origin = %record.origin, "{}: {}", record.message, record.detail)
                }
            }

            if let Some((path, file)) = inner.log_file.as_mut() {
                if let Err(e) = writeln!(file, "{}", record.log_line()) {
                    warn!("failed to append to error log {}: {e}", path.display());
                }
            }

            if record.strategy != FallbackStrategy::None {
                Self::run_fallback(&mut inner, kind);
            }

            inner.last_error = Some(record.clone());
            record
        };

        if let Some(cb) = self.callback.lock().as_ref() {
            cb(&record);
        }
        record
    }

    fn run_fallback(inner: &mut Inner, kind: ErrorKind) -> Option<bool> {
        // Split borrow: the action gets the degradation state, not the
        // whole inner, so it cannot touch the registry it lives in.
        let Inner {
            registry,
            degradation,
            stats,
            ..
        } = inner;
        let entry = registry.iter_mut().find(|entry| entry.kind == kind)?;
        let action = entry.action.as_mut()?;
        stats.fallback_executions += 1;
        let recovered = action(kind, degradation);
        if recovered {
            debug!(kind = kind.name(), "fallback action recovered");
        } else {
            warn!(kind = kind.name(), "fallback action did not recover");
        }
        Some(recovered)
    }

    /// Registers (or replaces) the fallback action for `kind`.
    ///
    /// The registry holds at most [`MAX_FALLBACK_ENTRIES`] distinct kinds.
    pub fn register_fallback(&self, kind: ErrorKind, action: FallbackAction) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.registry.iter_mut().find(|entry| entry.kind == kind) {
            entry.action = Some(action);
            return Ok(());
        }
        if inner.registry.len() >= MAX_FALLBACK_ENTRIES {
            return Err(ReportError::RegistryFull {
                capacity: MAX_FALLBACK_ENTRIES,
            });
        }
        inner.registry.push(FallbackEntry {
            kind,
            strategy: kind.default_strategy(),
            action: Some(action),
        });
        Ok(())
    }

    /// Runs the registered fallback action for `kind` outside of a report.
    /// Returns whether the action considered the fault recovered.
    pub fn execute_fallback(&self, kind: ErrorKind) -> Result<bool> {
        let mut inner = self.inner.lock();
        Self::run_fallback(&mut inner, kind).ok_or(ReportError::NoFallback { kind })
    }

    /// Overrides the strategy attached to future records of `kind`.
    ///
    /// Shares the registry (and its [`MAX_FALLBACK_ENTRIES`] bound) with
    /// [`register_fallback`](Self::register_fallback).
    pub fn set_fallback_strategy(&self, kind: ErrorKind, strategy: FallbackStrategy) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.registry.iter_mut().find(|entry| entry.kind == kind) {
            entry.strategy = strategy;
            return Ok(());
        }
        if inner.registry.len() >= MAX_FALLBACK_ENTRIES {
            return Err(ReportError::RegistryFull {
                capacity: MAX_FALLBACK_ENTRIES,
            });
        }
        inner.registry.push(FallbackEntry {
            kind,
            strategy,
            action: None,
        });
        Ok(())
    }

    /// Installs the observer invoked after each committed record.
    pub fn set_error_callback(&self, callback: ErrorCallback) {
        *self.callback.lock() = Some(callback);
    }

    pub fn clear_error_callback(&self) {
        *self.callback.lock() = None;
    }

    /// The most recently committed record, if any.
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.inner.lock().last_error.clone()
    }

    pub fn clear_last_error(&self) {
        self.inner.lock().last_error = None;
    }

    /// Snapshot of the aggregate counters.
    pub fn statistics(&self) -> ErrorStatistics {
        self.inner.lock().stats.clone()
    }

    /// Zeroes every counter. Leaves the registry and degradation state alone.
    pub fn reset_statistics(&self) {
        let mut inner = self.inner.lock();
        inner.stats = ErrorStatistics::default();
        inner.kind_counts.clear();
    }

    /// Starts appending every record to the file at `path`.
    pub fn enable_logging<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(
            file,
            "=== error log opened {} ===",
            Utc::now().format("%Y-%m-%d %H:%M:%S")
        )?;
        self.inner.lock().log_file = Some((path, file));
        Ok(())
    }

    pub fn disable_logging(&self) {
        self.inner.lock().log_file = None;
    }

    /// Writes a human-readable summary of statistics, degradation state and
    /// the last error to `path`.
    pub fn generate_report<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let inner = self.inner.lock();
        let mut file = File::create(path.as_ref())?;

        writeln!(file, "=== Cadenza error report ===")?;
        writeln!(file, "generated: {}", Utc::now().format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(file)?;
        writeln!(file, "[statistics]")?;
        writeln!(file, "total errors:          {}", inner.stats.total_errors)?;
        writeln!(file, "critical errors:       {}", inner.stats.critical_errors)?;
        writeln!(file, "fallback executions:   {}", inner.stats.fallback_executions)?;
        writeln!(file, "recovery attempts:     {}", inner.stats.recovery_attempts)?;
        writeln!(file, "successful recoveries: {}", inner.stats.successful_recoveries)?;
        if let Some(kind) = inner.stats.most_frequent {
            let count = inner.kind_counts.get(&kind).copied().unwrap_or(0);
            writeln!(file, "most frequent:         {} ({count} times)", kind.name())?;
        }
        if let Some(at) = inner.stats.last_error_at {
            writeln!(file, "last error at:         {}", at.format("%Y-%m-%d %H:%M:%S%.3f"))?;
        }

        writeln!(file)?;
        writeln!(file, "[degradation]")?;
        let d = &inner.degradation;
        writeln!(file, "degraded:              {}", d.is_degraded())?;
        writeln!(file, "audio quality reduced: {}", d.audio_quality_reduced)?;
        writeln!(file, "fast path disabled:    {}", d.fast_path_disabled)?;
        writeln!(file, "concurrency limited:   {}", d.concurrency_limited)?;
        writeln!(file, "large alloc disabled:  {}", d.large_alloc_disabled)?;
        writeln!(file, "diagnostics disabled:  {}", d.diagnostics_disabled)?;
        writeln!(file, "performance scale:     {:.2}", d.performance_scale_factor)?;

        if let Some(record) = &inner.last_error {
            writeln!(file)?;
            writeln!(file, "[last error]")?;
            writeln!(file, "{}", record.log_line())?;
        }
        Ok(())
    }

    /// Logs a one-time description of the host for post-mortem context.
    pub fn log_system_info(&self) {
        info!(
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            family = std::env::consts::FAMILY,
            "host information"
        );
        info!(
            fast_path = self.probe.has_feature(Feature::FastPath),
            large_allocations = self.probe.has_feature(Feature::LargeAllocations),
            diagnostics = self.probe.has_feature(Feature::DiagnosticLogging),
            "capability probe"
        );
    }

    /// Snapshot of the degradation state.
    pub fn degradation_state(&self) -> DegradationState {
        self.inner.lock().degradation
    }

    /// Replaces the degradation state wholesale, clamping the scale factor
    /// into `[0.0, 1.0]`.
    pub fn apply_degradation(&self, mut state: DegradationState) {
        state.performance_scale_factor = state.performance_scale_factor.clamp(0.0, 1.0);
        let mut inner = self.inner.lock();
        inner.degradation = state;
        info!(
            degraded = state.is_degraded(),
            scale = state.performance_scale_factor,
            "degradation state applied"
        );
    }

    /// Marks the engine as running on the alternative backend again or not;
    /// used by the fallback manager when it recovers the primary backend.
    pub fn set_audio_quality_reduced(&self, reduced: bool) {
        self.inner.lock().degradation.audio_quality_reduced = reduced;
    }

    /// One recovery step: raises the performance scale and clears any flag
    /// whose capability the probe says is back. Returns true if anything
    /// changed.
    pub fn attempt_recovery(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.stats.recovery_attempts += 1;
        let changed = inner.degradation.recover_step(self.probe.as_ref());
        if changed {
            inner.stats.successful_recoveries += 1;
            info!(
                scale = inner.degradation.performance_scale_factor,
                "degradation recovery step applied"
            );
        }
        changed
    }
}

impl std::fmt::Debug for ErrorReportingSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ErrorReportingSystem")
            .field("stats", &inner.stats)
            .field("degradation", &inner.degradation)
            .field("registered_fallbacks", &inner.registry.len())
            .finish()
    }
}

/// Reports an error with the call site filled in.
///
/// ```ignore
/// report_error!(reporter, ErrorKind::BufferUnderrun, "render_pass",
///               "padding {} of {} frames", padding, total);
/// ```
#[macro_export]
macro_rules! report_error {
    ($reporter:expr, $kind:expr, $func:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        $reporter.report(
            $kind,
            None,
            None,
            $crate::Origin {
                module: module_path!(),
                function: $func,
                line: line!(),
            },
            format!($fmt $(, $arg)*),
        )
    };
}
