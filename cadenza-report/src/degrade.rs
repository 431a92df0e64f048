//! Graceful degradation state and capability probing.

use serde::Serialize;

/// Multiplier applied to `performance_scale_factor` when the engine falls
/// back to the alternative audio backend.
pub const BACKEND_SWITCH_SCALE: f32 = 0.9;
/// Multiplier applied when SIMD fast paths are turned off.
pub const FAST_PATH_DISABLE_SCALE: f32 = 0.8;
/// Multiplier applied when large allocations are disabled.
pub const LARGE_ALLOC_DISABLE_SCALE: f32 = 0.95;
/// Amount `performance_scale_factor` is raised per recovery attempt.
pub const RECOVERY_STEP: f32 = 0.1;

/// What the engine has turned off or scaled down to keep running.
///
/// Only mutated by the owning [`ErrorReportingSystem`](crate::ErrorReportingSystem)
/// while its lock is held; callers get snapshots by value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DegradationState {
    /// Running on the polling backend instead of the event-driven one.
    pub audio_quality_reduced: bool,
    /// SIMD fast paths are off.
    pub fast_path_disabled: bool,
    /// Worker concurrency is capped after a thread spawn failure.
    pub concurrency_limited: bool,
    /// Large allocations are off.
    pub large_alloc_disabled: bool,
    /// Diagnostic tracing is off.
    pub diagnostics_disabled: bool,
    /// Overall performance multiplier, always within `[0.0, 1.0]`.
    pub performance_scale_factor: f32,
}

impl Default for DegradationState {
    fn default() -> Self {
        DegradationState {
            audio_quality_reduced: false,
            fast_path_disabled: false,
            concurrency_limited: false,
            large_alloc_disabled: false,
            diagnostics_disabled: false,
            performance_scale_factor: 1.0,
        }
    }
}

impl DegradationState {
    /// True if anything is currently scaled down or turned off.
    pub fn is_degraded(&self) -> bool {
        self.audio_quality_reduced
            || self.fast_path_disabled
            || self.concurrency_limited
            || self.large_alloc_disabled
            || self.diagnostics_disabled
            || self.performance_scale_factor < 1.0
    }

    /// Applies `factor` to the scale factor, keeping it within `[0.0, 1.0]`.
    pub(crate) fn scale_by(&mut self, factor: f32) {
        self.performance_scale_factor = (self.performance_scale_factor * factor).clamp(0.0, 1.0);
    }

    /// One recovery step: raise the scale factor and clear flags whose
    /// underlying capability is now available again.
    ///
    /// Returns true if anything changed.
    pub(crate) fn recover_step(&mut self, probe: &dyn CapabilityProbe) -> bool {
        let before = *self;
        self.performance_scale_factor =
            (self.performance_scale_factor + RECOVERY_STEP).clamp(0.0, 1.0);
        if self.fast_path_disabled && probe.has_feature(Feature::FastPath) {
            self.fast_path_disabled = false;
        }
        if self.large_alloc_disabled && probe.has_feature(Feature::LargeAllocations) {
            self.large_alloc_disabled = false;
        }
        if self.diagnostics_disabled && probe.has_feature(Feature::DiagnosticLogging) {
            self.diagnostics_disabled = false;
        }
        *self != before
    }
}

/// Capabilities the recovery path re-checks before clearing a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    FastPath,
    LargeAllocations,
    DiagnosticLogging,
}

/// Answers "is this capability available right now?".
///
/// The production implementation is [`SystemProbe`]; tests substitute their
/// own to drive recovery deterministically.
pub trait CapabilityProbe: Send + Sync {
    fn has_feature(&self, feature: Feature) -> bool;
}

/// Probes the actual host.
#[derive(Debug, Default)]
pub struct SystemProbe;

impl CapabilityProbe for SystemProbe {
    fn has_feature(&self, feature: Feature) -> bool {
        match feature {
            Feature::FastPath => {
                #[cfg(target_arch = "x86_64")]
                {
                    std::arch::is_x86_feature_detected!("avx2")
                }
                #[cfg(target_arch = "aarch64")]
                {
                    // NEON is baseline on aarch64.
                    true
                }
                #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
                {
                    false
                }
            }
            Feature::LargeAllocations => true,
            Feature::DiagnosticLogging => true,
        }
    }
}
