//! Error taxonomy: every reportable fault kind with its default severity
//! and fallback strategy.

use serde::Serialize;

/// Faults the audio subsystem knows how to classify.
///
/// Each kind carries a fixed default [`Severity`] and [`FallbackStrategy`];
/// the strategy can be overridden per-kind at runtime through
/// [`ErrorReportingSystem::set_fallback_strategy`](crate::ErrorReportingSystem::set_fallback_strategy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Event-driven backend failed to initialize.
    PrimaryInitFailed,
    /// No usable endpoint was found for the event-driven backend.
    PrimaryDeviceNotFound,
    /// Requested audio format rejected by the endpoint.
    FormatNotSupported,
    /// Render thread could not keep the hardware buffer fed.
    BufferUnderrun,
    /// Endpoint went away while a stream was active.
    DeviceDisconnected,
    /// Endpoint session was invalidated and must be reopened.
    SessionExpired,
    /// Backend has no true pause; the stream was stopped instead.
    PauseUnsupported,
    /// Polling backend failed to initialize.
    SecondaryInitFailed,
    /// Polling backend lost its looping buffer contents.
    BufferLost,
    /// Every backend in the fallback chain failed.
    FallbackExhausted,
    /// An allocation the engine depends on could not be satisfied.
    AllocationFailed,
    /// A worker or render thread could not be spawned.
    ThreadCreationFailed,
    /// A synchronization primitive could not be created.
    LockCreationFailed,
    /// CPU lacks a SIMD feature the fast paths want.
    SimdUnavailable,
    /// The process lacks the privilege for a performance feature.
    PrivilegeDenied,
    /// Diagnostic trace provider could not be registered.
    TraceProviderFailed,
}

/// How bad a reported error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// What the reporter should do about an error, beyond recording it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FallbackStrategy {
    /// Record only.
    None,
    /// Switch to the alternative audio backend.
    AlternativeBackend,
    /// Keep running with reduced quality or performance.
    Degrade,
    /// Turn the failing feature off entirely.
    DisableFeature,
}

impl ErrorKind {
    /// Default severity used when a record of this kind is built.
    pub fn severity(self) -> Severity {
        match self {
            ErrorKind::AllocationFailed | ErrorKind::LockCreationFailed => Severity::Critical,
            ErrorKind::PrimaryInitFailed
            | ErrorKind::PrimaryDeviceNotFound
            | ErrorKind::SecondaryInitFailed
            | ErrorKind::FallbackExhausted
            | ErrorKind::DeviceDisconnected
            | ErrorKind::SessionExpired
            | ErrorKind::BufferLost
            | ErrorKind::ThreadCreationFailed => Severity::Error,
            ErrorKind::FormatNotSupported
            | ErrorKind::BufferUnderrun
            | ErrorKind::PauseUnsupported
            | ErrorKind::SimdUnavailable
            | ErrorKind::PrivilegeDenied
            | ErrorKind::TraceProviderFailed => Severity::Warning,
        }
    }

    /// Default fallback strategy for this kind.
    pub fn default_strategy(self) -> FallbackStrategy {
        match self {
            ErrorKind::PrimaryInitFailed | ErrorKind::PrimaryDeviceNotFound => {
                FallbackStrategy::AlternativeBackend
            }
            ErrorKind::SimdUnavailable
            | ErrorKind::PrivilegeDenied
            | ErrorKind::ThreadCreationFailed => FallbackStrategy::Degrade,
            ErrorKind::TraceProviderFailed => FallbackStrategy::DisableFeature,
            _ => FallbackStrategy::None,
        }
    }

    /// Canonical human-readable message for this kind.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::PrimaryInitFailed => "event-driven audio backend initialization failed",
            ErrorKind::PrimaryDeviceNotFound => "no endpoint available for event-driven backend",
            ErrorKind::FormatNotSupported => "audio format not supported by endpoint",
            ErrorKind::BufferUnderrun => "audio buffer underrun",
            ErrorKind::DeviceDisconnected => "audio endpoint disconnected",
            ErrorKind::SessionExpired => "audio session expired",
            ErrorKind::PauseUnsupported => "backend cannot pause, stream stopped instead",
            ErrorKind::SecondaryInitFailed => "polling audio backend initialization failed",
            ErrorKind::BufferLost => "polling backend buffer lost",
            ErrorKind::FallbackExhausted => "all audio backends failed",
            ErrorKind::AllocationFailed => "memory allocation failed",
            ErrorKind::ThreadCreationFailed => "thread creation failed",
            ErrorKind::LockCreationFailed => "lock creation failed",
            ErrorKind::SimdUnavailable => "required SIMD feature unavailable",
            ErrorKind::PrivilegeDenied => "insufficient privilege for performance feature",
            ErrorKind::TraceProviderFailed => "trace provider registration failed",
        }
    }

    /// Short identifier used in log lines and generated reports.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::PrimaryInitFailed => "PRIMARY_INIT_FAILED",
            ErrorKind::PrimaryDeviceNotFound => "PRIMARY_DEVICE_NOT_FOUND",
            ErrorKind::FormatNotSupported => "FORMAT_NOT_SUPPORTED",
            ErrorKind::BufferUnderrun => "BUFFER_UNDERRUN",
            ErrorKind::DeviceDisconnected => "DEVICE_DISCONNECTED",
            ErrorKind::SessionExpired => "SESSION_EXPIRED",
            ErrorKind::PauseUnsupported => "PAUSE_UNSUPPORTED",
            ErrorKind::SecondaryInitFailed => "SECONDARY_INIT_FAILED",
            ErrorKind::BufferLost => "BUFFER_LOST",
            ErrorKind::FallbackExhausted => "FALLBACK_EXHAUSTED",
            ErrorKind::AllocationFailed => "ALLOCATION_FAILED",
            ErrorKind::ThreadCreationFailed => "THREAD_CREATION_FAILED",
            ErrorKind::LockCreationFailed => "LOCK_CREATION_FAILED",
            ErrorKind::SimdUnavailable => "SIMD_UNAVAILABLE",
            ErrorKind::PrivilegeDenied => "PRIVILEGE_DENIED",
            ErrorKind::TraceProviderFailed => "TRACE_PROVIDER_FAILED",
        }
    }
}

impl Severity {
    pub fn name(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}
