//! Error records and aggregate statistics.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::kind::{ErrorKind, FallbackStrategy, Severity};

/// Where in the codebase an error was reported from.
///
/// Filled in by the [`report_error!`](crate::report_error) macro with
/// `module_path!()` and `line!()`; the function name is supplied by the
/// call site.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Origin {
    pub module: &'static str,
    pub function: &'static str,
    pub line: u32,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} ({})", self.module, self.line, self.function)
    }
}

/// One reported error, fully classified.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    /// OS error code at the report site, if any.
    pub os_code: Option<i64>,
    /// Backend-specific status code, if any.
    pub status_code: Option<i64>,
    pub severity: Severity,
    /// Strategy that was in effect when the record was built.
    pub strategy: FallbackStrategy,
    /// Canonical message for [`ErrorRecord::kind`].
    pub message: &'static str,
    /// Free-form detail from the report site.
    pub detail: String,
    pub origin: Origin,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    /// Formats the record the way the error log file does.
    pub fn log_line(&self) -> String {
        let mut line = format!(
            "[{}] {} - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.severity.name(),
            self.kind.name(),
        );
        if let Some(os) = self.os_code {
            line.push_str(&format!(", os_code={os}"));
        }
        if let Some(status) = self.status_code {
            line.push_str(&format!(", status=0x{status:08X}"));
        }
        line.push_str(&format!("\n  at {}\n  {}", self.origin, self.message));
        if !self.detail.is_empty() {
            line.push_str(&format!("\n  {}", self.detail));
        }
        line
    }
}

/// Counters accumulated across every call to
/// [`ErrorReportingSystem::report`](crate::ErrorReportingSystem::report).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorStatistics {
    pub total_errors: u64,
    pub critical_errors: u64,
    /// Registered fallback actions actually invoked.
    pub fallback_executions: u64,
    pub recovery_attempts: u64,
    pub successful_recoveries: u64,
    /// Kind reported most often so far, ties broken by first occurrence.
    pub most_frequent: Option<ErrorKind>,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ErrorRecord {
        ErrorRecord {
            kind: ErrorKind::BufferUnderrun,
            os_code: Some(5),
            status_code: Some(0x8889_0006),
            severity: ErrorKind::BufferUnderrun.severity(),
            strategy: FallbackStrategy::None,
            message: ErrorKind::BufferUnderrun.message(),
            detail: "padding 12 of 480 frames".to_string(),
            origin: Origin {
                module: "cadenza_audio::backend::event",
                function: "render_pass",
                line: 42,
            },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_log_line_contains_classification() {
        let line = sample_record().log_line();
        assert!(line.contains("WARNING"));
        assert!(line.contains("BUFFER_UNDERRUN"));
        assert!(line.contains("os_code=5"));
        assert!(line.contains("status=0x88890006"));
        assert!(line.contains("render_pass"));
        assert!(line.contains("padding 12 of 480 frames"));
    }

    #[test]
    fn test_log_line_omits_absent_codes() {
        let mut record = sample_record();
        record.os_code = None;
        record.status_code = None;
        let line = record.log_line();
        assert!(!line.contains("os_code"));
        assert!(!line.contains("status=0x"));
    }
}
