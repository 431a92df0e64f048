//! Error reporting and graceful degradation for the Cadenza voice engine
//!
//! Everything that can go wrong in the audio path funnels through one
//! [`ErrorReportingSystem`]: records are classified by [`ErrorKind`],
//! counted, optionally appended to a log file, and matched against a
//! registry of fallback actions that shift the engine into a degraded
//! but working configuration.
//!
//! # Features
//!
//! - Classified error records with origin, OS and backend status codes
//! - Per-kind default severities and fallback strategies, overridable
//! - Fallback registry (up to 64 kinds) whose actions mutate the
//!   degradation state atomically with the record
//! - Aggregate statistics: totals, criticals, executions, recoveries,
//!   most frequent kind
//! - File logging and on-demand report generation
//! - [`DegradationState`] with a bounded performance scale factor and
//!   probe-driven recovery
//!
//! # Example
//!
//! ```no_run
//! use cadenza_report::{report_error, ErrorKind, ErrorReportingSystem};
//!
//! let reporter = ErrorReportingSystem::new();
//! reporter.register_default_fallbacks().unwrap();
//!
//! report_error!(reporter, ErrorKind::PrimaryInitFailed, "open_output",
//!               "endpoint rejected shared mode");
//!
//! let state = reporter.degradation_state();
//! assert!(state.audio_quality_reduced);
//! ```

pub mod degrade;
pub mod error;
pub mod kind;
pub mod record;
pub mod system;

pub use degrade::{CapabilityProbe, DegradationState, Feature, SystemProbe};
pub use error::{ReportError, Result};
pub use kind::{ErrorKind, FallbackStrategy, Severity};
pub use record::{ErrorRecord, ErrorStatistics, Origin};
pub use system::{ErrorCallback, ErrorReportingSystem, FallbackAction, MAX_FALLBACK_ENTRIES};
