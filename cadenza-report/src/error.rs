//! Error types for the reporting crate itself.

use thiserror::Error;

use crate::kind::ErrorKind;

/// Faults of the reporter, as opposed to the faults it reports.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("fallback registry full ({capacity} entries)")]
    RegistryFull { capacity: usize },

    #[error("no fallback action registered for {kind:?}")]
    NoFallback { kind: ErrorKind },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;
