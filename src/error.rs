//! Error types shared by the report parser and the configuration layer.
//!
//! Resolution never surfaces errors to callers (a miss is an empty list),
//! so only ingestion and configuration have error enums.

use std::path::PathBuf;
use thiserror::Error;

/// Why a TRX report could not be turned into outcomes.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("XML parse error at byte {position}: {message}")]
    Xml { position: usize, message: String },

    #[error("report has no <TestRun> root element")]
    MissingRoot,

    #[error("report is missing the <{0}> section")]
    MissingSection(&'static str),

    #[error("failed to read report {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ReportError {
    pub fn xml(position: usize, message: impl Into<String>) -> Self {
        Self::Xml {
            position,
            message: message.into(),
        }
    }

    /// Malformed input (as opposed to an I/O failure reading it).
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::Read { .. })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
