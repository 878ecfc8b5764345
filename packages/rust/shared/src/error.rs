//! Error types for legisync.
//!
//! Library crates use [`LegisyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Errors fall into two groups. Store-level invariant violations
//! ([`LegisyncError::is_fatal`]) abort a run. Everything else is scoped to a
//! single entity: it is recorded in the run summary and the batch continues.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Top-level error type for all legisync operations.
#[derive(Debug, thiserror::Error)]
pub enum LegisyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// The watermark would move backward.
    #[error("watermark regression: candidate {candidate} is older than current {current}")]
    Regression {
        current: DateTime<Utc>,
        candidate: DateTime<Utc>,
    },

    /// A log file name already exists with different content.
    #[error("consistency error: {key} already exists with different content")]
    Consistency { key: String },

    /// A source document could not be downloaded.
    #[error("download error for {url}: {message}")]
    Download { url: String, message: String },

    /// A downloaded document could not be parsed into text.
    #[error("parse error: {message}")]
    Parsing { message: String },

    /// A referenced file or link does not exist.
    #[error("missing file: {location}")]
    MissingFile { location: String },

    /// An entity could not be assigned to a legislative session.
    #[error("no session could be resolved for {identifier}")]
    SessionUnresolved { identifier: String },

    /// A raw scraped object is missing a required field or is malformed.
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    /// The bill/session registry on disk is unreadable.
    #[error("entity registry is corrupt: {0}")]
    RegistryCorrupt(String),

    /// Key-value store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// JSON (de)serialization failure.
    #[error("json error in {context}: {source}")]
    Json {
        context: String,
        source: serde_json::Error,
    },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LegisyncError>;

impl LegisyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parsing(msg: impl Into<String>) -> Self {
        Self::Parsing {
            message: msg.into(),
        }
    }

    /// Create a download error for `url`.
    pub fn download(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Create a missing-file error for a path or URL.
    pub fn missing_file(location: impl Into<String>) -> Self {
        Self::MissingFile {
            location: location.into(),
        }
    }

    /// Create an invalid-input error from any displayable message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    /// Wrap a `serde_json::Error` with a description of what was being read.
    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Regression { .. } | Self::RegistryCorrupt(_) | Self::Config { .. }
        )
    }

    /// Stable snake_case label used in run summaries and error directories.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Regression { .. } => "regression",
            Self::Consistency { .. } => "consistency",
            Self::Download { .. } => "download",
            Self::Parsing { .. } => "parsing",
            Self::MissingFile { .. } => "missing_file",
            Self::SessionUnresolved { .. } => "session_unresolved",
            Self::InvalidInput { .. } => "invalid_input",
            Self::RegistryCorrupt(_) => "registry_corrupt",
            Self::Storage(_) => "storage",
            Self::Json { .. } => "json",
            Self::Io { .. } => "io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = LegisyncError::config("state is required");
        assert_eq!(err.to_string(), "config error: state is required");

        let err = LegisyncError::Consistency {
            key: "logs/20250101T000000Z_introduced.json".into(),
        };
        assert!(err.to_string().contains("20250101T000000Z_introduced"));
    }

    #[test]
    fn fatal_classification() {
        let now = Utc::now();
        let regression = LegisyncError::Regression {
            current: now,
            candidate: now - chrono::Duration::days(1),
        };
        assert!(regression.is_fatal());
        assert!(LegisyncError::RegistryCorrupt("bad json".into()).is_fatal());

        assert!(!LegisyncError::Consistency { key: "k".into() }.is_fatal());
        assert!(!LegisyncError::download("https://x", "HTTP 404").is_fatal());
        assert!(
            !LegisyncError::SessionUnresolved {
                identifier: "HB 1".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn kind_labels() {
        assert_eq!(LegisyncError::missing_file("a.pdf").kind(), "missing_file");
        assert_eq!(LegisyncError::parsing("x").kind(), "parsing");
        assert_eq!(LegisyncError::invalid_input("x").kind(), "invalid_input");
    }
}
