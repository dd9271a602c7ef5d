//! Error types for Knitwork.
//!
//! Library crates use [`KnitError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use crate::types::LineRange;

/// Top-level error type for all Knitwork operations.
#[derive(Debug, thiserror::Error)]
pub enum KnitError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A chunk header could not be parsed into options.
    #[error("malformed options in chunk '{label}' (lines {lines}): {message}")]
    MalformedOptions {
        label: String,
        lines: LineRange,
        message: String,
    },

    /// Two chunks claim the same label.
    #[error("duplicate chunk label '{label}' (lines {first} and {second})")]
    DuplicateLabel {
        label: String,
        first: LineRange,
        second: LineRange,
    },

    /// Caching was requested for a result that cannot be restored later.
    #[error("chunk '{label}' produced a result that cannot be cached; set cache=FALSE")]
    NotCacheable { label: String },

    /// Evaluated code raised an error and the chunk did not allow it.
    ///
    /// `partial_output` holds the document text produced before the failure.
    #[error("error in chunk '{label}' (lines {lines}) of {document}: {message}")]
    Evaluation {
        document: String,
        label: String,
        lines: LineRange,
        message: String,
        partial_output: String,
    },

    /// No chunk syntax could be determined for the input.
    #[error("cannot determine chunk syntax for {input}")]
    UnresolvedPattern { input: String },

    /// Cache entry could not be read or written.
    #[error("cache error: {0}")]
    Cache(String),

    /// Engine failure unrelated to the evaluated code itself.
    #[error("engine error: {0}")]
    Engine(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KnitError>;

impl KnitError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a malformed-options error for a chunk.
    pub fn malformed(label: impl Into<String>, lines: LineRange, msg: impl Into<String>) -> Self {
        Self::MalformedOptions {
            label: label.into(),
            lines,
            message: msg.into(),
        }
    }

    /// Whether this error carries partial document output.
    pub fn is_evaluation(&self) -> bool {
        matches!(self, Self::Evaluation { .. })
    }
}
