//! Error types for thread dump parsing and analysis.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for tda operations
pub type Result<T> = std::result::Result<T, TdaError>;

/// Error type for tda operations
///
/// Only structural failures are represented here. A thread header with an
/// unexpected layout is absorbed by the tokenizer (missing fields stay `None`)
/// and never surfaces as an error.
#[derive(Error, Debug)]
pub enum TdaError {
    /// No vendor parser recognised the input
    #[error("No suitable parser found for input")]
    FormatUnrecognized,

    /// The stream ended inside a record, or a required marker never appeared
    #[error("Parse error at line {line} (byte {offset}): {message}")]
    Parse {
        /// 1-based line number where the problem was detected
        line: usize,
        /// Byte offset into the stream
        offset: u64,
        /// What was expected
        message: String,
    },

    /// A dump index that does not exist was requested
    #[error("Invalid dump index {index} ({available} dumps available)")]
    IndexOutOfRange {
        /// The requested index
        index: usize,
        /// Number of parsed dumps
        available: usize,
    },

    /// `parse_next` was called after `close`
    #[error("Parser has been closed")]
    ParserClosed,

    /// Log file passed to a session does not exist
    #[error("Log file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A configured or user supplied regex failed to compile
    #[error("Invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern
        pattern: String,
        /// Compilation error
        #[source]
        source: regex::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON thread dump: {0}")]
    Json(#[from] serde_json::Error),
}

impl TdaError {
    pub(crate) fn parse(line: usize, offset: u64, message: impl Into<String>) -> Self {
        TdaError::Parse {
            line,
            offset,
            message: message.into(),
        }
    }

    /// True for errors that only concern the current input, so a caller may
    /// retry with a different file.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            TdaError::FormatUnrecognized | TdaError::Parse { .. } | TdaError::Json(_)
        )
    }
}
