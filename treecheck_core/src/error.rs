//! Error types for treecheck_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using treecheck_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a scan, index build or comparison.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A filesystem entry could not be read while scanning.
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A log or report line could not be parsed.
    #[error("Corrupt line {line}: {reason}")]
    CorruptLine { line: u64, reason: String },

    /// The last line of a log is missing its newline terminator.
    #[error("Truncated record at line {line}")]
    TruncatedRecord { line: u64 },

    /// The log does not start with a root declaration.
    #[error("Missing root declaration: {reason}")]
    MissingRoot { reason: String },

    /// A record path does not live under the declared root.
    #[error("Path {path} is not under root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    /// A path cannot be represented as UTF-8.
    #[error("Path is not valid UTF-8: {path}")]
    NonUtf8Path { path: PathBuf },

    /// The scan root is not a directory.
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// The same relative path occurs more than once.
    #[error("Duplicate path: {path}")]
    DuplicatePath { path: String },

    /// The store destination already exists.
    #[error("Store already exists: {path}")]
    StoreExists { path: PathBuf },

    /// Store is invalid or has an unexpected schema.
    #[error("Invalid store at {path}: {reason}")]
    InvalidStore { path: PathBuf, reason: String },

    /// Invalid hash format or encoding.
    #[error("Invalid hash: {reason}")]
    InvalidHash { reason: String },

    /// SQLite reported a failure.
    #[error("SQLite error: {source}")]
    Sqlite {
        #[from]
        source: rusqlite::Error,
    },

    /// JSON encoding failed.
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Create an Unreadable error.
    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Unreadable {
            path: path.into(),
            source,
        }
    }

    /// Create a CorruptLine error.
    pub fn corrupt_line(line: u64, reason: impl Into<String>) -> Self {
        Error::CorruptLine {
            line,
            reason: reason.into(),
        }
    }

    /// Create a MissingRoot error.
    pub fn missing_root(reason: impl Into<String>) -> Self {
        Error::MissingRoot {
            reason: reason.into(),
        }
    }

    /// Create an OutsideRoot error.
    pub fn outside_root(path: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Error::OutsideRoot {
            path: path.into(),
            root: root.into(),
        }
    }

    /// Create a NonUtf8Path error.
    pub fn non_utf8_path(path: impl Into<PathBuf>) -> Self {
        Error::NonUtf8Path { path: path.into() }
    }

    /// Create a DuplicatePath error.
    pub fn duplicate_path(path: impl Into<String>) -> Self {
        Error::DuplicatePath { path: path.into() }
    }

    /// Create an InvalidStore error.
    pub fn invalid_store(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidStore {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an InvalidHash error.
    pub fn invalid_hash(reason: impl Into<String>) -> Self {
        Error::InvalidHash {
            reason: reason.into(),
        }
    }
}

// Additional From implementations for external error types

impl From<tempfile::PathPersistError> for Error {
    fn from(err: tempfile::PathPersistError) -> Self {
        Error::Io { source: err.error }
    }
}
