use std::fmt;

/// The taxonomy of failure modes the engine can report.
///
/// Every fallible operation in `ccpm` returns exactly one of these, carrying
/// enough context to decide whether to retry, reset local state, or surface
/// the message to a user unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller passed something that can never succeed: an unknown
    /// package name, a glob that matches nothing, a malformed URL.
    InvalidInput,
    /// A store file was unreadable or malformed. The offending file has
    /// already been backed up and the store reset to empty.
    IntegrityError,
    /// A [`crate::Driver`] failed to fetch a manifest, index, or archive.
    DriverError,
    /// An archive's per-file digest did not match the manifest.
    ChecksumMismatch,
    /// Two packages claim the same filesystem path.
    ConflictError,
    /// An operation was attempted from a transaction state that forbids it.
    StateError,
    /// Something below the engine (usually the filesystem) is broken beyond
    /// the engine's ability to recover from.
    FatalError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::IntegrityError => "integrity error",
            ErrorKind::DriverError => "driver error",
            ErrorKind::ChecksumMismatch => "checksum mismatch",
            ErrorKind::ConflictError => "conflict",
            ErrorKind::StateError => "state error",
            ErrorKind::FatalError => "fatal error",
        };
        f.write_str(s)
    }
}

/// A single error value carrying a [`ErrorKind`] and a human-readable
/// message, optionally wrapping the lower-level error that caused it.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct CcpmError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CcpmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IntegrityError, message)
    }

    pub fn driver(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DriverError, message)
    }

    pub fn checksum_mismatch(path: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::ChecksumMismatch,
            format!("checksum mismatch for {path}"),
        )
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConflictError, message)
    }

    pub fn state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StateError, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FatalError, message)
    }
}

impl From<std::io::Error> for CcpmError {
    fn from(err: std::io::Error) -> Self {
        CcpmError::with_source(ErrorKind::FatalError, err.to_string(), err)
    }
}

impl From<serde_json::Error> for CcpmError {
    fn from(err: serde_json::Error) -> Self {
        CcpmError::with_source(ErrorKind::IntegrityError, err.to_string(), err)
    }
}

/// Convenience alias used throughout the `ccpm` crates.
pub type Result<T> = std::result::Result<T, CcpmError>;
