//! The TreeDrive error type.
//!
//! Every crate converges on [`AppError`] so `?` propagates cleanly across
//! crate boundaries. The kind tells the caller how to react: fix the
//! request, poll again, or re-upload.

use std::fmt;
use thiserror::Error;

/// Error categories exposed at the application boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// The node, version, or stored object does not exist.
    NotFound,
    /// The caller lacks the required access level.
    Forbidden,
    /// Structural tree violation: parent is a file, missing, or not active.
    InvalidParent,
    /// The operation does not apply to the entity's current lifecycle status.
    InvalidState,
    /// Uploaded content disagrees with the declared metadata.
    IntegrityMismatch,
    /// A sharing target does not resolve to an existing account.
    UnknownRecipient,
    /// Input validation failed.
    Validation,
    /// Duplicate entry or concurrent modification.
    Conflict,
    Database,
    /// Object-store I/O failure; retryable.
    Storage,
    Configuration,
    Serialization,
    Internal,
}

impl ErrorKind {
    /// Whether a failure of this kind may succeed on retry.
    ///
    /// Only object-store I/O qualifies. Structural, permission, and
    /// integrity failures are terminal for the attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage)
    }

    /// Stable machine-readable code for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Forbidden => "FORBIDDEN",
            Self::InvalidParent => "INVALID_PARENT",
            Self::InvalidState => "INVALID_STATE",
            Self::IntegrityMismatch => "INTEGRITY_MISMATCH",
            Self::UnknownRecipient => "UNKNOWN_RECIPIENT",
            Self::Validation => "VALIDATION",
            Self::Conflict => "CONFLICT",
            Self::Database => "DATABASE",
            Self::Storage => "STORAGE",
            Self::Configuration => "CONFIGURATION",
            Self::Serialization => "SERIALIZATION",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The application error: a kind, a message, and an optional cause.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

macro_rules! kind_constructors {
    ($($(#[$doc:meta])* $name:ident => $kind:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(message: impl Into<String>) -> Self {
                Self::new(ErrorKind::$kind, message)
            }
        )*
    };
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Build an error that records its underlying cause.
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

    kind_constructors! {
        not_found => NotFound,
        forbidden => Forbidden,
        invalid_parent => InvalidParent,
        invalid_state => InvalidState,
        integrity_mismatch => IntegrityMismatch,
        unknown_recipient => UnknownRecipient,
        validation => Validation,
        conflict => Conflict,
        /// Transient object-store I/O failure.
        storage => Storage,
        configuration => Configuration,
        internal => Internal,
    }
}

// The cause is not Clone; a cloned error keeps kind and message only.
impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorKind::Serialization, format!("JSON error: {err}"), err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorKind::Storage, format!("I/O error: {err}"), err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::Storage.is_transient());
        assert!(!ErrorKind::Forbidden.is_transient());
        assert!(!ErrorKind::IntegrityMismatch.is_transient());
    }

    #[test]
    fn test_display_includes_kind() {
        let err = AppError::invalid_parent("parent is a file");
        assert_eq!(err.to_string(), "INVALID_PARENT: parent is a file");
    }

    #[test]
    fn test_clone_drops_source() {
        let inner = std::io::Error::other("disk gone");
        let err = AppError::with_source(ErrorKind::Storage, "read failed", inner);
        assert!(err.clone().source.is_none());
    }
}
