//! Error types for directory operations.
//!
//! Every failure in the directory client is a [`DirectoryError`] carrying exactly one
//! [`DirectoryErrorKind`]. Kinds are meant for operator logs; callers facing untrusted
//! clients are expected to collapse them before responding.

use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;
use tracing::Level;

/// Boxed lower-level cause attached to a [`DirectoryError`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Closed set of directory failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryErrorKind {
    /// Dial, TLS handshake or StartTLS negotiation failed.
    ConnectionFailed,
    /// The connection deadline elapsed before the dial completed.
    ConnectionTimeout,
    /// Local TLS setup (connector or trust roots) failed.
    TlsFailed,
    /// A bind was refused for a reason other than bad credentials.
    BindFailed,
    /// The directory rejected the supplied credentials.
    InvalidCredentials,
    /// The user search returned an error.
    SearchFailed,
    /// The user search matched no entry.
    UserNotFound,
    /// The search deadline elapsed.
    SearchTimeout,
    /// Configuration is malformed. Only raised at startup.
    InvalidConfig,
}

impl DirectoryErrorKind {
    /// Stable snake_case code for logs and diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionFailed => "connection_failed",
            Self::ConnectionTimeout => "connection_timeout",
            Self::TlsFailed => "tls_failed",
            Self::BindFailed => "bind_failed",
            Self::InvalidCredentials => "invalid_credentials",
            Self::SearchFailed => "search_failed",
            Self::UserNotFound => "user_not_found",
            Self::SearchTimeout => "search_timeout",
            Self::InvalidConfig => "invalid_config",
        }
    }

    /// Log level an operator should see this kind at. Per-user outcomes stay at debug.
    #[must_use]
    pub const fn severity(self) -> Level {
        match self {
            Self::ConnectionFailed
            | Self::ConnectionTimeout
            | Self::TlsFailed
            | Self::BindFailed
            | Self::SearchFailed
            | Self::InvalidConfig => Level::ERROR,
            Self::SearchTimeout => Level::WARN,
            Self::InvalidCredentials | Self::UserNotFound => Level::DEBUG,
        }
    }

    /// Returns true for kinds produced by an elapsed deadline.
    #[must_use]
    pub const fn is_timeout(self) -> bool {
        matches!(self, Self::ConnectionTimeout | Self::SearchTimeout)
    }
}

impl fmt::Display for DirectoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory failure with a kind, a message and an optional cause.
#[derive(Debug, Error)]
#[error("[{kind}] {message}{}", render_cause(.cause))]
pub struct DirectoryError {
    kind: DirectoryErrorKind,
    message: String,
    #[source]
    cause: Option<BoxError>,
}

fn render_cause(cause: &Option<BoxError>) -> String {
    cause
        .as_ref()
        .map(|cause| format!(": {cause}"))
        .unwrap_or_default()
}

impl DirectoryError {
    /// Creates an error without an underlying cause.
    #[must_use]
    pub fn new(kind: DirectoryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Creates an error wrapping a lower-level cause.
    #[must_use]
    pub fn with_cause(
        kind: DirectoryErrorKind,
        message: impl Into<String>,
        cause: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    /// Shorthand for an [`DirectoryErrorKind::InvalidConfig`] error.
    #[must_use]
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(DirectoryErrorKind::InvalidConfig, message)
    }

    /// Returns the failure kind.
    #[must_use]
    pub const fn kind(&self) -> DirectoryErrorKind {
        self.kind
    }

    /// Returns the message without the kind prefix or cause.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the wrapped cause, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }
}

/// Specialized result type for directory operations.
pub type Result<T> = std::result::Result<T, DirectoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_without_cause() {
        let err = DirectoryError::new(DirectoryErrorKind::ConnectionFailed, "connection failed");
        assert_eq!(err.to_string(), "[connection_failed] connection failed");
        assert!(err.source().is_none());
    }

    #[test]
    fn display_with_chained_directory_error() {
        let cause = DirectoryError::new(DirectoryErrorKind::BindFailed, "bind failed");
        let err = DirectoryError::with_cause(
            DirectoryErrorKind::ConnectionFailed,
            "connection failed",
            cause,
        );
        assert_eq!(
            err.to_string(),
            "[connection_failed] connection failed: [bind_failed] bind failed"
        );

        let source = err.source().unwrap();
        assert_eq!(
            source.downcast_ref::<DirectoryError>().map(DirectoryError::kind),
            Some(DirectoryErrorKind::BindFailed)
        );
    }

    #[test]
    fn foreign_cause_is_kept() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = DirectoryError::with_cause(DirectoryErrorKind::SearchFailed, "search", io);
        assert_eq!(err.kind(), DirectoryErrorKind::SearchFailed);
        assert_eq!(err.cause().unwrap().to_string(), "boom");
    }

    #[test]
    fn kind_codes_are_snake_case() {
        let kinds = [
            (DirectoryErrorKind::ConnectionFailed, "connection_failed"),
            (DirectoryErrorKind::ConnectionTimeout, "connection_timeout"),
            (DirectoryErrorKind::TlsFailed, "tls_failed"),
            (DirectoryErrorKind::BindFailed, "bind_failed"),
            (DirectoryErrorKind::InvalidCredentials, "invalid_credentials"),
            (DirectoryErrorKind::SearchFailed, "search_failed"),
            (DirectoryErrorKind::UserNotFound, "user_not_found"),
            (DirectoryErrorKind::SearchTimeout, "search_timeout"),
            (DirectoryErrorKind::InvalidConfig, "invalid_config"),
        ];
        for (kind, code) in kinds {
            assert_eq!(kind.as_str(), code);
            assert_eq!(kind.to_string(), code);
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{code}\""));
        }
    }

    #[test]
    fn severity_keeps_user_outcomes_quiet() {
        assert_eq!(DirectoryErrorKind::UserNotFound.severity(), Level::DEBUG);
        assert_eq!(DirectoryErrorKind::InvalidCredentials.severity(), Level::DEBUG);
        assert_eq!(DirectoryErrorKind::SearchTimeout.severity(), Level::WARN);
        assert_eq!(DirectoryErrorKind::ConnectionFailed.severity(), Level::ERROR);
    }

    #[test]
    fn timeout_kinds() {
        assert!(DirectoryErrorKind::ConnectionTimeout.is_timeout());
        assert!(DirectoryErrorKind::SearchTimeout.is_timeout());
        assert!(!DirectoryErrorKind::BindFailed.is_timeout());
    }

    #[test]
    fn invalid_config_shorthand() {
        let err = DirectoryError::invalid_config("bad filter");
        assert_eq!(err.kind(), DirectoryErrorKind::InvalidConfig);
        assert_eq!(err.message(), "bad filter");
    }
}
