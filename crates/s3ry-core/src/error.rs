//! The error vocabulary shared by the engine and the UI layers.

use std::fmt;

/// Classified storage failure kinds.
///
/// The engine maps every raw protocol or IO error onto one of these; the
/// retry policy and the message catalog consume only the kind, never the
/// raw error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The bucket or key does not exist.
    NotFound,
    /// Authentication or authorization failure.
    PermissionDenied,
    /// The bucket name violates the service naming rules.
    InvalidBucketName,
    /// The object key is malformed or unusable.
    InvalidKey,
    /// The service is rate limiting us.
    Throttled,
    /// Timeouts, connection resets, 5xx: worth retrying.
    Transient,
    /// Protocol violations and everything unclassifiable.
    Fatal,
    /// A cancellation token was observed.
    Cancelled,
}

impl ErrorKind {
    /// Whether the retry policy may resubmit work that failed this way.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Throttled | ErrorKind::Transient)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::InvalidBucketName => "invalid bucket name",
            ErrorKind::InvalidKey => "invalid key",
            ErrorKind::Throttled => "throttled",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorKind;

    #[test]
    fn only_throttled_and_transient_are_retryable() {
        let retryable = [ErrorKind::Throttled, ErrorKind::Transient];
        let terminal = [
            ErrorKind::NotFound,
            ErrorKind::PermissionDenied,
            ErrorKind::InvalidBucketName,
            ErrorKind::InvalidKey,
            ErrorKind::Fatal,
            ErrorKind::Cancelled,
        ];
        assert!(retryable.iter().all(|k| k.is_retryable()));
        assert!(terminal.iter().all(|k| !k.is_retryable()));
    }
}
