//! Error taxonomy shared across the workspace.

use thiserror::Error;

/// Errors surfaced by registry filesystem and uploader operations.
///
/// Variants map one-to-one onto the errno classes the mount layer expects;
/// use the [`From<Error> for std::io::Error`] conversion at that boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failures and unrecoverable read errors (ENOENT class).
    #[error("not found: {0}")]
    NotFound(String),

    /// Authorization failed after credentials were presented (EPERM class).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed challenge, missing header, or tokenless auth response (EINVAL class).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Caller-side misuse, e.g. a non-sequential upload write (EINVAL class).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation deadline elapsed (ETIMEDOUT class).
    #[error("timed out: {0}")]
    TimedOut(String),

    /// An HTTP exchange completed with a status the caller cannot accept.
    #[error("unexpected status {status} for {url}")]
    Status { url: String, status: u16 },

    /// Local file I/O failed (uploader write-through, trust anchor reads).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation the filesystem does not implement (ENOSYS class).
    #[error("{0} not supported")]
    Unsupported(&'static str),
}

impl Error {
    /// Whether this failure is an authorization rejection (401/403 or an
    /// explicit permission error). Read paths retry these after poisoning
    /// the cached token.
    pub fn is_auth(&self) -> bool {
        match self {
            Error::PermissionDenied(_) => true,
            Error::Status { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    /// Whether this failure was caused by an elapsed deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimedOut(_))
    }

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        use std::io::ErrorKind;
        let kind = match &err {
            Error::Io(inner) => inner.kind(),
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::Protocol(_) => ErrorKind::InvalidData,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::TimedOut(_) => ErrorKind::TimedOut,
            Error::Status { status, .. } if *status == 401 || *status == 403 => {
                ErrorKind::PermissionDenied
            }
            Error::Status { .. } => ErrorKind::NotFound,
            Error::Unsupported(_) => ErrorKind::Unsupported,
        };
        std::io::Error::new(kind, err)
    }
}

/// Result type alias for wharf operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn test_auth_classification() {
        assert!(Error::PermissionDenied("no".into()).is_auth());
        assert!(
            Error::Status {
                url: "u".into(),
                status: 401
            }
            .is_auth()
        );
        assert!(
            Error::Status {
                url: "u".into(),
                status: 403
            }
            .is_auth()
        );
        assert!(
            !Error::Status {
                url: "u".into(),
                status: 500
            }
            .is_auth()
        );
        assert!(!Error::NotFound("gone".into()).is_auth());
    }

    #[test]
    fn test_io_error_kinds() {
        let io: std::io::Error = Error::TimedOut("read".into()).into();
        assert_eq!(io.kind(), ErrorKind::TimedOut);

        let io: std::io::Error = Error::Unsupported("mkdir").into();
        assert_eq!(io.kind(), ErrorKind::Unsupported);

        let io: std::io::Error = Error::Status {
            url: "u".into(),
            status: 403,
        }
        .into();
        assert_eq!(io.kind(), ErrorKind::PermissionDenied);

        let io: std::io::Error = Error::Status {
            url: "u".into(),
            status: 502,
        }
        .into();
        assert_eq!(io.kind(), ErrorKind::NotFound);
    }
}
