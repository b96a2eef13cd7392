//! Process exit codes
//!
//! Scripts rely on these values, so they must never be renumbered.

use st_core::{Error, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    /// Bad arguments, paths, or configuration
    UsageError = 2,
    /// Connection failures, 5xx responses, or retries exhausted
    NetworkError = 3,
    AuthError = 4,
    NotFound = 5,
    /// Downloaded data disagreed with its manifest
    IntegrityError = 6,
}

impl ExitCode {
    /// Exit code for an engine error
    pub fn from_error(error: &Error) -> Self {
        if matches!(error, Error::CapacityExhausted { .. }) {
            // A token refused on every attempt is still an auth failure.
            return match error.root().kind() {
                ErrorKind::Auth | ErrorKind::AuthExpired => ExitCode::AuthError,
                _ => ExitCode::NetworkError,
            };
        }
        match error.kind() {
            ErrorKind::Auth | ErrorKind::AuthExpired => ExitCode::AuthError,
            ErrorKind::TransientNetwork | ErrorKind::Server | ErrorKind::CapacityExhausted => {
                ExitCode::NetworkError
            }
            ErrorKind::NotFound => ExitCode::NotFound,
            ErrorKind::SegmentIntegrity => ExitCode::IntegrityError,
            ErrorKind::Usage => ExitCode::UsageError,
            ErrorKind::Client | ErrorKind::Local => ExitCode::GeneralError,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            ExitCode::from_error(&Error::Auth("401".into())),
            ExitCode::AuthError
        );
        assert_eq!(
            ExitCode::from_error(&Error::NotFound("c/o".into())),
            ExitCode::NotFound
        );
        assert_eq!(
            ExitCode::from_error(&Error::SegmentIntegrity {
                path: "c_segments/o/1".into(),
                detail: "etag mismatch".into()
            }),
            ExitCode::IntegrityError
        );
        assert_eq!(
            ExitCode::from_error(&Error::InvalidPath("x".into())),
            ExitCode::UsageError
        );
        assert_eq!(
            ExitCode::from_error(&Error::Client {
                status: 422,
                path: "c/o".into()
            }),
            ExitCode::GeneralError
        );
    }

    #[test]
    fn test_exhausted_retries_map_by_root_cause() {
        let exhausted = |last: Error| Error::CapacityExhausted {
            attempts: 5,
            last: Box::new(last),
        };
        assert_eq!(
            ExitCode::from_error(&exhausted(Error::Server {
                status: 503,
                path: "c/o".into()
            })),
            ExitCode::NetworkError
        );
        assert_eq!(
            ExitCode::from_error(&exhausted(Error::AuthExpired {
                status: 401,
                path: "c/o".into()
            })),
            ExitCode::AuthError
        );
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::UsageError.code(), 2);
        assert_eq!(ExitCode::IntegrityError.code(), 6);
    }
}
