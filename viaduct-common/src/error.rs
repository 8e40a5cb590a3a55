//! Error taxonomy shared by the query runtime and the HTTP dispatch layer.
//!
//! `ErrorCode` is the canonical string surfaced in a reply's `code` field
//! (§7); `Error` is the typed error library code actually returns and
//! carries a human-readable `message` alongside the code.

use std::fmt;

/// Canonical error codes from spec §7. Serializes to its string form via
/// [`ErrorCode::as_str`]; the HTTP layer puts that string directly in the
/// JSON `code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidQuery,
    InvalidOptions,
    InvalidValue,
    TooBig,
    NoSegment,
    NoRoute,
    NoTrip,
    NoMatch,
    DisabledDataset,
    InvalidFingerprint,
    IncompatibleFileVersion,
    DatatypeSizeMismatch,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidQuery => "InvalidQuery",
            ErrorCode::InvalidOptions => "InvalidOptions",
            ErrorCode::InvalidValue => "InvalidValue",
            ErrorCode::TooBig => "TooBig",
            ErrorCode::NoSegment => "NoSegment",
            ErrorCode::NoRoute => "NoRoute",
            ErrorCode::NoTrip => "NoTrip",
            ErrorCode::NoMatch => "NoMatch",
            ErrorCode::DisabledDataset => "DisabledDataset",
            ErrorCode::InvalidFingerprint => "InvalidFingerprint",
            ErrorCode::IncompatibleFileVersion => "IncompatibleFileVersion",
            ErrorCode::DatatypeSizeMismatch => "DatatypeSizeMismatch",
            ErrorCode::InternalError => "InternalError",
        }
    }

    /// The HTTP status a dispatch boundary should translate this code to.
    /// Fatal load-time codes have no HTTP meaning; callers should not reach
    /// the dispatch layer with one of those.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::InternalError => 500,
            ErrorCode::InvalidFingerprint
            | ErrorCode::IncompatibleFileVersion
            | ErrorCode::DatatypeSizeMismatch => 500,
            _ => 400,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed error carrying a canonical [`ErrorCode`] plus a free-form
/// message for logs and the JSON reply body.
#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Error {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Error::new(ErrorCode::InvalidQuery, message)
    }

    pub fn invalid_options(message: impl Into<String>) -> Self {
        Error::new(ErrorCode::InvalidOptions, message)
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Error::new(ErrorCode::InvalidValue, message)
    }

    pub fn too_big(message: impl Into<String>) -> Self {
        Error::new(ErrorCode::TooBig, message)
    }

    pub fn no_segment(message: impl Into<String>) -> Self {
        Error::new(ErrorCode::NoSegment, message)
    }

    pub fn no_route(message: impl Into<String>) -> Self {
        Error::new(ErrorCode::NoRoute, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::new(ErrorCode::InternalError, message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_strings_are_canonical() {
        assert_eq!(ErrorCode::NoSegment.as_str(), "NoSegment");
        assert_eq!(ErrorCode::InvalidQuery.as_str(), "InvalidQuery");
    }

    #[test]
    fn http_status_matches_taxonomy() {
        assert_eq!(ErrorCode::NoRoute.http_status(), 400);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
        assert_eq!(ErrorCode::IncompatibleFileVersion.http_status(), 500);
    }
}
