// src/error.rs

//! Crate-wide error type.
//!
//! Every failure surfaces as a single-line diagnostic. Variants are grouped
//! by the stage that produces them: release parsing, conflict validation,
//! slice selection, archive access, deb extraction, mutation scripts, and
//! plain I/O. No error is retried.

use std::io;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed release file name, YAML shape, or value domain
    #[error("{0}")]
    ReleaseSyntax(String),

    /// Conflict detected while validating a release
    #[error("{0}")]
    ReleaseSemantic(String),

    /// Unknown package or slice in the request, or invalid generate value
    #[error("{0}")]
    Selection(String),

    /// Package fetch or metadata failure
    #[error("{0}")]
    Archive(String),

    /// Deb container or tar stream failure, including path escapes
    #[error("{0}")]
    Extract(String),

    /// Mutation script failure or write to a non-mutable path
    #[error("{0}")]
    Mutate(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True if the error was produced by release validation rather than
    /// later stages. Useful for callers that load many releases.
    pub fn is_release_error(&self) -> bool {
        matches!(self, Error::ReleaseSyntax(_) | Error::ReleaseSemantic(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line_display() {
        let err = Error::ReleaseSemantic("slices a_b and c_d conflict on /x".into());
        assert_eq!(err.to_string(), "slices a_b and c_d conflict on /x");
        assert!(!err.to_string().contains('\n'));
    }

    #[test]
    fn test_io_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_release_error_classification() {
        assert!(Error::ReleaseSyntax("bad".into()).is_release_error());
        assert!(Error::ReleaseSemantic("bad".into()).is_release_error());
        assert!(!Error::Selection("bad".into()).is_release_error());
    }
}
