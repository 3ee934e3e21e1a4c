use thiserror::Error;

use crate::apis::SourceError;
use crate::citation::CitationError;
use crate::store::StoreError;

/// Failure of a library operation, as seen by whoever exposes the library.
#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("{0}")]
    Validation(String),
    #[error("Rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("Bibliographic source failed: {0}")]
    Source(#[from] SourceError),
    #[error("Citation generation failed: {0}")]
    Generation(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<CitationError> for LibraryError {
    fn from(err: CitationError) -> Self {
        match err {
            CitationError::UnsupportedFormat(_) => Self::Validation(err.to_string()),
            CitationError::GenerationFailed(msg) => Self::Generation(msg),
        }
    }
}

impl LibraryError {
    /// HTTP-style status for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::RateLimited { .. } => 429,
            Self::Source(SourceError::Parse(_)) => 500,
            Self::Source(_) => 502,
            Self::Generation(_) | Self::Storage(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(LibraryError::Validation("empty".into()).status_code(), 400);
        assert_eq!(LibraryError::Forbidden("x".into()).status_code(), 403);
        assert_eq!(LibraryError::NotFound("x".into()).status_code(), 404);
        assert_eq!(
            LibraryError::RateLimited { retry_after_secs: 3 }.status_code(),
            429
        );
        assert_eq!(
            LibraryError::from(SourceError::Parse("bad".into())).status_code(),
            500
        );
        assert_eq!(
            LibraryError::from(SourceError::Unavailable("503".into())).status_code(),
            502
        );
        assert_eq!(LibraryError::Generation("empty".into()).status_code(), 500);
    }

    #[test]
    fn test_citation_error_mapping() {
        let err = LibraryError::from(CitationError::UnsupportedFormat("Vancouver".into()));
        assert!(matches!(err, LibraryError::Validation(ref m) if m.contains("Vancouver")));
        let err = LibraryError::from(CitationError::GenerationFailed("timeout".into()));
        assert_eq!(err.status_code(), 500);
    }
}
