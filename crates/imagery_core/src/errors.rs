use thiserror;

use crate::content_hash::ContentHash;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("content hash mismatch: declared {declared}, computed {computed}")]
    IntegrityError {
        declared: ContentHash,
        computed: ContentHash,
    },

    #[error("not permitted: {0}")]
    Unauthorized(String),

    #[error("object store unavailable: {0}")]
    Unavailable(#[from] imagery_objectstore::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("backend error: {0}")]
    BackendError(Box<dyn std::error::Error + Send + Sync>),
}

/// Stable, machine-readable classification of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    InvalidState,
    NotFound,
    Conflict,
    IntegrityError,
    Unauthorized,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::InvalidState => "invalid_state",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::IntegrityError => "integrity_error",
            Self::Unauthorized => "unauthorized",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::IntegrityError { .. } => ErrorKind::IntegrityError,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Configuration(_) | Self::BackendError(_) => ErrorKind::Internal,
        }
    }
}
