use thiserror::Error;

/// The closed set of failure kinds a store gateway or the release pipeline
/// can surface. Every variant maps 1:1 to an HTTP status code at the
/// `skyport-api` boundary; this crate stays free of any HTTP dependency so
/// it can be shared by the pure crates too.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large: {0}")]
    TooLarge(String),

    #[error("upstream connection failed: {0}")]
    ConnectionFailed(String),

    #[error("expired: {0}")]
    Expired(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("internal error: {0}")]
    Other(String),
}

impl StoreError {
    /// Short machine-readable kind, matching the vocabulary in spec §7.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not-found",
            StoreError::AlreadyExists(_) => "already-exists",
            StoreError::MalformedRequest(_) => "malformed-request",
            StoreError::Unauthorized => "unauthorized",
            StoreError::Forbidden(_) => "forbidden",
            StoreError::Conflict(_) => "conflict",
            StoreError::TooLarge(_) => "too-large",
            StoreError::ConnectionFailed(_) => "connection-failed",
            StoreError::Expired(_) => "expired",
            StoreError::Invalid(_) => "invalid",
            StoreError::Other(_) => "other",
        }
    }
}
