//! Error types shared by the client, the export writer and the traversal engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::rate_limit::RateLimitError;

/// Failure of a single remote call.
///
/// `RateLimited` is kept apart from the other HTTP failures so callers can
/// retry it instead of treating it as terminal.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {resource}")]
    NotFound { resource: String },

    #[error("forbidden: {resource}")]
    Forbidden { resource: String },

    #[error("rate limited: {resource}")]
    RateLimited { resource: String },

    #[error("unsupported export format for {resource}")]
    UnsupportedFormat { resource: String },

    #[error("unexpected status {status} for {resource}")]
    Http { status: u16, resource: String },

    #[error("transport error for {resource}: {source}")]
    Transport {
        resource: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no request slot for {resource}: {source}")]
    Limiter {
        resource: String,
        #[source]
        source: RateLimitError,
    },

    #[error("invalid response body for {resource}: {source}")]
    Decode {
        resource: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    /// Whether the branch that produced this error should be skipped quietly.
    pub fn is_inaccessible(&self) -> bool {
        matches!(self, ApiError::NotFound { .. } | ApiError::Forbidden { .. })
    }
}

/// Failure of a local filesystem operation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why one exported file could not be produced.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("export request failed: {0}")]
    Export(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum SynchroniseError {
    #[error("failed to fetch root folder {id}: {source}")]
    RootFolder {
        id: String,
        #[source]
        source: ApiError,
    },
}
