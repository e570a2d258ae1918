//! Error types for the storage layer.
//!
//! All backends report failures via [`StorageError`]. The two provisioning
//! signals, [`StorageError::CollectionAbsent`] and
//! [`StorageError::AlreadyExists`], are distinct from real failures so the
//! registry can drive lazy creation without string matching.

use cube_types::ValidationError;

/// Errors that can occur in the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The type's collections have not been created yet.
    #[error("collection absent: {0}")]
    CollectionAbsent(String),

    /// A creation attempt lost to an earlier (possibly concurrent) one.
    #[error("collection already exists: {0}")]
    AlreadyExists(String),

    /// An insert collided with an existing event key.
    #[error("duplicate event key: {0}")]
    DuplicateKey(String),

    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A scan filter could not be evaluated.
    #[error("invalid filter: {0}")]
    Filter(#[from] ValidationError),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether this is the "collection absent" provisioning signal.
    pub const fn is_absent(&self) -> bool {
        matches!(self, Self::CollectionAbsent(_))
    }

    /// Whether this is the "already exists" provisioning signal.
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}
