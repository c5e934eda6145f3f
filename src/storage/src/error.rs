//! Error types for the local file store.

use thiserror::Error;

use crate::base::FileState;

/// File store error types
#[derive(Error, Debug)]
pub enum StoreError {
    /// Name is unknown in every directory the operation consulted
    #[error("File not found: {name}")]
    NotFound { name: String },

    /// Name is already present and conflicts with a create or move
    #[error("File already exists: {name}")]
    AlreadyExists { name: String },

    /// Name is present but outside the caller's accepted states
    #[error("File {name} is in state {state}, accepted states: [{}]", join_states(.accepted))]
    StateError {
        name: String,
        state: FileState,
        accepted: Vec<FileState>,
    },

    /// Sidecar metadata is absent
    #[error("Metadata {suffix} not found for file {name}")]
    MetadataNotFound { name: String, suffix: String },

    /// File is marked persisted and may not be deleted
    #[error("File is persisted: {name}")]
    Persisted { name: String },

    /// Name cannot be mapped to a path in this store
    #[error("Invalid file name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Metadata registration or (de)serialization error
    #[error("Metadata error: {0}")]
    MetadataError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn not_found(name: &str) -> Self {
        StoreError::NotFound {
            name: name.to_string(),
        }
    }

    pub(crate) fn already_exists(name: &str) -> Self {
        StoreError::AlreadyExists {
            name: name.to_string(),
        }
    }

    pub(crate) fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        StoreError::InvalidName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Callers treat this as "needs fetch".
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Callers treat this as "already satisfied, skip".
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    /// Indicates the caller declared the wrong accepted-state set.
    pub fn is_state_error(&self) -> bool {
        matches!(self, StoreError::StateError { .. })
    }
}

fn join_states(states: &[FileState]) -> String {
    states
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for file store operations
pub type Result<T> = std::result::Result<T, StoreError>;
