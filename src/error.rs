//! Error types for MemoryOS

use thiserror::Error;

/// Result type alias for MemoryOS operations
pub type Result<T> = std::result::Result<T, MemoryOsError>;

#[derive(Error, Debug)]
pub enum MemoryOsError {

    // =============================
    // Coordination Errors
    // =============================

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: agent {agent} lacks {permission} on {resource}")]
    PermissionDenied {
        agent: String,
        permission: String,
        resource: String,
    },

    #[error("Version conflict: expected {expected}, stored {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("Locked: {resource} is locked by {owner}")]
    Locked { resource: String, owner: String },

    #[error("Already locked: {resource} is held by {owner}")]
    AlreadyLocked { resource: String, owner: String },

    #[error("Not lock owner: agent {agent} does not hold the lock on {resource}")]
    NotLockOwner { agent: String, resource: String },

    #[error("Duplicate skill: {0}")]
    DuplicateSkill(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // =============================
    // Client Errors
    // =============================

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MemoryOsError {
    /// Short, stable name of the error kind (used by the API layer)
    pub fn kind(&self) -> &'static str {
        match self {
            MemoryOsError::NotFound(_) => "not_found",
            MemoryOsError::AlreadyExists(_) => "already_exists",
            MemoryOsError::PermissionDenied { .. } => "permission_denied",
            MemoryOsError::VersionConflict { .. } => "version_conflict",
            MemoryOsError::Locked { .. } => "locked",
            MemoryOsError::AlreadyLocked { .. } => "already_locked",
            MemoryOsError::NotLockOwner { .. } => "not_lock_owner",
            MemoryOsError::DuplicateSkill(_) => "duplicate_skill",
            MemoryOsError::InvalidArgument(_) => "invalid_argument",
            MemoryOsError::Api { .. } => "api",
            MemoryOsError::SerializationError(_) => "serialization",
            MemoryOsError::HttpError(_) => "http",
            MemoryOsError::IoError(_) => "io",
        }
    }
}
