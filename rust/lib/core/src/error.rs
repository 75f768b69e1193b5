use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers. Callers match on these,
// never on the human-readable message string.

/// Stable error code constants.
pub mod error_code {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const ALREADY_EXISTS: &str = "ALREADY_EXISTS";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL: &str = "INTERNAL";
}

// ── ServiceError ────────────────────────────────────────────────────

/// Unified error type returned by every inventory operation.
///
/// Only two classes ever reach an interactive caller in practice:
/// `Validation` (rejected before any state changed) and `Storage`
/// (every local durability tier failed, including the emergency one).
/// Remote failures are absorbed by the sync state machine.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Entity does not exist locally.
    #[error("{0}")]
    NotFound(String),

    /// Duplicate key / entity already exists.
    #[error("{0}")]
    Conflict(String),

    /// Input data is invalid. No state was changed.
    #[error("{0}")]
    Validation(String),

    /// Local persistence failed on every tier.
    #[error("{0}")]
    Storage(String),

    /// Unexpected internal error (serialization, broken invariants).
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable, machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => error_code::NOT_FOUND,
            ServiceError::Conflict(_) => error_code::ALREADY_EXISTS,
            ServiceError::Validation(_) => error_code::VALIDATION_FAILED,
            ServiceError::Storage(_) => error_code::STORAGE_ERROR,
            ServiceError::Internal(_) => error_code::INTERNAL,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, ServiceError::Validation(_))
    }
}
