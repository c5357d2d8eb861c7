//! Error types for station stowage operations.

use thiserror::Error;

use crate::model::ValidationError;

/// Result type alias for stowage operations.
pub type Result<T> = std::result::Result<T, StowageError>;

/// Errors that can be returned by the stowage engines.
///
/// An item that finds no space is not an error; it is reported as unplaced in
/// the placement outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StowageError {
    /// Unknown item id.
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    /// Unknown container id.
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// The item exists but has no active placement.
    #[error("Item {0} has no active placement")]
    NotPlaced(String),

    /// The operation would break the non-overlap, bounds or uniqueness invariants.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed global argument (negative budget, negative day count).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Rejected item or container record.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Coarse error taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidArgument,
}

impl StowageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StowageError::ItemNotFound(_)
            | StowageError::ContainerNotFound(_)
            | StowageError::NotPlaced(_) => ErrorKind::NotFound,
            StowageError::Conflict(_) => ErrorKind::Conflict,
            StowageError::InvalidArgument(_) | StowageError::Validation(_) => {
                ErrorKind::InvalidArgument
            }
        }
    }
}
