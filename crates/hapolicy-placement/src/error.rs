//! Placement error types.

use thiserror::Error;

/// Malformed input detected while unpacking a snapshot.
#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("duplicate resource id: {0}")]
    DuplicateResource(String),

    #[error("invalid container {id}: {reason}")]
    InvalidContainer { id: String, reason: String },
}

pub type PlacementResult<T> = Result<T, PlacementError>;
