//! Engine error types.

use hapolicy_placement::PlacementError;
use thiserror::Error;

/// Errors that abort a scheduling pass.
///
/// Unplaceable resources and ignored constraints are not errors; they
/// are logged and reported in the pass outcome.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid snapshot: {0}")]
    Placement(#[from] PlacementError),

    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
