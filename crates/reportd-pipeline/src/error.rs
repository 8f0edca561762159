//! Error types for the report pipeline.

use thiserror::Error;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Store error
    #[error("Database error: {0}")]
    Database(#[from] reportd_database::DatabaseError),

    /// Report payload serialization error
    #[error("Payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Contract source error (the external collaborator failed)
    #[error("Contract source error: {0}")]
    ContractSource(String),
}

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;
