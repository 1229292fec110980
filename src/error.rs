//! Error types for the noise mapper core

use crate::schema::ValidationError;
use thiserror::Error;

/// Errors that can occur while aggregating or ingesting measurements
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Cannot finalize an aggregation with no accumulated items")]
    EmptyAggregation,

    #[error("Cannot map values of an empty collection onto a range")]
    EmptyRange,

    #[error("No baseline computed for device: {0}")]
    MissingBaseline(String),

    #[error("Record {0} has no deviation annotation")]
    MissingDeviation(u64),

    #[error("Failed to parse upload payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] ValidationError),

    #[error("Record not found: {0}")]
    RecordNotFound(u64),
}
