//! Error types shared across the lap event engine
//!
//! Error taxonomy using thiserror. Transport-level errors live next to the
//! store and stream code in the engine crate.

use thiserror::Error;

/// Bad input to a write; reported immediately and never retried
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Runner name must not be empty")]
    EmptyName,
}

/// Lookup of an entity that is not (yet) known
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("Runner not found: {runner_id}")]
    Runner { runner_id: String },

    #[error("No runner registered for email {email}")]
    RunnerEmail { email: String },
}

/// A single malformed record; it is skipped and logged, never fatal
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataQualityWarning {
    #[error("Record {record_id} is missing field {field}")]
    MissingField {
        record_id: String,
        field: &'static str,
    },

    #[error("Record {record_id} could not be decoded: {reason}")]
    Undecodable { record_id: String, reason: String },
}
