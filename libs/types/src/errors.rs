//! Error types for record construction
//!
//! Comprehensive error taxonomy using thiserror

use thiserror::Error;

/// Record-level errors
///
/// Every variant describes a line that does not fit the
/// `timestamp,price,size,venue,type` shape. Callers skip and count these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Malformed record: expected {expected} fields, found {found}")]
    FieldCount { expected: usize, found: usize },

    #[error("Malformed record: empty timestamp")]
    EmptyTimestamp,

    #[error("Malformed record: timestamp has surrounding whitespace: {timestamp:?}")]
    UntrimmedTimestamp { timestamp: String },

    #[error("Entity id must not be empty")]
    EmptyEntityId,
}
