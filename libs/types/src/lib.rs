//! Types library for the market data multiplexer
//!
//! This library provides the record model shared by every stage of the
//! merge pipeline: entity identifiers, the parsed record with its total
//! order, the input line classifier, and the record error taxonomy.
//!
//! # Modules
//! - `ids`: Entity identifiers (EntityId)
//! - `record`: Record, Timestamp, line parsing and classification
//! - `errors`: Error taxonomy

// Public modules
pub mod ids;
pub mod record;
pub mod errors;

// Library version constant
pub const LIB_VERSION: &str = "1.0.0";

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ids::*;
    pub use crate::record::*;
    pub use crate::errors::*;
}
