//! Identifier types for merged entities
//!
//! An entity is whatever one input stream describes (one instrument's
//! trade/quote log). Its id is supplied by the stream's owner, never read
//! from the stream's lines.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::RecordError;

/// Entity identifier (e.g. an instrument symbol such as "AAPL")
///
/// Ordered lexicographically; this ordering breaks timestamp ties in the
/// merged output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Create a new EntityId from a string
    ///
    /// # Panics
    /// Panics if the id is empty
    pub fn new(id: impl Into<String>) -> Self {
        let s = id.into();
        assert!(!s.is_empty(), "EntityId must not be empty");
        Self(s)
    }

    /// Try to create an EntityId, rejecting empty ids
    pub fn try_new(id: impl Into<String>) -> Result<Self, RecordError> {
        let s = id.into();
        if s.is_empty() {
            Err(RecordError::EmptyEntityId)
        } else {
            Ok(Self(s))
        }
    }

    /// Get the id string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
