//! Market data record types
//!
//! A `Record` is one parsed line from one entity's stream. Timestamps stay
//! strings: the input format is fixed-width and zero-padded, so byte-wise
//! order equals chronological order and nothing is parsed on the hot path.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::RecordError;
use crate::ids::EntityId;

/// Number of comma-separated fields in a data line.
pub const FIELD_COUNT: usize = 5;

/// Default sentinel line marking elided content in a stream.
pub const DEFAULT_SENTINEL: &str = "...";

/// Lexicographically ordered timestamp (e.g. "2021-03-05 09:30:00.000")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    /// Validate and wrap a timestamp string.
    pub fn parse(raw: &str) -> Result<Self, RecordError> {
        if raw.is_empty() {
            return Err(RecordError::EmptyTimestamp);
        }
        if raw.trim() != raw {
            return Err(RecordError::UntrimmedTimestamp {
                timestamp: raw.to_string(),
            });
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One parsed domain event.
///
/// Field order matters: the derived `Ord` compares `timestamp`, then
/// `entity_id`, then the payload fields, so the merge order is
/// `(timestamp, entity_id)` ascending and `Ord` stays consistent with `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: Timestamp,
    pub entity_id: EntityId,
    pub price: String,
    pub size: String,
    pub venue: String,
    /// Opaque record type (trade, quote, ...)
    #[serde(rename = "type")]
    pub kind: String,
}

impl Record {
    /// Parse a `timestamp,price,size,venue,type` line for `entity_id`.
    ///
    /// One trailing `\r` is tolerated. Payload fields are passed through
    /// untouched.
    pub fn parse_line(line: &str, entity_id: &EntityId) -> Result<Self, RecordError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != FIELD_COUNT {
            return Err(RecordError::FieldCount {
                expected: FIELD_COUNT,
                found: fields.len(),
            });
        }

        Ok(Self {
            timestamp: Timestamp::parse(fields[0])?,
            entity_id: entity_id.clone(),
            price: fields[1].to_string(),
            size: fields[2].to_string(),
            venue: fields[3].to_string(),
            kind: fields[4].to_string(),
        })
    }

    /// The key that defines global output order.
    pub fn merge_key(&self) -> (&Timestamp, &EntityId) {
        (&self.timestamp, &self.entity_id)
    }

    /// Render as an output line (without the trailing newline).
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.entity_id, self.timestamp, self.price, self.size, self.venue, self.kind
        )
    }
}

/// Classification of a raw input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Header,
    Blank,
    Sentinel,
    Data,
}

/// Decides which raw lines carry records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineFilter {
    /// Leading lines skipped unconditionally.
    pub header_lines: usize,
    /// Lines equal to this value are skipped.
    pub sentinel: String,
}

impl Default for LineFilter {
    fn default() -> Self {
        Self {
            header_lines: 1,
            sentinel: DEFAULT_SENTINEL.to_string(),
        }
    }
}

impl LineFilter {
    /// Classify a line given its zero-based position in the stream.
    pub fn classify(&self, index: usize, line: &str) -> LineKind {
        if index < self.header_lines {
            return LineKind::Header;
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            LineKind::Blank
        } else if line == self.sentinel {
            LineKind::Sentinel
        } else {
            LineKind::Data
        }
    }
}
