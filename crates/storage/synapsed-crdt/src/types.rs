//! Core types for CRDT implementations

use crate::{clock::HLC_LENGTH, clock::is_hlc_char, error::CrdtError};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// 32-bit content hash of a stamp
pub type Hash = u32;

/// Wall-clock time in milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Current system time
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis().max(0) as u64)
    }

    /// Create timestamp from a millisecond value
    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Get timestamp value
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encoded hybrid logical clock value.
///
/// Always either empty ("never set") or exactly 16 characters from the
/// sortable 64-character alphabet, so plain string comparison orders HLCs by
/// logical time, then counter, then client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Hlc(String);

impl Hlc {
    /// The "never set" HLC, which sorts before every real one
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Parse and validate an encoded HLC
    pub fn parse(hlc: &str) -> Result<Self, CrdtError> {
        if hlc.is_empty() {
            return Ok(Self::empty());
        }
        if hlc.len() != HLC_LENGTH {
            return Err(CrdtError::invalid_hlc(
                hlc,
                format!("expected {HLC_LENGTH} characters, got {}", hlc.len()),
            ));
        }
        if let Some(bad) = hlc.chars().find(|c| !is_hlc_char(*c)) {
            return Err(CrdtError::invalid_hlc(hlc, format!("unexpected character {bad:?}")));
        }
        Ok(Self(hlc.to_string()))
    }

    pub(crate) fn from_encoded(encoded: String) -> Self {
        debug_assert_eq!(encoded.len(), HLC_LENGTH);
        Self(encoded)
    }

    /// Whether this HLC was never set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The encoded string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Hlc {
    type Error = CrdtError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Hlc::parse(&value)
    }
}

impl From<Hlc> for String {
    fn from(hlc: Hlc) -> Self {
        hlc.0
    }
}

impl AsRef<str> for Hlc {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Decoded parts of an HLC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HlcParts {
    /// 42-bit logical time in milliseconds
    pub logical_time: u64,
    /// 24-bit counter within one logical millisecond
    pub counter: u32,
    /// The encoded 30-bit client hash (last five characters)
    pub client_part: String,
}
