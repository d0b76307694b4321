//! Common types used throughout Usher.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for an event.
///
/// The backend assigns positive ids. Negative ids are reserved for results
/// synthesized locally while offline and never appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(i64);

impl EventId {
    /// Create a new EventId from a raw id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// True for ids assigned locally to placeholder results.
    pub fn is_placeholder(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for EventId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Unique identifier for a user.
///
/// Same id convention as [`EventId`]: negative means locally synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(i64);

impl UserId {
    /// Create a new UserId from a raw id.
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// True for ids assigned locally to placeholder results.
    pub fn is_placeholder(&self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_roundtrip() {
        let id = EventId::new(42);
        assert_eq!(id.as_i64(), 42);
        assert_eq!(id.to_string(), "42");
        assert!(!id.is_placeholder());
    }

    #[test]
    fn test_placeholder_ids_are_negative() {
        assert!(EventId::new(-1_700_000_000_000).is_placeholder());
        assert!(UserId::new(-5).is_placeholder());
        assert!(!UserId::new(5).is_placeholder());
    }

    #[test]
    fn test_ids_serialize_as_bare_numbers() {
        let json = serde_json::to_string(&EventId::new(7)).unwrap();
        assert_eq!(json, "7");

        let back: UserId = serde_json::from_str("19").unwrap();
        assert_eq!(back, UserId::new(19));
    }
}
