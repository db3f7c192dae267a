//! Opaque identifiers.
//!
//! Callers hold these handles, never references into the bus registry.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle for a session registered on the bus.
///
/// `SessionId::BUS` is reserved for bus-originated messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Sender id of messages the bus emits itself (e.g. `SessionClosed`).
    pub const BUS: Self = Self(0);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn is_bus(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bus() {
            f.write_str("bus")
        } else {
            write!(f, "s{}", self.0)
        }
    }
}

/// Monotonic id of a reload generation, scoped to one application session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationId(u64);

impl GenerationId {
    pub const FIRST: Self = Self(1);

    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id following this one.
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Name of a compiled unit (e.g. `com.example.Foo`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitName(String);

impl UnitName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UnitName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_display() {
        assert_eq!(SessionId::BUS.to_string(), "bus");
        assert_eq!(SessionId::new(7).to_string(), "s7");
        assert!(SessionId::BUS.is_bus());
    }

    #[test]
    fn test_generation_next_is_strictly_greater() {
        let first = GenerationId::FIRST;
        assert!(first.next() > first);
        assert_eq!(first.next().get(), 2);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&GenerationId::new(4)).unwrap();
        assert_eq!(json, "4");
        let name: UnitName = serde_json::from_str("\"com.example.Foo\"").unwrap();
        assert_eq!(name.as_str(), "com.example.Foo");
    }
}
