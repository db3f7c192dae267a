//! Update units: one named piece of compiled content.

use serde::{Deserialize, Serialize};

use super::{ContentHash, UnitName};

/// Whether the unit is already known to the running process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitChange {
    New,
    Modified,
}

/// A compiled unit proposed for redefinition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUnit {
    pub unit_name: UnitName,
    pub content_hash: ContentHash,
    #[serde(with = "hex_bytes")]
    pub content: Vec<u8>,
    pub change: UnitChange,
}

impl UpdateUnit {
    /// Build a unit, hashing its content.
    pub fn new(unit_name: UnitName, content: Vec<u8>, change: UnitChange) -> Self {
        Self {
            content_hash: ContentHash::of(&content),
            unit_name,
            content,
            change,
        }
    }

    #[inline]
    pub fn is_new(&self) -> bool {
        self.change == UnitChange::New
    }
}

/// Binary content travels hex-encoded in JSON frames.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_hashes_content() {
        let unit = UpdateUnit::new("Foo".into(), b"body".to_vec(), UnitChange::Modified);
        assert_eq!(unit.content_hash, ContentHash::of(b"body"));
        assert!(!unit.is_new());
    }

    #[test]
    fn test_content_is_hex_on_the_wire() {
        let unit = UpdateUnit::new("Foo".into(), vec![0xde, 0xad], UnitChange::New);
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["content"], "dead");
        assert_eq!(json["change"], "new");
        let back: UpdateUnit = serde_json::from_value(json).unwrap();
        assert_eq!(back, unit);
    }
}
