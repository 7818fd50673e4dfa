//! Object identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identifier of a platform object.
///
/// Only the canonical hyphenated form is accepted; it is validated wherever an
/// identifier enters the client (parsing, deserialization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Length of the hyphenated textual form.
    const HYPHENATED_LEN: usize = 36;

    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::Validation("identifier must not be empty".to_string()));
        }
        if s.len() != Self::HYPHENATED_LEN {
            return Err(Error::Validation(format!(
                "malformed identifier {s:?}: expected a hyphenated UUID"
            )));
        }
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::Validation(format!("malformed identifier {s:?}: {e}")))
    }

    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for ObjectId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical() {
        let id = ObjectId::parse("690de890-13c0-4e76-8a01-e10ba8786e53").unwrap();
        assert_eq!(id.to_string(), "690de890-13c0-4e76-8a01-e10ba8786e53");
    }

    #[test]
    fn test_display_is_lowercase() {
        let id = ObjectId::parse("690DE890-13C0-4E76-8A01-E10BA8786E53").unwrap();
        assert_eq!(id.to_string(), "690de890-13c0-4e76-8a01-e10ba8786e53");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(ObjectId::parse(""), Err(Error::Validation(_))));
        assert!(matches!(
            ObjectId::parse("690de89013c04e768a01e10ba8786e53"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            ObjectId::parse("690de890-13c0-4e76-8a01-e10ba8786xyz"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_serde_validates() {
        let id: ObjectId =
            serde_json::from_str("\"690de890-13c0-4e76-8a01-e10ba8786e53\"").unwrap();
        assert_eq!(
            serde_json::to_string(&id).unwrap(),
            "\"690de890-13c0-4e76-8a01-e10ba8786e53\""
        );
        assert!(serde_json::from_str::<ObjectId>("\"not-a-uuid\"").is_err());
    }
}
