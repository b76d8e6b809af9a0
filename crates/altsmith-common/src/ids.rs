//! Typed ID wrappers for type safety across altsmith.
//!
//! This module provides newtype wrappers to prevent mixing different kinds of
//! identifiers (e.g., using a run ID where a client ID is expected).
//!
//! * [`RunId`] — UUID generated for each processing run.
//! * [`ClientId`] — operator-chosen slug identifying a managed WordPress site.
//! * [`AssetId`] — site-scoped numeric media ID assigned by WordPress.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Generate a new random run ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a run ID from its string form.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<RunId> for Uuid {
    fn from(id: RunId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a registered client (one managed WordPress site).
///
/// Client IDs are operator-chosen slugs: 1-64 characters from
/// `[a-zA-Z0-9_-]`. The restriction keeps them safe to embed in URLs and log
/// lines without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Maximum accepted length for a client ID.
    pub const MAX_LEN: usize = 64;

    /// Validate and construct a client ID from a string.
    pub fn parse<S: AsRef<str>>(s: S) -> crate::Result<Self> {
        let s = s.as_ref();
        if s.is_empty() || s.len() > Self::MAX_LEN {
            return Err(crate::Error::invalid_input(format!(
                "client_id must be 1-{} characters",
                Self::MAX_LEN
            )));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(crate::Error::invalid_input(
                "client_id may only contain letters, digits, '-' and '_'",
            ));
        }
        Ok(Self(s.to_string()))
    }

    /// View the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Site-scoped identifier for a media asset, assigned by WordPress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(i64);

impl AssetId {
    /// Wrap a raw WordPress media ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw numeric value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl From<i64> for AssetId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<AssetId> for i64 {
    fn from(id: AssetId) -> Self {
        id.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_roundtrip() {
        let id = RunId::new();
        let parsed = RunId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn client_id_accepts_slugs() {
        assert!(ClientId::parse("acme-blog").is_ok());
        assert!(ClientId::parse("Client_01").is_ok());
        assert!(ClientId::parse("c").is_ok());
    }

    #[test]
    fn client_id_rejects_invalid() {
        assert!(ClientId::parse("").is_err());
        assert!(ClientId::parse("has space").is_err());
        assert!(ClientId::parse("slash/slash").is_err());
        assert!(ClientId::parse("a".repeat(65)).is_err());
    }

    #[test]
    fn client_id_serde_transparent() {
        let id = ClientId::parse("acme").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""acme""#);
        let back: ClientId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn asset_id_conversions() {
        let id = AssetId::new(42);
        assert_eq!(id.value(), 42);
        assert_eq!(i64::from(id), 42);
        assert_eq!(AssetId::from(42), id);
        assert_eq!(id.to_string(), "42");
    }
}
