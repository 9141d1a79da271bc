//! Identifiers for patches and data sources.
//!
//! An `Id` is normally a UUID. Ids read from external input that are not
//! UUIDs are kept as plain strings so that they still compare by value.
//!
//! # Encodings
//!
//! - Parameter form (`as_param`): the bare UUID, e.g. for query strings.
//! - String form (`as_string`): `id:<uuid>`.
//! - Node form (`as_node`): the IRI `uuid:<uuid>`, used in patch headers.
//! - Byte form (`as_bytes`): the 16 raw UUID bytes.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::types::node::Node;

const SCHEME: &str = "id:";
const SCHEME_UUID: &str = "uuid:";
const SCHEME_URN_UUID: &str = "urn:uuid:";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Repr {
    Uuid(Uuid),
    Str(String),
}

/// A patch or data source identifier.
///
/// # Invariants
///
/// - Equality is by value.
/// - The nil id (all-zero UUID) is never produced by `Id::new`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(Repr);

impl Id {
    /// Generate a fresh random (v4) id.
    #[must_use]
    pub fn new() -> Self {
        Self(Repr::Uuid(Uuid::new_v4()))
    }

    /// The distinguished nil id.
    #[must_use]
    pub const fn nil() -> Self {
        Self(Repr::Uuid(Uuid::nil()))
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(Repr::Uuid(uuid))
    }

    /// Parse an id from any of its string forms.
    ///
    /// Accepts `id:`, `uuid:` and `urn:uuid:` prefixes. Strings that are not
    /// UUIDs become string ids.
    #[must_use]
    pub fn from_string(s: &str) -> Self {
        let bare = s
            .strip_prefix(SCHEME)
            .or_else(|| s.strip_prefix(SCHEME_URN_UUID))
            .or_else(|| s.strip_prefix(SCHEME_UUID))
            .unwrap_or(s);
        Uuid::parse_str(bare).map_or_else(|_| Self(Repr::Str(bare.to_string())), Self::from_uuid)
    }

    /// Read an id from an RDF term: an IRI or a plain literal.
    ///
    /// Returns `None` for blank nodes, variables and typed literals.
    #[must_use]
    pub fn from_node(node: &Node) -> Option<Self> {
        match node {
            Node::Iri(iri) => Some(Self::from_string(iri)),
            Node::Literal {
                lexical,
                datatype: None,
                lang: None,
            } => Some(Self::from_string(lexical)),
            _ => None,
        }
    }

    /// Rebuild an id from its byte form.
    ///
    /// Sixteen bytes are read as a UUID; anything else as a UTF-8 string id.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if let Ok(uuid) = Uuid::from_slice(bytes) {
            return Some(Self::from_uuid(uuid));
        }
        std::str::from_utf8(bytes)
            .ok()
            .map(|s| Self(Repr::Str(s.to_string())))
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(&self.0, Repr::Uuid(u) if u.is_nil())
    }

    /// Suitable for an HTTP query string.
    #[must_use]
    pub fn as_param(&self) -> String {
        match &self.0 {
            Repr::Uuid(u) => u.to_string(),
            Repr::Str(s) => s.clone(),
        }
    }

    #[must_use]
    pub fn as_string(&self) -> String {
        match &self.0 {
            Repr::Uuid(u) => format!("{SCHEME}{u}"),
            Repr::Str(s) => s.clone(),
        }
    }

    #[must_use]
    pub fn as_node(&self) -> Node {
        match &self.0 {
            Repr::Uuid(u) => Node::iri(format!("{SCHEME_UUID}{u}")),
            Repr::Str(s) => Node::plain_literal(s.clone()),
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Vec<u8> {
        match &self.0 {
            Repr::Uuid(u) => u.as_bytes().to_vec(),
            Repr::Str(s) => s.as_bytes().to_vec(),
        }
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Repr::Uuid(u) if u.is_nil() => write!(f, "id:nil"),
            Repr::Uuid(u) => write!(f, "{SCHEME}{}", short_uuid(u)),
            Repr::Str(s) => write!(f, "{SCHEME}\"{s}\""),
        }
    }
}

/// A short, human-oriented prefix of a UUID for log lines.
fn short_uuid(uuid: &Uuid) -> String {
    let s = uuid.to_string();
    let len = match uuid.get_version_num() {
        4 => 6,
        _ => 8,
    };
    s[..len].to_string()
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_param())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_string(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_is_distinct_from_generated() {
        let nil = Id::nil();
        assert!(nil.is_nil());
        assert_eq!(nil.to_string(), "id:nil");
        for _ in 0..16 {
            let id = Id::new();
            assert!(!id.is_nil());
            assert_ne!(id, nil);
        }
    }

    #[test]
    fn test_string_forms_roundtrip() {
        let id = Id::new();
        assert_eq!(Id::from_string(&id.as_param()), id);
        assert_eq!(Id::from_string(&id.as_string()), id);
        assert!(id.as_string().starts_with("id:"));

        let urn = format!("urn:uuid:{}", id.as_param());
        assert_eq!(Id::from_string(&urn), id);
    }

    #[test]
    fn test_node_form_roundtrip() {
        let id = Id::new();
        let node = id.as_node();
        match &node {
            Node::Iri(iri) => assert!(iri.starts_with("uuid:")),
            other => panic!("expected IRI, got {other:?}"),
        }
        assert_eq!(Id::from_node(&node), Some(id));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let id = Id::new();
        let bytes = id.as_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(Id::from_bytes(&bytes), Some(id));
    }

    #[test]
    fn test_non_uuid_string_id() {
        let id = Id::from_string("id:my-patch");
        assert_eq!(id.as_param(), "my-patch");
        assert_eq!(id, Id::from_string("my-patch"));
        assert_eq!(id.to_string(), "id:\"my-patch\"");
        assert_eq!(Id::from_node(&id.as_node()), Some(id));
    }

    #[test]
    fn test_display_uses_short_prefix() {
        let id = Id::new();
        let shown = id.to_string();
        assert_eq!(shown.len(), "id:".len() + 6);
        assert!(id.as_param().starts_with(&shown["id:".len()..]));
    }

    #[test]
    fn test_serde_as_plain_string() {
        let id = Id::new();
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{}\"", id.as_param()));
        let back: Id = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }
}
