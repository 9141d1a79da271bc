//! Patch header: an ordered map from field name to term.

use crate::types::{Id, Node};

pub const HEADER_ID: &str = "id";
pub const HEADER_PREVIOUS: &str = "previous";
/// Short alternative for `previous`.
pub const HEADER_PREV: &str = "prev";

/// Patch header fields in insertion order.
///
/// # Invariants
///
/// - Field names are unique; setting an existing field replaces its value
///   in place.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PatchHeader {
    fields: Vec<(String, Node)>,
}

impl PatchHeader {
    #[must_use]
    pub const fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// A header carrying `id` and, if given, `previous`.
    #[must_use]
    pub fn with_ids(id: &Id, previous: Option<&Id>) -> Self {
        let mut header = Self::new();
        header.set_id(id);
        if let Some(prev) = previous {
            header.set_previous(prev);
        }
        header
    }

    pub fn set(&mut self, field: impl Into<String>, value: Node) {
        let field = field.into();
        if let Some(slot) = self.fields.iter_mut().find(|(f, _)| *f == field) {
            slot.1 = value;
        } else {
            self.fields.push((field, value));
        }
    }

    pub fn set_id(&mut self, id: &Id) {
        self.set(HEADER_ID, id.as_node());
    }

    pub fn set_previous(&mut self, id: &Id) {
        self.set(HEADER_PREVIOUS, id.as_node());
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Node> {
        self.fields
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v)
    }

    /// Field lookup ignoring ASCII case.
    fn get_ignore_case(&self, field: &str) -> Option<&Node> {
        self.fields
            .iter()
            .find(|(f, _)| f.eq_ignore_ascii_case(field))
            .map(|(_, v)| v)
    }

    #[must_use]
    pub fn id(&self) -> Option<Id> {
        self.get_ignore_case(HEADER_ID).and_then(Id::from_node)
    }

    /// The predecessor patch, from `previous` or else `prev`.
    #[must_use]
    pub fn previous(&self) -> Option<Id> {
        self.get_ignore_case(HEADER_PREVIOUS)
            .or_else(|| self.get_ignore_case(HEADER_PREV))
            .and_then(Id::from_node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.fields.iter().map(|(f, v)| (f.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_in_place() {
        let mut header = PatchHeader::new();
        header.set("a", Node::plain_literal("1"));
        header.set("b", Node::plain_literal("2"));
        header.set("a", Node::plain_literal("3"));

        let fields: Vec<_> = header.iter().map(|(f, _)| f.to_string()).collect();
        assert_eq!(fields, vec!["a", "b"]);
        assert_eq!(header.get("a"), Some(&Node::plain_literal("3")));
    }

    #[test]
    fn test_previous_falls_back_to_prev() {
        let prev = Id::new();
        let mut header = PatchHeader::new();
        header.set(HEADER_PREV, prev.as_node());
        assert_eq!(header.previous(), Some(prev));
    }

    #[test]
    fn test_id_lookup_ignores_case() {
        let id = Id::new();
        let mut header = PatchHeader::new();
        header.set("ID", id.as_node());
        assert_eq!(header.id(), Some(id));
        assert_eq!(header.get("id"), None);
    }

    #[test]
    fn test_with_ids() {
        let id = Id::new();
        let prev = Id::new();
        let header = PatchHeader::with_ids(&id, Some(&prev));
        assert_eq!(header.id(), Some(id));
        assert_eq!(header.previous(), Some(prev));
        assert_eq!(header.len(), 2);

        let first = PatchHeader::with_ids(&Id::new(), None);
        assert_eq!(first.previous(), None);
    }
}
