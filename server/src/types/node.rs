//! RDF terms as carried in patches.
//!
//! The patch log does not interpret terms. A `Node` only needs to survive
//! encoding and decoding unchanged, so it is a plain tagged value.

use std::fmt;

/// An RDF term: IRI, blank node, literal or variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Node {
    Iri(String),
    Blank(String),
    Literal {
        lexical: String,
        datatype: Option<String>,
        lang: Option<String>,
    },
    Variable(String),
}

impl Node {
    #[must_use]
    pub fn iri(iri: impl Into<String>) -> Self {
        Self::Iri(iri.into())
    }

    #[must_use]
    pub fn blank(label: impl Into<String>) -> Self {
        Self::Blank(label.into())
    }

    #[must_use]
    pub fn plain_literal(lexical: impl Into<String>) -> Self {
        Self::Literal {
            lexical: lexical.into(),
            datatype: None,
            lang: None,
        }
    }

    #[must_use]
    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self::Literal {
            lexical: lexical.into(),
            datatype: Some(datatype.into()),
            lang: None,
        }
    }

    #[must_use]
    pub fn lang_literal(lexical: impl Into<String>, lang: impl Into<String>) -> Self {
        Self::Literal {
            lexical: lexical.into(),
            datatype: None,
            lang: Some(lang.into()),
        }
    }

    #[must_use]
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    #[must_use]
    pub const fn is_iri(&self) -> bool {
        matches!(self, Self::Iri(_))
    }

    #[must_use]
    pub const fn is_blank(&self) -> bool {
        matches!(self, Self::Blank(_))
    }

    /// The lexical form of a literal without datatype or language.
    #[must_use]
    pub fn as_plain_str(&self) -> Option<&str> {
        match self {
            Self::Literal {
                lexical,
                datatype: None,
                lang: None,
            } => Some(lexical),
            _ => None,
        }
    }
}

/// Escape a string for a quoted literal.
pub(crate) fn escape_string(s: &str, out: &mut String) {
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
}

/// Write an IRI, escaping characters that would end the token.
///
/// A leading `_:` is written as `\u005F:` so that `<_:label>` stays the
/// blank node form.
pub(crate) fn escape_iri(s: &str, out: &mut String) {
    for (i, c) in s.chars().enumerate() {
        match c {
            '_' if i == 0 && s.starts_with("_:") => out.push_str("\\u005F"),
            '>' | '\\' | ' ' | '\n' | '\r' | '\t' | '<' | '"' => {
                out.push_str(&format!("\\u{:04X}", u32::from(c)));
            }
            _ => out.push(c),
        }
    }
}

impl fmt::Display for Node {
    /// Turtle-like term syntax, as used by the text patch format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        match self {
            Self::Iri(iri) => {
                out.push('<');
                escape_iri(iri, &mut out);
                out.push('>');
            }
            Self::Blank(label) => {
                out.push_str("_:");
                out.push_str(label);
            }
            Self::Literal {
                lexical,
                datatype,
                lang,
            } => {
                out.push('"');
                escape_string(lexical, &mut out);
                out.push('"');
                if let Some(lang) = lang {
                    out.push('@');
                    out.push_str(lang);
                }
                if let Some(dt) = datatype {
                    out.push_str("^^<");
                    escape_iri(dt, &mut out);
                    out.push('>');
                }
            }
            Self::Variable(name) => {
                out.push('?');
                out.push_str(name);
            }
        }
        f.write_str(&out)
    }
}
