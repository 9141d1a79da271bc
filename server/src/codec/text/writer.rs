//! Text patch writer.
//!
//! Each record is written on its own line: the opcode, the terms separated
//! by single spaces, then ` .`. The default graph is written as no graph
//! term.

use std::io::Write;

use crate::codec::codes;
use crate::codec::text::tokenizer::is_label_char;
use crate::patch::{PatchError, PatchSink, Quad};
use crate::types::Node;
use crate::types::node::escape_string;

pub struct TextWriter<W: Write> {
    out: W,
}

impl<W: Write> TextWriter<W> {
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn record(&mut self, code: &str, body: &str) -> Result<(), PatchError> {
        if body.is_empty() {
            writeln!(self.out, "{code} .")?;
        } else {
            writeln!(self.out, "{code} {body} .")?;
        }
        Ok(())
    }

    fn quad_record(&mut self, code: &str, quad: &Quad) -> Result<(), PatchError> {
        let mut body = String::new();
        push_node(&mut body, &quad.subject);
        body.push(' ');
        push_node(&mut body, &quad.predicate);
        body.push(' ');
        push_node(&mut body, &quad.object);
        if let Some(g) = &quad.graph {
            body.push(' ');
            push_node(&mut body, g);
        }
        self.record(code, &body)
    }
}

/// Write a term. Blank node labels and variable names escape whatever the
/// tokenizer would not read back as part of the label.
pub(crate) fn push_node(out: &mut String, node: &Node) {
    match node {
        Node::Blank(label) if label.is_empty() => out.push_str("<_:>"),
        Node::Blank(label) => {
            out.push_str("_:");
            push_label(out, label);
        }
        Node::Variable(name) => {
            out.push('?');
            push_label(out, name);
        }
        _ => out.push_str(&node.to_string()),
    }
}

fn push_label(out: &mut String, label: &str) {
    let last = label.chars().count().saturating_sub(1);
    for (i, c) in label.chars().enumerate() {
        if is_label_char(c) && !(c == '.' && i == last) {
            out.push(c);
        } else if u32::from(c) > 0xFFFF {
            out.push_str(&format!("\\U{:08X}", u32::from(c)));
        } else {
            out.push_str(&format!("\\u{:04X}", u32::from(c)));
        }
    }
}

fn push_word_or_string(out: &mut String, s: &str) {
    let is_word = s.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if is_word {
        out.push_str(s);
    } else {
        push_string(out, s);
    }
}

fn push_string(out: &mut String, s: &str) {
    out.push('"');
    escape_string(s, out);
    out.push('"');
}

impl<W: Write> PatchSink for TextWriter<W> {
    fn finish(&mut self) -> Result<(), PatchError> {
        self.out.flush()?;
        Ok(())
    }

    fn header(&mut self, field: &str, value: &Node) -> Result<(), PatchError> {
        let mut body = String::new();
        push_word_or_string(&mut body, field);
        body.push(' ');
        push_node(&mut body, value);
        self.record(codes::HEADER, &body)
    }

    fn add(&mut self, quad: &Quad) -> Result<(), PatchError> {
        self.quad_record(codes::ADD_DATA, quad)
    }

    fn delete(&mut self, quad: &Quad) -> Result<(), PatchError> {
        self.quad_record(codes::DEL_DATA, quad)
    }

    fn add_prefix(
        &mut self,
        graph: Option<&Node>,
        prefix: &str,
        uri: &str,
    ) -> Result<(), PatchError> {
        let mut body = String::new();
        push_string(&mut body, prefix);
        body.push(' ');
        push_string(&mut body, uri);
        if let Some(g) = graph {
            body.push(' ');
            push_node(&mut body, g);
        }
        self.record(codes::ADD_PREFIX, &body)
    }

    fn delete_prefix(&mut self, graph: Option<&Node>, prefix: &str) -> Result<(), PatchError> {
        let mut body = String::new();
        push_string(&mut body, prefix);
        if let Some(g) = graph {
            body.push(' ');
            push_node(&mut body, g);
        }
        self.record(codes::DEL_PREFIX, &body)
    }

    fn set_base(&mut self, uri: &str) -> Result<(), PatchError> {
        let mut body = String::new();
        push_string(&mut body, uri);
        self.record(codes::SET_BASE, &body)
    }

    fn txn_begin(&mut self) -> Result<(), PatchError> {
        self.record(codes::TXN_BEGIN, "")
    }

    fn txn_commit(&mut self) -> Result<(), PatchError> {
        self.record(codes::TXN_COMMIT, "")?;
        self.out.flush()?;
        Ok(())
    }

    fn txn_abort(&mut self) -> Result<(), PatchError> {
        self.record(codes::TXN_ABORT, "")?;
        self.out.flush()?;
        Ok(())
    }

    fn segment(&mut self) -> Result<(), PatchError> {
        self.record(codes::SEGMENT, "")
    }
}
