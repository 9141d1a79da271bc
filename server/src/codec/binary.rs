//! Binary patch format: a stream of length-delimited protobuf rows.
//!
//! Each row carries exactly one record. The message types are declared
//! here with prost derives rather than generated from a `.proto` file.
//!
//! ```text
//! PatchRow {
//!   oneof row {
//!     PatchHeaderRow header     = 1;
//!     PatchDataRow   data_add   = 2;
//!     PatchDataRow   data_del   = 3;
//!     PrefixAdd      prefix_add = 4;
//!     PrefixDel      prefix_del = 5;
//!     TxnMarker      txn        = 6;
//!     string         base       = 7;
//!     Segment        segment    = 8;
//!   }
//! }
//! ```

use std::io::{BufRead, Read, Write};

use prost::Message;

use crate::patch::processor::TxnTracker;
use crate::patch::{PatchError, PatchHeader, PatchProcessor, PatchSink, Quad};
use crate::types::{Node, ProtoDeserializable, ProtoSerializable};

/// Largest row accepted by the reader.
pub const MAX_ROW_SIZE: u64 = 16 * 1024 * 1024;

#[allow(clippy::pedantic)]
#[allow(clippy::nursery)]
pub mod rows {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RdfLiteral {
        #[prost(string, tag = "1")]
        pub lex: String,
        #[prost(string, optional, tag = "2")]
        pub datatype: Option<String>,
        #[prost(string, optional, tag = "3")]
        pub lang: Option<String>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct RdfTerm {
        #[prost(oneof = "rdf_term::Term", tags = "1, 2, 3, 4")]
        pub term: Option<rdf_term::Term>,
    }

    pub mod rdf_term {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Term {
            #[prost(string, tag = "1")]
            Iri(String),
            #[prost(string, tag = "2")]
            Bnode(String),
            #[prost(message, tag = "3")]
            Literal(super::RdfLiteral),
            #[prost(string, tag = "4")]
            Variable(String),
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PatchHeaderRow {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(message, optional, tag = "2")]
        pub value: Option<RdfTerm>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PatchDataRow {
        #[prost(message, optional, tag = "1")]
        pub s: Option<RdfTerm>,
        #[prost(message, optional, tag = "2")]
        pub p: Option<RdfTerm>,
        #[prost(message, optional, tag = "3")]
        pub o: Option<RdfTerm>,
        /// Absent for the default graph.
        #[prost(message, optional, tag = "4")]
        pub g: Option<RdfTerm>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PrefixAdd {
        #[prost(message, optional, tag = "1")]
        pub graph_node: Option<RdfTerm>,
        #[prost(string, tag = "2")]
        pub prefix: String,
        #[prost(string, tag = "3")]
        pub iri: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PrefixDel {
        #[prost(message, optional, tag = "1")]
        pub graph_node: Option<RdfTerm>,
        #[prost(string, tag = "2")]
        pub prefix: String,
    }

    #[derive(Clone, Copy, PartialEq, ::prost::Message)]
    pub struct Segment {}

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
    #[repr(i32)]
    pub enum TxnMarker {
        Begin = 0,
        Commit = 1,
        Abort = 2,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct PatchRow {
        #[prost(oneof = "patch_row::Row", tags = "1, 2, 3, 4, 5, 6, 7, 8")]
        pub row: Option<patch_row::Row>,
    }

    pub mod patch_row {
        #[derive(Clone, PartialEq, ::prost::Oneof)]
        pub enum Row {
            #[prost(message, tag = "1")]
            Header(super::PatchHeaderRow),
            #[prost(message, tag = "2")]
            DataAdd(super::PatchDataRow),
            #[prost(message, tag = "3")]
            DataDel(super::PatchDataRow),
            #[prost(message, tag = "4")]
            PrefixAdd(super::PrefixAdd),
            #[prost(message, tag = "5")]
            PrefixDel(super::PrefixDel),
            #[prost(enumeration = "super::TxnMarker", tag = "6")]
            Txn(i32),
            #[prost(string, tag = "7")]
            Base(String),
            #[prost(message, tag = "8")]
            Segment(super::Segment),
        }
    }
}

use rows::patch_row::Row;
use rows::rdf_term::Term;
use rows::{
    PatchDataRow, PatchHeaderRow, PatchRow, PrefixAdd, PrefixDel, RdfLiteral, RdfTerm, TxnMarker,
};

impl ProtoSerializable<RdfTerm> for Node {
    fn to_proto(&self) -> RdfTerm {
        let term = match self {
            Self::Iri(iri) => Term::Iri(iri.clone()),
            Self::Blank(label) => Term::Bnode(label.clone()),
            Self::Literal {
                lexical,
                datatype,
                lang,
            } => Term::Literal(RdfLiteral {
                lex: lexical.clone(),
                datatype: datatype.clone(),
                lang: lang.clone(),
            }),
            Self::Variable(name) => Term::Variable(name.clone()),
        };
        RdfTerm { term: Some(term) }
    }
}

impl ProtoDeserializable<RdfTerm> for Node {
    fn from_proto(proto_obj: RdfTerm) -> Result<Self, String> {
        match proto_obj.term {
            Some(Term::Iri(iri)) => Ok(Self::Iri(iri)),
            Some(Term::Bnode(label)) => Ok(Self::Blank(label)),
            Some(Term::Literal(lit)) => Ok(Self::Literal {
                lexical: lit.lex,
                datatype: lit.datatype,
                lang: lit.lang,
            }),
            Some(Term::Variable(name)) => Ok(Self::Variable(name)),
            None => Err("RDF term has no value".to_string()),
        }
    }
}

fn required_node(term: Option<RdfTerm>, slot: &str) -> Result<Node, PatchError> {
    let term = term.ok_or_else(|| PatchError::Decode(format!("missing {slot}")))?;
    Node::from_proto(term).map_err(PatchError::Decode)
}

fn optional_node(term: Option<RdfTerm>) -> Result<Option<Node>, PatchError> {
    term.map(Node::from_proto)
        .transpose()
        .map_err(PatchError::Decode)
}

fn data_row(quad: &Quad) -> PatchDataRow {
    PatchDataRow {
        s: Some(quad.subject.to_proto()),
        p: Some(quad.predicate.to_proto()),
        o: Some(quad.object.to_proto()),
        g: quad.graph.as_ref().map(ProtoSerializable::to_proto),
    }
}

fn quad_from_row(row: PatchDataRow) -> Result<Quad, PatchError> {
    Ok(Quad::new(
        optional_node(row.g)?,
        required_node(row.s, "subject")?,
        required_node(row.p, "predicate")?,
        required_node(row.o, "object")?,
    ))
}

/// Writes each record as one length-delimited row.
pub struct BinaryWriter<W: Write> {
    out: W,
}

impl<W: Write> BinaryWriter<W> {
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn row(&mut self, row: Row) -> Result<(), PatchError> {
        let bytes = PatchRow { row: Some(row) }.encode_length_delimited_to_vec();
        self.out.write_all(&bytes)?;
        Ok(())
    }

    fn txn(&mut self, marker: TxnMarker) -> Result<(), PatchError> {
        self.row(Row::Txn(marker as i32))
    }
}

impl<W: Write> PatchSink for BinaryWriter<W> {
    fn finish(&mut self) -> Result<(), PatchError> {
        self.out.flush()?;
        Ok(())
    }

    fn header(&mut self, field: &str, value: &Node) -> Result<(), PatchError> {
        self.row(Row::Header(PatchHeaderRow {
            name: field.to_string(),
            value: Some(value.to_proto()),
        }))
    }

    fn add(&mut self, quad: &Quad) -> Result<(), PatchError> {
        self.row(Row::DataAdd(data_row(quad)))
    }

    fn delete(&mut self, quad: &Quad) -> Result<(), PatchError> {
        self.row(Row::DataDel(data_row(quad)))
    }

    fn add_prefix(
        &mut self,
        graph: Option<&Node>,
        prefix: &str,
        uri: &str,
    ) -> Result<(), PatchError> {
        self.row(Row::PrefixAdd(PrefixAdd {
            graph_node: graph.map(ProtoSerializable::to_proto),
            prefix: prefix.to_string(),
            iri: uri.to_string(),
        }))
    }

    fn delete_prefix(&mut self, graph: Option<&Node>, prefix: &str) -> Result<(), PatchError> {
        self.row(Row::PrefixDel(PrefixDel {
            graph_node: graph.map(ProtoSerializable::to_proto),
            prefix: prefix.to_string(),
        }))
    }

    fn set_base(&mut self, uri: &str) -> Result<(), PatchError> {
        self.row(Row::Base(uri.to_string()))
    }

    fn txn_begin(&mut self) -> Result<(), PatchError> {
        self.txn(TxnMarker::Begin)
    }

    fn txn_commit(&mut self) -> Result<(), PatchError> {
        self.txn(TxnMarker::Commit)?;
        self.out.flush()?;
        Ok(())
    }

    fn txn_abort(&mut self) -> Result<(), PatchError> {
        self.txn(TxnMarker::Abort)?;
        self.out.flush()?;
        Ok(())
    }

    fn segment(&mut self) -> Result<(), PatchError> {
        self.row(Row::Segment(rows::Segment {}))
    }
}

/// Read one length-delimited row. `Ok(None)` at a clean end of input.
fn read_row<R: BufRead>(input: &mut R) -> Result<Option<PatchRow>, PatchError> {
    let mut len: u64 = 0;
    let mut shift = 0u32;
    let mut first = true;
    loop {
        let mut byte = [0u8; 1];
        let n = input.read(&mut byte)?;
        if n == 0 {
            if first {
                return Ok(None);
            }
            return Err(PatchError::Truncated("row length cut short".to_string()));
        }
        first = false;
        len |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift >= 64 {
            return Err(PatchError::Decode("row length varint too long".to_string()));
        }
    }
    if len > MAX_ROW_SIZE {
        return Err(PatchError::Decode(format!("row of {len} bytes exceeds limit")));
    }
    let len = usize::try_from(len)
        .map_err(|_| PatchError::Decode("row length overflow".to_string()))?;
    let mut buf = vec![0u8; len];
    input.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            PatchError::Truncated(format!("row body shorter than {len} bytes"))
        } else {
            PatchError::Io(e)
        }
    })?;
    PatchRow::decode(buf.as_slice())
        .map(Some)
        .map_err(|e| PatchError::Decode(e.to_string()))
}

pub struct BinaryPatchReader<R> {
    input: R,
    pending: Option<PatchRow>,
    tracker: TxnTracker,
}

impl<R: BufRead> BinaryPatchReader<R> {
    pub const fn new(input: R) -> Self {
        Self {
            input,
            pending: None,
            tracker: TxnTracker::new(),
        }
    }

    fn next_row(&mut self) -> Result<Option<PatchRow>, PatchError> {
        match self.pending.take() {
            Some(row) => Ok(Some(row)),
            None => read_row(&mut self.input),
        }
    }

    /// Apply one row; returns true if it closed a transaction.
    fn apply_row(&mut self, row: PatchRow, sink: &mut dyn PatchSink) -> Result<bool, PatchError> {
        let Some(row) = row.row else {
            return Err(PatchError::Decode("empty row".to_string()));
        };
        match row {
            Row::Header(h) => {
                let value = required_node(h.value, "header value")?;
                sink.header(&h.name, &value)?;
            }
            Row::DataAdd(d) => {
                let quad = quad_from_row(d)?;
                self.tracker.data();
                sink.add(&quad)?;
            }
            Row::DataDel(d) => {
                let quad = quad_from_row(d)?;
                self.tracker.data();
                sink.delete(&quad)?;
            }
            Row::PrefixAdd(p) => {
                let graph = optional_node(p.graph_node)?;
                self.tracker.data();
                sink.add_prefix(graph.as_ref(), &p.prefix, &p.iri)?;
            }
            Row::PrefixDel(p) => {
                let graph = optional_node(p.graph_node)?;
                self.tracker.data();
                sink.delete_prefix(graph.as_ref(), &p.prefix)?;
            }
            Row::Txn(marker) => match TxnMarker::try_from(marker) {
                Ok(TxnMarker::Begin) => {
                    self.tracker.begin();
                    sink.txn_begin()?;
                }
                Ok(TxnMarker::Commit) => {
                    sink.txn_commit()?;
                    self.tracker.end();
                    return Ok(true);
                }
                Ok(TxnMarker::Abort) => {
                    sink.txn_abort()?;
                    self.tracker.end();
                    return Ok(true);
                }
                Err(_) => {
                    return Err(PatchError::Decode(format!("unknown transaction marker {marker}")));
                }
            },
            Row::Base(uri) => sink.set_base(&uri)?,
            Row::Segment(_) => sink.segment()?,
        }
        Ok(false)
    }
}

impl<R: BufRead> PatchProcessor for BinaryPatchReader<R> {
    fn apply_one(&mut self, sink: &mut dyn PatchSink) -> Result<(), PatchError> {
        loop {
            if self.tracker.is_finished() {
                return Ok(());
            }
            let row = match self.next_row() {
                Ok(Some(row)) => row,
                Ok(None) => {
                    self.tracker.finish();
                    return Ok(());
                }
                Err(e) => return Err(self.tracker.fail(sink, e)),
            };
            match self.apply_row(row, sink) {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => return Err(self.tracker.fail(sink, e)),
            }
        }
    }

    fn has_more(&mut self) -> Result<bool, PatchError> {
        if self.tracker.is_finished() {
            return Ok(false);
        }
        if self.pending.is_none() {
            self.pending = read_row(&mut self.input)?;
        }
        Ok(self.pending.is_some())
    }

    fn fail(&mut self, sink: &mut dyn PatchSink, err: PatchError) -> PatchError {
        self.tracker.fail(sink, err)
    }
}

/// Read only the leading header rows of a binary patch.
pub fn read_header<R: BufRead>(mut input: R) -> Result<PatchHeader, PatchError> {
    let mut header = PatchHeader::new();
    while let Some(row) = read_row(&mut input)? {
        match row.row {
            Some(Row::Header(h)) => {
                let value = required_node(h.value, "header value")?;
                header.set(h.name, value);
            }
            _ => break,
        }
    }
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::{ChangeItem, PatchCollector};

    #[test]
    fn test_literal_forms_survive() {
        for node in [
            Node::plain_literal("x"),
            Node::lang_literal("chat", "fr"),
            Node::typed_literal("1", "http://www.w3.org/2001/XMLSchema#integer"),
            Node::blank("b"),
            Node::variable("v"),
        ] {
            assert_eq!(Node::from_proto(node.to_proto()).expect("decode"), node);
        }
    }

    #[test]
    fn test_truncated_row_aborts() {
        let mut w = BinaryWriter::new(Vec::new());
        w.txn_begin().expect("begin");
        w.add(&Quad::new(
            None,
            Node::iri("http://x/s"),
            Node::iri("http://x/p"),
            Node::iri("http://x/o"),
        ))
        .expect("add");
        let mut bytes = w.into_inner();
        bytes.truncate(bytes.len() - 3);

        let mut reader = BinaryPatchReader::new(bytes.as_slice());
        let mut c = PatchCollector::new();
        let err = reader.apply(&mut c).expect_err("must fail");
        assert!(matches!(err, PatchError::Truncated(_)));
        assert_eq!(c.into_patch().items(), &[ChangeItem::TxnBegin, ChangeItem::TxnAbort]);
        assert!(!reader.has_more().expect("has_more"));
    }

    #[test]
    fn test_oversized_row_rejected() {
        let mut bytes = Vec::new();
        prost::encoding::encode_varint(MAX_ROW_SIZE + 1, &mut bytes);
        let mut reader = BinaryPatchReader::new(bytes.as_slice());
        let mut c = PatchCollector::new();
        assert!(matches!(reader.apply(&mut c), Err(PatchError::Decode(_))));
    }

    #[test]
    fn test_base_and_segment_rows() {
        let mut w = BinaryWriter::new(Vec::new());
        w.set_base("http://base/").expect("base");
        w.segment().expect("segment");
        let bytes = w.into_inner();

        let mut reader = BinaryPatchReader::new(bytes.as_slice());
        let mut c = PatchCollector::new();
        reader.apply(&mut c).expect("apply");
        assert_eq!(
            c.into_patch().items(),
            &[ChangeItem::SetBase("http://base/".to_string()), ChangeItem::Segment]
        );
    }
}
