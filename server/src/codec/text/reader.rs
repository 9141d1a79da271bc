//! Text patch reader.
//!
//! Consumes the token stream directly, one record at a time, and drives a
//! `PatchSink`. See `patch::processor` for the transaction state machine.

use std::io::BufRead;

use crate::codec::codes;
use crate::codec::text::tokenizer::{Token, TokenKind, Tokenizer};
use crate::patch::processor::TxnTracker;
use crate::patch::{PatchError, PatchHeader, PatchProcessor, PatchSink, Quad};
use crate::types::Node;

/// Whether a record closed a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordEnd {
    Continue,
    EndOfTransaction,
}

pub struct TextPatchReader<R> {
    tokenizer: Tokenizer<R>,
    tracker: TxnTracker,
}

impl<R: BufRead> TextPatchReader<R> {
    pub const fn new(input: R) -> Self {
        Self {
            tokenizer: Tokenizer::new(input),
            tracker: TxnTracker::new(),
        }
    }

    fn read_record(&mut self, sink: &mut dyn PatchSink) -> Result<RecordEnd, PatchError> {
        let code_token = self.tokenizer.next_token()?;
        let code = match &code_token.kind {
            TokenKind::Dot => return Err(parse_error(&code_token, "Empty line")),
            TokenKind::Word(w) => w.clone(),
            _ => {
                return Err(parse_error(
                    &code_token,
                    "Expected keyword at start of patch record",
                ));
            }
        };

        match code.as_str() {
            codes::HEADER => {
                let (field, value) = read_header_line(&mut self.tokenizer)?;
                sink.header(&field, &value)?;
            }
            codes::ADD_DATA | codes::DEL_DATA => {
                let subject = next_node(&mut self.tokenizer)?;
                let predicate = next_node(&mut self.tokenizer)?;
                let object = next_node(&mut self.tokenizer)?;
                let graph = next_node_maybe(&mut self.tokenizer)?;
                expect_dot(&mut self.tokenizer)?;
                let quad = Quad::new(graph, subject, predicate, object);
                self.tracker.data();
                if code == codes::ADD_DATA {
                    sink.add(&quad)?;
                } else {
                    sink.delete(&quad)?;
                }
            }
            codes::ADD_PREFIX => {
                let prefix = next_prefix(&mut self.tokenizer, &code_token)?;
                let uri_token = next_required(&mut self.tokenizer)?;
                let uri = match &uri_token.kind {
                    TokenKind::Iri(iri) => iri.clone(),
                    _ => uri_token.as_plain_string().map(str::to_string).ok_or_else(|| {
                        parse_error(&uri_token, "Prefix error: URI slot is not a URI nor a string")
                    })?,
                };
                let graph = next_node_maybe(&mut self.tokenizer)?;
                expect_dot(&mut self.tokenizer)?;
                self.tracker.data();
                sink.add_prefix(graph.as_ref(), &prefix, &uri)?;
            }
            codes::DEL_PREFIX => {
                let prefix = next_prefix(&mut self.tokenizer, &code_token)?;
                let graph = next_node_maybe(&mut self.tokenizer)?;
                expect_dot(&mut self.tokenizer)?;
                self.tracker.data();
                sink.delete_prefix(graph.as_ref(), &prefix)?;
            }
            codes::SET_BASE => {
                let token = next_required(&mut self.tokenizer)?;
                let base = match &token.kind {
                    TokenKind::Iri(iri) => iri.clone(),
                    _ => token
                        .as_plain_string()
                        .map(str::to_string)
                        .ok_or_else(|| parse_error(&token, "Base is not a URI nor a string"))?,
                };
                expect_dot(&mut self.tokenizer)?;
                sink.set_base(&base)?;
            }
            codes::TXN_BEGIN | codes::TXN_BEGIN_ALT => {
                expect_dot(&mut self.tokenizer)?;
                self.tracker.begin();
                sink.txn_begin()?;
            }
            codes::TXN_COMMIT => {
                expect_dot(&mut self.tokenizer)?;
                sink.txn_commit()?;
                self.tracker.end();
                return Ok(RecordEnd::EndOfTransaction);
            }
            codes::TXN_ABORT => {
                expect_dot(&mut self.tokenizer)?;
                sink.txn_abort()?;
                self.tracker.end();
                return Ok(RecordEnd::EndOfTransaction);
            }
            codes::SEGMENT => {
                expect_dot(&mut self.tokenizer)?;
                sink.segment()?;
            }
            other => {
                return Err(parse_error(
                    &code_token,
                    &format!("Code '{other}' not recognized"),
                ));
            }
        }
        Ok(RecordEnd::Continue)
    }
}

impl<R: BufRead> PatchProcessor for TextPatchReader<R> {
    fn apply_one(&mut self, sink: &mut dyn PatchSink) -> Result<(), PatchError> {
        loop {
            if self.tracker.is_finished() {
                return Ok(());
            }
            match self.tokenizer.has_next() {
                Ok(true) => {}
                Ok(false) => {
                    self.tracker.finish();
                    return Ok(());
                }
                Err(e) => return Err(self.tracker.fail(sink, e)),
            }
            match self.read_record(sink) {
                Ok(RecordEnd::EndOfTransaction) => return Ok(()),
                Ok(RecordEnd::Continue) => {}
                Err(e) => return Err(self.tracker.fail(sink, e)),
            }
        }
    }

    fn has_more(&mut self) -> Result<bool, PatchError> {
        if self.tracker.is_finished() {
            return Ok(false);
        }
        self.tokenizer.has_next()
    }

    fn fail(&mut self, sink: &mut dyn PatchSink, err: PatchError) -> PatchError {
        self.tracker.fail(sink, err)
    }
}

/// Read only the leading `H` records of a text patch.
pub fn read_header<R: BufRead>(input: R) -> Result<PatchHeader, PatchError> {
    let mut tokenizer = Tokenizer::new(input);
    let mut header = PatchHeader::new();
    loop {
        let token = tokenizer.peek()?;
        let is_header = match &token.kind {
            TokenKind::Eof => break,
            TokenKind::Dot => return Err(parse_error(token, "Empty header line")),
            TokenKind::Word(w) => w == codes::HEADER,
            _ => return Err(parse_error(token, "Expected keyword at start of patch header")),
        };
        if !is_header {
            break;
        }
        tokenizer.next_token()?;
        let (field, value) = read_header_line(&mut tokenizer)?;
        header.set(field, value);
    }
    Ok(header)
}

fn read_header_line<R: BufRead>(
    tokenizer: &mut Tokenizer<R>,
) -> Result<(String, Node), PatchError> {
    let token = next_required(tokenizer)?;
    let field = match &token.kind {
        TokenKind::Word(w) => w.clone(),
        _ => token.as_plain_string().map(str::to_string).ok_or_else(|| {
            parse_error(&token, "Header does not have a key that is a word")
        })?,
    };
    let value = next_node(tokenizer)?;
    expect_dot(tokenizer)?;
    Ok((field, value))
}

fn parse_error(token: &Token, message: &str) -> PatchError {
    PatchError::Parse {
        line: token.line,
        column: token.column,
        message: message.to_string(),
    }
}

/// Next token, which must be neither end of input nor the record end.
fn next_required<R: BufRead>(tokenizer: &mut Tokenizer<R>) -> Result<Token, PatchError> {
    let token = tokenizer.next_token()?;
    if token.is_dot() {
        return Err(parse_error(&token, "Input truncated by DOT: line too short"));
    }
    if token.is_eof() {
        return Err(PatchError::Truncated(
            "no DOT seen on last line".to_string(),
        ));
    }
    Ok(token)
}

fn next_prefix<R: BufRead>(
    tokenizer: &mut Tokenizer<R>,
    code: &Token,
) -> Result<String, PatchError> {
    let token = tokenizer.next_token()?;
    if token.is_dot() || token.is_eof() {
        return Err(parse_error(code, "Prefix tuple too short"));
    }
    match &token.kind {
        TokenKind::Word(w) => Ok(w.clone()),
        _ => token
            .as_plain_string()
            .map(str::to_string)
            .ok_or_else(|| parse_error(&token, "Prefix is not a string")),
    }
}

fn token_to_node(token: Token) -> Result<Node, PatchError> {
    match token.kind {
        TokenKind::Iri(iri) => Ok(Node::Iri(iri)),
        TokenKind::BlankNode(label) => Ok(Node::Blank(label)),
        TokenKind::Literal {
            lexical,
            datatype,
            lang,
        } => Ok(Node::Literal {
            lexical,
            datatype,
            lang,
        }),
        TokenKind::Variable(name) => Ok(Node::Variable(name)),
        TokenKind::Word(_) | TokenKind::Dot | TokenKind::Eof => {
            Err(parse_error(&token, "Expected an RDF term"))
        }
    }
}

fn next_node<R: BufRead>(tokenizer: &mut Tokenizer<R>) -> Result<Node, PatchError> {
    token_to_node(next_required(tokenizer)?)
}

fn next_node_maybe<R: BufRead>(tokenizer: &mut Tokenizer<R>) -> Result<Option<Node>, PatchError> {
    let token = tokenizer.peek()?;
    if token.is_dot() {
        return Ok(None);
    }
    if token.is_eof() {
        return Err(PatchError::Truncated(
            "no DOT seen on last line".to_string(),
        ));
    }
    let token = tokenizer.next_token()?;
    token_to_node(token).map(Some)
}

fn expect_dot<R: BufRead>(tokenizer: &mut Tokenizer<R>) -> Result<(), PatchError> {
    let token = tokenizer.next_token()?;
    if token.is_dot() {
        return Ok(());
    }
    if token.is_eof() {
        return Err(PatchError::Truncated(
            "no DOT seen on last line".to_string(),
        ));
    }
    Err(parse_error(&token, "Expected DOT at end of record"))
}
