//! Tokenizer for the text patch format.
//!
//! Reads the input one line at a time so that arbitrarily long patch
//! streams are processed without buffering the whole stream. Tokens do not
//! span lines; strings carry newlines only in escaped form.
//!
//! Token syntax:
//!
//! - `<iri>` with `\uXXXX` / `\UXXXXXXXX` escapes
//! - `_:label` blank node, or `<_:label>` when written in IRI form
//! - `"..."` string, optionally followed by `@lang`, `^^<datatype>` or both
//! - `?name` variable; labels and names take the same escapes as IRIs
//! - bare integer / decimal numbers
//! - words: a letter followed by letters, digits, `_` or `-`
//! - `.` record terminator
//! - `#` starts a comment that runs to the end of the line

use std::io::BufRead;

use crate::patch::PatchError;

const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Word(String),
    Iri(String),
    BlankNode(String),
    Literal {
        lexical: String,
        datatype: Option<String>,
        lang: Option<String>,
    },
    Variable(String),
    Dot,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u64,
    pub column: u64,
}

impl Token {
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    #[must_use]
    pub const fn is_dot(&self) -> bool {
        matches!(self.kind, TokenKind::Dot)
    }

    /// The text of a plain string literal.
    #[must_use]
    pub fn as_plain_string(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Literal {
                lexical,
                datatype: None,
                lang: None,
            } => Some(lexical),
            _ => None,
        }
    }
}

/// Streaming tokenizer over a buffered reader.
pub struct Tokenizer<R> {
    input: R,
    line: Vec<char>,
    pos: usize,
    line_number: u64,
    eof: bool,
    peeked: Option<Token>,
}

impl<R: BufRead> Tokenizer<R> {
    pub const fn new(input: R) -> Self {
        Self {
            input,
            line: Vec::new(),
            pos: 0,
            line_number: 0,
            eof: false,
            peeked: None,
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek(&mut self) -> Result<&Token, PatchError> {
        if self.peeked.is_none() {
            let token = self.read_token()?;
            self.peeked = Some(token);
        }
        match &self.peeked {
            Some(token) => Ok(token),
            None => Err(PatchError::Truncated("tokenizer lost its lookahead".to_string())),
        }
    }

    /// Consume the next token.
    pub fn next_token(&mut self) -> Result<Token, PatchError> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.read_token(),
        }
    }

    pub fn has_next(&mut self) -> Result<bool, PatchError> {
        Ok(!self.peek()?.is_eof())
    }

    const fn column(&self) -> u64 {
        self.pos as u64 + 1
    }

    fn error(&self, column: u64, message: impl Into<String>) -> PatchError {
        PatchError::Parse {
            line: self.line_number,
            column,
            message: message.into(),
        }
    }

    /// Load the next line. Returns false at end of input.
    fn fill_line(&mut self) -> Result<bool, PatchError> {
        if self.eof {
            return Ok(false);
        }
        let mut buf = String::new();
        let n = self.input.read_line(&mut buf)?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        self.line_number += 1;
        self.line = buf.chars().collect();
        self.pos = 0;
        Ok(true)
    }

    fn current(&self) -> Option<char> {
        self.line.get(self.pos).copied()
    }

    fn lookahead(&self, n: usize) -> Option<char> {
        self.line.get(self.pos + n).copied()
    }

    fn read_token(&mut self) -> Result<Token, PatchError> {
        loop {
            match self.current() {
                None => {
                    if !self.fill_line()? {
                        return Ok(Token {
                            kind: TokenKind::Eof,
                            line: self.line_number,
                            column: self.column(),
                        });
                    }
                }
                Some('#') => self.pos = self.line.len(),
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some(_) => break,
            }
        }

        let line = self.line_number;
        let column = self.column();
        let kind = match self.current() {
            Some('<') => self.read_iri()?,
            Some('"') => self.read_literal()?,
            Some('_') if self.lookahead(1) == Some(':') => {
                self.pos += 2;
                let label = self.read_label(column)?;
                if label.is_empty() {
                    return Err(self.error(column, "Blank node label missing"));
                }
                TokenKind::BlankNode(label)
            }
            Some('?') => {
                self.pos += 1;
                TokenKind::Variable(self.read_label(column)?)
            }
            Some('.') if !self.lookahead(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.pos += 1;
                TokenKind::Dot
            }
            Some(c) if c.is_ascii_alphabetic() => TokenKind::Word(
                self.read_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            ),
            Some(c) if c.is_ascii_digit() || c == '+' || c == '-' || c == '.' => {
                self.read_number(column)?
            }
            Some(c) => return Err(self.error(column, format!("Unexpected character '{c}'"))),
            None => return Err(self.error(column, "Unexpected end of line")),
        };
        Ok(Token { kind, line, column })
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.current() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }

    /// A blank node label or variable name, with escapes.
    fn read_label(&mut self, start: u64) -> Result<String, PatchError> {
        let mut out = String::new();
        loop {
            match self.current() {
                Some('\\') => {
                    let c = self.read_escape(start)?;
                    out.push(c);
                }
                // A label may contain '.', but not end with one.
                Some('.') if !self.lookahead(1).is_some_and(continues_label) => break,
                Some(c) if is_label_char(c) => {
                    out.push(c);
                    self.pos += 1;
                }
                _ => break,
            }
        }
        Ok(out)
    }

    fn read_iri(&mut self) -> Result<TokenKind, PatchError> {
        let start = self.column();
        self.pos += 1;
        // Decided on the raw text: an escaped `\u005F:` is an IRI.
        let blank = self.current() == Some('_') && self.lookahead(1) == Some(':');
        if blank {
            self.pos += 2;
        }
        let mut out = String::new();
        loop {
            match self.current() {
                None => return Err(self.error(start, "Unterminated IRI")),
                Some('>') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    let c = self.read_escape(start)?;
                    out.push(c);
                }
                Some(c) if c == ' ' || c == '\n' || c == '\r' => {
                    return Err(self.error(self.column(), "Bad character in IRI"));
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
        Ok(if blank {
            TokenKind::BlankNode(out)
        } else {
            TokenKind::Iri(out)
        })
    }

    fn read_literal(&mut self) -> Result<TokenKind, PatchError> {
        let start = self.column();
        self.pos += 1;
        let mut lexical = String::new();
        loop {
            match self.current() {
                None | Some('\n') => return Err(self.error(start, "Unterminated string")),
                Some('"') => {
                    self.pos += 1;
                    break;
                }
                Some('\\') => {
                    let c = self.read_escape(start)?;
                    lexical.push(c);
                }
                Some(c) => {
                    lexical.push(c);
                    self.pos += 1;
                }
            }
        }

        let mut datatype = None;
        let mut lang = None;
        if self.current() == Some('@') {
            self.pos += 1;
            let tag = self.read_while(|c| c.is_ascii_alphanumeric() || c == '-');
            if tag.is_empty() {
                return Err(self.error(self.column(), "Language tag missing"));
            }
            lang = Some(tag);
        }
        if self.current() == Some('^') && self.lookahead(1) == Some('^') {
            self.pos += 2;
            if self.current() != Some('<') {
                return Err(self.error(self.column(), "Datatype must be an IRI"));
            }
            match self.read_iri()? {
                TokenKind::Iri(dt) => datatype = Some(dt),
                _ => return Err(self.error(self.column(), "Datatype must be an IRI")),
            }
        }
        Ok(TokenKind::Literal {
            lexical,
            datatype,
            lang,
        })
    }

    fn read_escape(&mut self, start: u64) -> Result<char, PatchError> {
        self.pos += 1;
        let c = self
            .current()
            .ok_or_else(|| self.error(start, "Escape at end of line"))?;
        self.pos += 1;
        let simple = match c {
            'n' => Some('\n'),
            'r' => Some('\r'),
            't' => Some('\t'),
            '"' => Some('"'),
            '\'' => Some('\''),
            '\\' => Some('\\'),
            _ => None,
        };
        if let Some(s) = simple {
            return Ok(s);
        }
        let width = match c {
            'u' => 4,
            'U' => 8,
            _ => return Err(self.error(self.column(), format!("Bad escape '\\{c}'"))),
        };
        let end = self.pos + width;
        if end > self.line.len() {
            return Err(self.error(self.column(), "Truncated unicode escape"));
        }
        let hex: String = self.line[self.pos..end].iter().collect();
        self.pos = end;
        u32::from_str_radix(&hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error(self.column(), format!("Bad unicode escape '{hex}'")))
    }

    fn read_number(&mut self, column: u64) -> Result<TokenKind, PatchError> {
        let mut lexical = String::new();
        if let Some(c @ ('+' | '-')) = self.current() {
            lexical.push(c);
            self.pos += 1;
        }
        let digits = self.read_digits();
        lexical.push_str(&digits);
        let mut datatype = XSD_INTEGER;
        if self.current() == Some('.') && self.lookahead(1).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            lexical.push('.');
            lexical.push_str(&self.read_digits());
            datatype = XSD_DECIMAL;
        } else if digits.is_empty() {
            return Err(self.error(column, "Bad number"));
        }
        Ok(TokenKind::Literal {
            lexical,
            datatype: Some(datatype.to_string()),
            lang: None,
        })
    }

    fn read_digits(&mut self) -> String {
        let mut out = String::new();
        while let Some(c) = self.current().filter(char::is_ascii_digit) {
            out.push(c);
            self.pos += 1;
        }
        out
    }
}

/// Characters allowed in a blank node label or variable name.
pub(crate) fn is_label_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn continues_label(c: char) -> bool {
    is_label_char(c) || c == '\\'
}
