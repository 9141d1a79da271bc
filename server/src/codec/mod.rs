//! Patch codecs.
//!
//! Two encodings carry the same `ChangeItem` sequence:
//!
//! - **Text**: one record per line, `CODE term* .`, terms in Turtle-like
//!   syntax. This is the format stored in the log and the default on the
//!   wire.
//! - **Binary**: length-delimited protobuf rows, one per record.
//!
//! Both readers implement `PatchProcessor` and both writers implement
//! `PatchSink`, so a patch can be copied from one encoding to the other by
//! driving a writer from a reader.

pub mod binary;
pub mod text;

use std::io::{BufRead, Read, Write};

use crate::patch::{Patch, PatchCollector, PatchError, PatchHeader, PatchProcessor, PatchSink};

/// Record opcodes of the text format.
pub mod codes {
    pub const HEADER: &str = "H";
    pub const ADD_DATA: &str = "A";
    pub const DEL_DATA: &str = "D";
    pub const ADD_PREFIX: &str = "PA";
    pub const DEL_PREFIX: &str = "PD";
    pub const SET_BASE: &str = "BA";
    /// Written for transaction begin.
    pub const TXN_BEGIN: &str = "TX";
    /// Also accepted for transaction begin.
    pub const TXN_BEGIN_ALT: &str = "TB";
    pub const TXN_COMMIT: &str = "TC";
    pub const TXN_ABORT: &str = "TA";
    pub const SEGMENT: &str = "Z";
}

pub const CONTENT_TYPE_TEXT: &str = "application/rdf-patch";
pub const CONTENT_TYPE_TEXT_ALT: &str = "text/rdf-patch";
pub const CONTENT_TYPE_BINARY: &str = "application/rdf-patch+binary";

/// Wire encoding of a patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatchFormat {
    #[default]
    Text,
    Binary,
}

impl PatchFormat {
    /// Pick a format from a `Content-Type` or `Accept` value. Unknown or
    /// missing values select text.
    #[must_use]
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(ct) = content_type else {
            return Self::Text;
        };
        let media = ct.split(';').next().unwrap_or("").trim();
        if media.eq_ignore_ascii_case(CONTENT_TYPE_BINARY) {
            Self::Binary
        } else {
            Self::Text
        }
    }

    #[must_use]
    pub const fn content_type(self) -> &'static str {
        match self {
            Self::Text => CONTENT_TYPE_TEXT,
            Self::Binary => CONTENT_TYPE_BINARY,
        }
    }

    /// A reader for this format over `input`.
    pub fn processor<'a, R: BufRead + 'a>(self, input: R) -> Box<dyn PatchProcessor + 'a> {
        match self {
            Self::Text => Box::new(text::TextPatchReader::new(input)),
            Self::Binary => Box::new(binary::BinaryPatchReader::new(input)),
        }
    }

    /// A writer for this format over `out`.
    pub fn writer<'a, W: Write + 'a>(self, out: W) -> Box<dyn PatchSink + 'a> {
        match self {
            Self::Text => Box::new(text::TextWriter::new(out)),
            Self::Binary => Box::new(binary::BinaryWriter::new(out)),
        }
    }
}

/// Read a complete patch.
///
/// # Errors
///
/// Returns `PatchError` if the input is malformed or truncated.
pub fn read_patch<R: BufRead>(format: PatchFormat, input: R) -> Result<Patch, PatchError> {
    let mut collector = PatchCollector::new();
    format.processor(input).apply(&mut collector)?;
    Ok(collector.into_patch())
}

/// Write a complete patch.
///
/// # Errors
///
/// Returns `PatchError` on I/O failure.
pub fn write_patch<W: Write>(format: PatchFormat, patch: &Patch, out: W) -> Result<(), PatchError> {
    let mut writer = format.writer(out);
    patch.play(writer.as_mut())
}

/// Read only the header of a patch.
///
/// # Errors
///
/// Returns `PatchError` if a header record is malformed.
pub fn read_header<R: BufRead>(format: PatchFormat, input: R) -> Result<PatchHeader, PatchError> {
    match format {
        PatchFormat::Text => text::read_header(input),
        PatchFormat::Binary => binary::read_header(input),
    }
}

/// Encode a patch into a byte buffer.
///
/// # Errors
///
/// Returns `PatchError` if a sink step fails.
pub fn encode(format: PatchFormat, patch: &Patch) -> Result<Vec<u8>, PatchError> {
    let mut buf = Vec::new();
    write_patch(format, patch, &mut buf)?;
    Ok(buf)
}

/// Decode a patch from bytes.
///
/// # Errors
///
/// Returns `PatchError` if the bytes are not a well-formed patch.
pub fn decode(format: PatchFormat, bytes: &[u8]) -> Result<Patch, PatchError> {
    read_patch(format, bytes)
}

/// Drive `sink` from an encoded stream, in record order.
///
/// # Errors
///
/// Returns the first decode or sink error.
pub fn transcode<R: Read>(
    from: PatchFormat,
    input: R,
    sink: &mut dyn PatchSink,
) -> Result<(), PatchError> {
    from.processor(std::io::BufReader::new(input)).apply(sink)
}
