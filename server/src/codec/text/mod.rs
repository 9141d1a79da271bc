//! Line-oriented text patch format.

pub mod reader;
pub mod tokenizer;
pub mod writer;

pub use reader::{TextPatchReader, read_header};
pub use writer::TextWriter;
