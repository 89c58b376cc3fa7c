//! Newline-delimited record framing for tether.
//!
//! - [`Record`]: one line of bytes, terminator included
//! - [`LineCodec`]: Tokio codec that frames records on any byte stream
//! - [`LineReader`]: lazy record sequence over an `AsyncRead`

pub mod codec;
pub mod reader;
pub mod record;

pub use codec::LineCodec;
pub use reader::LineReader;
pub use record::Record;
