//! Tokio codec for newline-delimited records.
//!
//! `LineCodec` plugs record framing into Tokio's `FramedRead`/`FramedWrite`
//! so both relay directions can treat their streams as a `Stream` of
//! [`Record`]s and a `Sink` of [`Record`]s.
//!
//! # Framing
//!
//! ```text
//! TCP / stdin bytes -> Decoder -> Record ("line\n")
//! Record -> Encoder -> bytes (verbatim, no terminator added)
//! ```
//!
//! The decoder keeps the terminator on every record. When the stream ends
//! mid-line, the leftover bytes are emitted as a final, unterminated record
//! instead of being dropped.
//!
//! # DoS Protection
//!
//! A peer that never sends a newline would make the buffer grow without
//! bound. The codec rejects any record longer than `max_length` (default
//! 64 KB) with [`Error::RecordTooLong`].
//!
//! # Usage with Tokio Framed
//!
//! ```rust,no_run
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//! use tether_protocol::{LineCodec, Record};
//! use futures::{SinkExt, StreamExt};
//!
//! # async fn example() -> tether_core::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:8080").await?;
//! let mut framed = Framed::new(stream, LineCodec::new());
//!
//! framed.send(Record::from("ping\n")).await?;
//! if let Some(Ok(reply)) = framed.next().await {
//!     println!("Received: {reply}");
//! }
//! # Ok(())
//! # }
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::Record;
use tether_core::constants::{DEFAULT_MAX_RECORD_LENGTH, RECORD_TERMINATOR};
use tether_core::{Error, Result};

/// Tokio codec for newline-delimited records.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use tokio_util::codec::Decoder;
/// use tether_protocol::LineCodec;
///
/// let mut codec = LineCodec::new();
/// let mut buffer = BytesMut::from(&b"one\ntwo"[..]);
///
/// let first = codec.decode(&mut buffer).unwrap().unwrap();
/// assert_eq!(first.as_bytes(), b"one\n");
/// assert!(codec.decode(&mut buffer).unwrap().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct LineCodec {
    /// Offset up to which the buffer is known to contain no terminator.
    ///
    /// Avoids rescanning the same bytes every time more data arrives.
    next_index: usize,

    /// Maximum record length in bytes, terminator included.
    max_length: usize,
}

impl LineCodec {
    /// Create a codec with the default maximum record length (64 KB).
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_RECORD_LENGTH)
    }

    /// Create a codec with a custom maximum record length.
    ///
    /// ```
    /// use tether_protocol::LineCodec;
    ///
    /// let codec = LineCodec::with_max_length(1024);
    /// assert_eq!(codec.max_length(), 1024);
    /// ```
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
        }
    }

    /// Get the current maximum record length.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn too_long(&self) -> Error {
        Error::RecordTooLong {
            max_length: self.max_length,
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = Record;
    type Error = Error;

    /// Extract the next complete record from the buffer.
    ///
    /// - `Ok(Some(record))` - a complete record, terminator included
    /// - `Ok(None)` - need more data
    /// - `Err(Error::RecordTooLong)` - no terminator within `max_length` bytes
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Record>> {
        let newline = src[self.next_index..]
            .iter()
            .position(|b| *b == RECORD_TERMINATOR);

        match newline {
            Some(offset) => {
                let end = self.next_index + offset + 1;
                self.next_index = 0;
                if end > self.max_length {
                    return Err(self.too_long());
                }
                Ok(Some(Record::new(src.split_to(end).freeze())))
            }
            None if src.len() > self.max_length => Err(self.too_long()),
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    /// Like `decode`, but flushes a trailing unterminated fragment as the
    /// final record once the stream has ended.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Record>> {
        if let Some(record) = self.decode(src)? {
            return Ok(Some(record));
        }

        self.next_index = 0;
        if src.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Record::new(src.split().freeze())))
        }
    }
}

impl Encoder<Record> for LineCodec {
    type Error = Error;

    /// Write the record verbatim. The record already carries its terminator.
    fn encode(&mut self, item: Record, dst: &mut BytesMut) -> Result<()> {
        if item.len() > self.max_length {
            return Err(self.too_long());
        }

        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}
