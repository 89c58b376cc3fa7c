//! Newline-delimited records.
//!
//! A [`Record`] is the unit of data a relay moves in either direction: the
//! bytes of one line, including its `\n` terminator. The terminator is kept
//! so that forwarding a record is a verbatim copy and the far side sees
//! exactly the bytes that were typed or received.

use bytes::Bytes;
use std::fmt;
use tether_core::constants::RECORD_TERMINATOR;

/// One newline-delimited unit of data.
///
/// Cloning is cheap: the bytes are reference counted.
///
/// # Example
///
/// ```
/// use tether_protocol::Record;
///
/// let record = Record::from("ping\n");
/// assert!(record.is_terminated());
/// assert_eq!(record.payload(), b"ping");
/// assert_eq!(record.as_bytes(), b"ping\n");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Record(Bytes);

impl Record {
    /// Wrap raw bytes as a record. No terminator is added.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Record(bytes.into())
    }

    /// Full record bytes, terminator included.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Record bytes without the trailing terminator, if any.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        self.0.strip_suffix(&[RECORD_TERMINATOR]).unwrap_or(&self.0)
    }

    /// Whether the record ends with the newline terminator.
    ///
    /// Only the last record of a stream that ended mid-line is unterminated.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.0.last() == Some(&RECORD_TERMINATOR)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl AsRef<[u8]> for Record {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Bytes> for Record {
    fn from(bytes: Bytes) -> Self {
        Record(bytes)
    }
}

impl From<Vec<u8>> for Record {
    fn from(bytes: Vec<u8>) -> Self {
        Record(Bytes::from(bytes))
    }
}

impl From<&str> for Record {
    fn from(s: &str) -> Self {
        Record(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Record {
    fn from(s: String) -> Self {
        Record(Bytes::from(s))
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.payload()))
    }
}
