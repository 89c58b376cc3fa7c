//! Record reader over any async byte stream.
//!
//! [`LineReader`] turns an `AsyncRead` (a socket half, stdin, an in-memory
//! buffer) into a lazy sequence of [`Record`]s. It is what both relay
//! directions read from.
//!
//! # Example
//!
//! ```
//! use tether_protocol::LineReader;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> tether_core::Result<()> {
//! let mut reader = LineReader::new(&b"first\nsecond\n"[..]);
//!
//! while let Some(record) = reader.next_record().await? {
//!     println!("{record}");
//! }
//! # Ok(())
//! # }
//! ```

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::{LineCodec, Record};
use tether_core::Result;

/// Reads newline-terminated records from a byte stream.
///
/// The sequence is finite and non-restartable: once `next_record` returns
/// `Ok(None)` or an error, the underlying stream is exhausted or broken.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: FramedRead<R, LineCodec>,
}

impl<R: AsyncRead> LineReader<R> {
    /// Wrap a stream with the default maximum record length.
    pub fn new(reader: R) -> Self {
        Self::with_codec(reader, LineCodec::new())
    }

    /// Wrap a stream with a custom maximum record length.
    pub fn with_max_length(reader: R, max_length: usize) -> Self {
        Self::with_codec(reader, LineCodec::with_max_length(max_length))
    }

    fn with_codec(reader: R, codec: LineCodec) -> Self {
        Self {
            inner: FramedRead::new(reader, codec),
        }
    }

    /// Get a reference to the underlying stream.
    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }

    /// Consume the reader, returning the underlying stream.
    ///
    /// Any bytes buffered but not yet returned as a record are lost.
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wait for the next record.
    ///
    /// - `Ok(Some(record))` - a record, terminator included
    /// - `Ok(None)` - the stream ended
    /// - `Err(_)` - I/O failure or a record over the length limit
    pub async fn next_record(&mut self) -> Result<Option<Record>> {
        self.inner.next().await.transpose()
    }
}

impl<R: AsyncRead + Unpin> Stream for LineReader<R> {
    type Item = Result<Record>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::Error;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_reads_records_in_order() {
        let mut reader = LineReader::new(&b"a\nbb\nccc\n"[..]);

        assert_eq!(reader.next_record().await.unwrap().unwrap().as_bytes(), b"a\n");
        assert_eq!(reader.next_record().await.unwrap().unwrap().as_bytes(), b"bb\n");
        assert_eq!(reader.next_record().await.unwrap().unwrap().as_bytes(), b"ccc\n");
        assert!(reader.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_stream_ends_immediately() {
        let mut reader = LineReader::new(&b""[..]);
        assert!(reader.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trailing_fragment_is_last_record() {
        let mut reader = LineReader::new(&b"done\nhalf"[..]);

        assert_eq!(reader.next_record().await.unwrap().unwrap().as_bytes(), b"done\n");
        let last = reader.next_record().await.unwrap().unwrap();
        assert_eq!(last.as_bytes(), b"half");
        assert!(!last.is_terminated());
        assert!(reader.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_over_limit_is_error() {
        let mut reader = LineReader::with_max_length(&b"way too long\n"[..], 4);

        let result = reader.next_record().await;
        assert!(matches!(result, Err(Error::RecordTooLong { max_length: 4 })));
    }

    #[tokio::test]
    async fn test_records_split_across_writes() {
        let (mut tx, rx) = tokio::io::duplex(3);
        tokio::spawn(async move {
            tx.write_all(b"hello wor").await.unwrap();
            tx.write_all(b"ld\nbye\n").await.unwrap();
        });

        let records: Vec<_> = LineReader::new(rx)
            .map(|r| r.unwrap().as_bytes().to_vec())
            .collect()
            .await;

        assert_eq!(records, vec![b"hello world\n".to_vec(), b"bye\n".to_vec()]);
    }

    #[tokio::test]
    async fn test_into_inner_returns_stream() {
        let reader = LineReader::new(&b"rest"[..]);
        assert_eq!(*reader.get_ref(), &b"rest"[..]);
        let inner = reader.into_inner();
        assert_eq!(inner, &b"rest"[..]);
    }
}
