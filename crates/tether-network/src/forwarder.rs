//! Direction-agnostic record forwarding.
//!
//! A relay moves records in two directions with the same control flow:
//!
//! ```text
//! Uplink:   LineReader<stdin>       ──> FramedWrite<socket, LineCodec>
//! Downlink: LineReader<socket read> ──> OutputQueue (mpsc::Sender<Record>)
//! ```
//!
//! [`Forwarder`] is that control flow, parameterised by its source, its
//! [`RecordSink`] and its [`Direction`]. It pulls one record at a time,
//! delivers it, and stops on the first of:
//!
//! - source end-of-stream: closes the sink, and raises
//!   [`Completion::end_of_stream`] unless the sink reports the end itself
//! - read or write error: raises [`Completion::Failed`]
//! - the completion signal fired elsewhere: stops without writing further
//! - the sink went away (output queue receiver dropped)
//!
//! The [`OutputQueue`] reports the end itself: closing it lets the
//! coordinator write every record still queued before it sees the queue end
//! and raises [`Completion::RemoteClosed`].
//!
//! Raising is idempotent, so a forwarder that fails after the other
//! direction already ended the session does not fire a second time.
//!
//! The forwarder never closes the connection; it hands its source and sink
//! back to the coordinator in [`Forwarded`].

use std::future::Future;

use futures::{SinkExt, Stream, StreamExt};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tracing::{debug, error, trace};

use crate::{Completion, CompletionSignal, RelayError};
use tether_core::{Direction, Result};
use tether_protocol::{LineCodec, Record};

/// Outcome of delivering one record to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The record was accepted.
    Delivered,

    /// The receiving side is gone; nothing more can be delivered.
    Closed,
}

/// Destination of a forwarder.
///
/// The returned future must be `Send` so forwarders can run on their own
/// tasks.
pub trait RecordSink: Send {
    /// Deliver one record, flushing it through to the destination.
    fn deliver(&mut self, record: Record) -> impl Future<Output = Result<Delivery>> + Send;

    /// Called once the source has ended.
    ///
    /// Returns `true` if the receiving side will observe the end and raise
    /// the completion signal itself; the forwarder then does not raise.
    fn close(&mut self) -> bool {
        false
    }
}

impl<W> RecordSink for FramedWrite<W, LineCodec>
where
    W: AsyncWrite + Unpin + Send,
{
    fn deliver(&mut self, record: Record) -> impl Future<Output = Result<Delivery>> + Send {
        async move {
            self.send(record).await?;
            Ok(Delivery::Delivered)
        }
    }
}

/// Downlink end of the output queue.
///
/// Closing drops the sender, so the receiver drains what is queued and then
/// sees the end of the queue.
#[derive(Debug)]
pub struct OutputQueue {
    tx: Option<mpsc::Sender<Record>>,
}

impl OutputQueue {
    pub fn new(tx: mpsc::Sender<Record>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Whether the queue has been closed by this end.
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

impl RecordSink for OutputQueue {
    fn deliver(&mut self, record: Record) -> impl Future<Output = Result<Delivery>> + Send {
        async move {
            let Some(tx) = &self.tx else {
                return Ok(Delivery::Closed);
            };
            match tx.send(record).await {
                Ok(()) => Ok(Delivery::Delivered),
                Err(_) => Ok(Delivery::Closed),
            }
        }
    }

    fn close(&mut self) -> bool {
        self.tx.take().is_some()
    }
}

/// Why a forwarder stopped.
#[derive(Debug)]
pub enum Stop {
    /// The source ended.
    EndOfStream,

    /// The completion signal fired before the next record was delivered.
    Interrupted,

    /// The sink stopped accepting records.
    SinkClosed,

    /// Reading or writing failed.
    Failed(RelayError),
}

/// What a forwarder did, plus its source and sink handed back.
#[derive(Debug)]
pub struct Forwarded<S, K> {
    pub direction: Direction,
    pub records: u64,
    pub bytes: u64,
    pub stop: Stop,
    pub source: S,
    pub sink: K,
}

/// Moves records from a source to a sink until the session ends.
#[derive(Debug)]
pub struct Forwarder<S, K> {
    direction: Direction,
    source: S,
    sink: K,
    signal: CompletionSignal,
}

impl<S, K> Forwarder<S, K>
where
    S: Stream<Item = Result<Record>> + Unpin + Send,
    K: RecordSink,
{
    pub fn new(direction: Direction, source: S, sink: K, signal: CompletionSignal) -> Self {
        Self {
            direction,
            source,
            sink,
            signal,
        }
    }

    /// Forward until the source ends, an error occurs or the signal fires.
    pub async fn run(mut self) -> Forwarded<S, K> {
        let direction = self.direction;
        debug!(%direction, "Forwarder started");

        let mut records = 0u64;
        let mut bytes = 0u64;

        let stop = loop {
            let next = tokio::select! {
                biased;
                _ = self.signal.raised() => break Stop::Interrupted,
                next = self.source.next() => next,
            };

            let record = match next {
                Some(Ok(record)) => record,
                None => {
                    debug!(%direction, "Source reached end of stream");
                    if !self.sink.close() {
                        self.signal.raise(Completion::end_of_stream(direction));
                    }
                    break Stop::EndOfStream;
                }
                Some(Err(e)) => {
                    error!(%direction, "Read failed: {}", e);
                    self.signal.raise(Completion::Failed(direction));
                    break Stop::Failed(RelayError::Read {
                        direction,
                        source: e,
                    });
                }
            };

            let len = record.len() as u64;
            trace!(%direction, bytes = len, "Forwarding record");

            let delivered = tokio::select! {
                biased;
                _ = self.signal.raised() => break Stop::Interrupted,
                delivered = self.sink.deliver(record) => delivered,
            };

            match delivered {
                Ok(Delivery::Delivered) => {
                    records += 1;
                    bytes += len;
                }
                Ok(Delivery::Closed) => {
                    debug!(%direction, "Sink closed");
                    break Stop::SinkClosed;
                }
                Err(e) => {
                    error!(%direction, "Write failed: {}", e);
                    self.signal.raise(Completion::Failed(direction));
                    break Stop::Failed(RelayError::Write {
                        direction,
                        source: e,
                    });
                }
            }
        };

        debug!(%direction, records, bytes, ?stop, "Forwarder stopped");

        Forwarded {
            direction,
            records,
            bytes,
            stop,
            source: self.source,
            sink: self.sink,
        }
    }
}
