//! Relay session coordinator.
//!
//! A [`Session`] owns one outbound TCP connection and everything that moves
//! records across it. It connects, starts the two forwarders, writes
//! downlink records to local output, and tears the whole thing down exactly
//! once when the session ends.
//!
//! # Architecture
//!
//! ```text
//!                   ┌──────────── Session (coordinator) ────────────┐
//! local input ──> Uplink Forwarder ──> socket write half ──> remote │
//!                   │                                               │
//! local output <── select! <── output queue <── Downlink Forwarder <── socket read half
//!                   │   ^                                           │
//!                   │   └── completion signal / deadline / cancel   │
//!                   └───────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! `Connecting → Active → Closing → Closed`, or `Connecting → Closed` when
//! the connect attempt fails. One deadline, computed when [`Session::run`]
//! starts, governs the whole session: it bounds the connect attempt and, once
//! connected, ends the relay when it passes.
//!
//! # Ending a session
//!
//! Whatever ends the session (a forwarder reaching end-of-stream or failing,
//! the deadline, or the caller's cancellation token) goes through the
//! [`CompletionSignal`]. The first raise wins, so the coordinator enters
//! `Closing` exactly once. A remote close is raised by the coordinator
//! itself once the output queue has drained, so records the peer sent
//! before closing still reach local output. During `Closing` it stops draining the output
//! queue, waits up to the shutdown grace period for both forwarders, aborts
//! any that overrun, then shuts the connection down.
//!
//! # Example
//!
//! ```no_run
//! use tether_core::Endpoint;
//! use tether_network::{RelayConfig, Session};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RelayConfig::new(Endpoint::new("127.0.0.1", 8080)?, Duration::from_secs(10));
//! let session = Session::new(config, tokio::io::stdin(), tokio::io::stdout());
//!
//! let report = session.run().await?;
//! println!("Session ended: {}", report.end);
//! # Ok(())
//! # }
//! ```

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::forwarder::{Forwarder, OutputQueue, Stop};
use crate::state::{SessionState, StateMachine, StateTransition};
use crate::{Completion, CompletionSignal, Connector, RelayError};
use tether_core::constants::{
    CLOSE_TIMEOUT_MS, DEFAULT_MAX_RECORD_LENGTH, DEFAULT_OUTPUT_QUEUE_CAPACITY,
    DEFAULT_SHUTDOWN_GRACE_MS,
};
use tether_core::{Direction, Endpoint};
use tether_protocol::{LineCodec, LineReader, Record};

/// Upper bound used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// Configuration for a relay session.
///
/// # Example
///
/// ```
/// use tether_core::Endpoint;
/// use tether_network::RelayConfig;
/// use std::time::Duration;
///
/// let config = RelayConfig::new(Endpoint::new("localhost", 23).unwrap(), Duration::from_secs(5))
///     .with_output_queue_capacity(16);
///
/// assert_eq!(config.output_queue_capacity, 16);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Remote endpoint to connect to
    pub endpoint: Endpoint,

    /// Session timeout, from the connect attempt through the relay
    pub timeout: Duration,

    /// Capacity of the downlink output queue, in records
    pub output_queue_capacity: usize,

    /// How long `Closing` waits for forwarders before aborting them
    pub shutdown_grace: Duration,

    /// Maximum record length in bytes, in both directions
    pub max_record_length: usize,
}

impl RelayConfig {
    /// Configuration with default queue, grace and record limits.
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            output_queue_capacity: DEFAULT_OUTPUT_QUEUE_CAPACITY,
            shutdown_grace: Duration::from_millis(DEFAULT_SHUTDOWN_GRACE_MS),
            max_record_length: DEFAULT_MAX_RECORD_LENGTH,
        }
    }

    pub fn with_output_queue_capacity(mut self, capacity: usize) -> Self {
        self.output_queue_capacity = capacity;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_max_record_length(mut self, max_record_length: usize) -> Self {
        self.max_record_length = max_record_length;
        self
    }

    /// Check the configuration before a session uses it.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Config` if the timeout is zero, or the queue
    /// capacity or record length limit is zero.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.timeout.is_zero() {
            return Err(RelayError::Config("timeout must be greater than zero".into()));
        }
        if self.output_queue_capacity == 0 {
            return Err(RelayError::Config(
                "output queue capacity must be greater than zero".into(),
            ));
        }
        if self.max_record_length == 0 {
            return Err(RelayError::Config(
                "maximum record length must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Summary of a session that ended without a stream error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    /// Remote endpoint of the session
    pub endpoint: Endpoint,

    /// What ended the session
    pub end: Completion,

    /// Records written to the connection
    pub records_sent: u64,

    /// Records read from the connection
    pub records_received: u64,

    /// Records written to local output
    pub records_written: u64,

    /// State transitions, oldest first
    pub history: Vec<StateTransition>,
}

impl SessionReport {
    /// Number of transitions into `state`.
    pub fn entries_into(&self, state: SessionState) -> usize {
        self.history.iter().filter(|t| t.to == state).count()
    }

    /// Path of states the session went through, starting at `Connecting`.
    pub fn path(&self) -> Vec<SessionState> {
        std::iter::once(SessionState::Connecting)
            .chain(self.history.iter().map(|t| t.to))
            .collect()
    }
}

/// One TCP relay session.
///
/// `I` is the local input (stdin in the CLI) and `O` the local output
/// (stdout). Both are generic so tests can drive a session with in-memory
/// streams.
pub struct Session<I, O> {
    config: RelayConfig,
    input: I,
    output: O,
    cancel: CancellationToken,
    state_tx: watch::Sender<SessionState>,
}

/// Moves the machine and publishes the new state to watchers.
fn advance(
    machine: &mut StateMachine,
    state_tx: &watch::Sender<SessionState>,
    state: SessionState,
) {
    if let Err(e) = machine.transition_to(state) {
        // Transitions are driven in a fixed order by the coordinator.
        error!("{}", e);
        return;
    }
    state_tx.send_replace(state);
}

impl<I, O> Session<I, O>
where
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin,
{
    pub fn new(config: RelayConfig, input: I, output: O) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Connecting);
        Self {
            config,
            input,
            output,
            cancel: CancellationToken::new(),
            state_tx,
        }
    }

    /// Token that ends the session when cancelled.
    ///
    /// Cancelling is a clean, caller-initiated end: `run` returns `Ok` with
    /// [`Completion::Cancelled`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Observe state changes while the session runs.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run the session to completion.
    ///
    /// # Errors
    ///
    /// - `RelayError::Config` if the configuration is invalid
    /// - `RelayError::Connect` / `RelayError::ConnectTimeout` if no connection
    ///   could be made; returned only once the timeout window has elapsed
    /// - `RelayError::Read` / `RelayError::Write` if a stream error on either
    ///   direction ended the session
    pub async fn run(self) -> Result<SessionReport, RelayError> {
        let Session {
            config,
            input,
            mut output,
            cancel,
            state_tx,
        } = self;
        config.validate()?;

        let now = Instant::now();
        let deadline = now
            .checked_add(config.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let mut machine = StateMachine::new();

        // Connecting
        let connector = Connector::new(config.endpoint.clone(), config.timeout);
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = connector.connect() => Some(result),
        };

        let stream = match connected {
            Some(Ok(stream)) => stream,
            Some(Err(e)) => {
                // Fixed-latency failure: wait out the rest of the window.
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = cancel.cancelled() => {}
                }
                advance(&mut machine, &state_tx, SessionState::Closed);
                return Err(e);
            }
            None => {
                info!("Session cancelled while connecting to {}", config.endpoint);
                advance(&mut machine, &state_tx, SessionState::Closed);
                return Ok(SessionReport {
                    endpoint: config.endpoint,
                    end: Completion::Cancelled,
                    records_sent: 0,
                    records_received: 0,
                    records_written: 0,
                    history: machine.into_history(),
                });
            }
        };

        // Active
        let (read_half, write_half) = stream.into_split();
        let signal = CompletionSignal::new();
        let (queue_tx, mut queue_rx) = mpsc::channel::<Record>(config.output_queue_capacity);
        let max = config.max_record_length;

        let uplink = Forwarder::new(
            Direction::Uplink,
            LineReader::with_max_length(input, max),
            FramedWrite::new(write_half, LineCodec::with_max_length(max)),
            signal.clone(),
        );
        let downlink = Forwarder::new(
            Direction::Downlink,
            LineReader::with_max_length(read_half, max),
            OutputQueue::new(queue_tx),
            signal.clone(),
        );
        let uplink_task = tokio::spawn(uplink.run());
        let downlink_task = tokio::spawn(downlink.run());

        advance(&mut machine, &state_tx, SessionState::Active);
        info!("Relay active with {}", config.endpoint);

        let mut records_written = 0u64;
        let end = loop {
            tokio::select! {
                biased;
                cause = signal.raised() => break cause,
                _ = tokio::time::sleep_until(deadline) => {
                    signal.raise(Completion::DeadlineElapsed);
                }
                _ = cancel.cancelled() => {
                    signal.raise(Completion::Cancelled);
                }
                next = queue_rx.recv() => {
                    // The downlink closes the queue at end-of-stream, after
                    // everything it received has been queued.
                    let Some(record) = next else {
                        signal.raise(Completion::RemoteClosed);
                        continue;
                    };
                    let written = tokio::select! {
                        biased;
                        _ = signal.raised() => continue,
                        written = write_output(&mut output, &record) => written,
                    };
                    match written {
                        Ok(()) => records_written += 1,
                        Err(e) => warn!("Failed to write to local output: {}", e),
                    }
                }
            }
        };

        // Closing
        advance(&mut machine, &state_tx, SessionState::Closing);
        info!("Closing session with {}: {}", config.endpoint, end);
        drop(queue_rx);

        let grace = config.shutdown_grace;
        let (uplink, downlink) = tokio::join!(
            join_forwarder(uplink_task, grace, Direction::Uplink),
            join_forwarder(downlink_task, grace, Direction::Downlink),
        );

        let records_sent = uplink.as_ref().map_or(0, |f| f.records);
        let records_received = downlink.as_ref().map_or(0, |f| f.records);
        let (uplink_stop, write_half) = match uplink {
            Some(f) => (Some(f.stop), Some(f.sink.into_inner())),
            None => (None, None),
        };
        let (downlink_stop, read_half) = match downlink {
            Some(f) => (Some(f.stop), Some(f.source.into_inner())),
            None => (None, None),
        };

        close_connection(write_half, read_half).await;
        if let Err(e) = output.flush().await {
            warn!("Failed to flush local output: {}", e);
        }

        // Closed
        advance(&mut machine, &state_tx, SessionState::Closed);
        info!(
            records_sent,
            records_received, records_written, "Session with {} closed", config.endpoint
        );

        if let Completion::Failed(direction) = end {
            let stop = match direction {
                Direction::Uplink => uplink_stop,
                Direction::Downlink => downlink_stop,
            };
            return Err(match stop {
                Some(Stop::Failed(e)) => e,
                _ => RelayError::Io(io::Error::other(format!("{direction} forwarder failed"))),
            });
        }

        Ok(SessionReport {
            endpoint: config.endpoint,
            end,
            records_sent,
            records_received,
            records_written,
            history: machine.into_history(),
        })
    }
}

/// Write one record to local output and flush it so it shows up immediately.
async fn write_output<O: AsyncWrite + Unpin>(output: &mut O, record: &Record) -> io::Result<()> {
    output.write_all(record.as_bytes()).await?;
    output.flush().await
}

/// Wait for a forwarder to stop, aborting it if it overruns the grace period.
async fn join_forwarder<T>(
    mut task: JoinHandle<T>,
    grace: Duration,
    direction: Direction,
) -> Option<T> {
    match tokio::time::timeout(grace, &mut task).await {
        Ok(Ok(forwarded)) => Some(forwarded),
        Ok(Err(e)) => {
            error!(%direction, "Forwarder task failed: {}", e);
            None
        }
        Err(_) => {
            warn!(
                %direction,
                "Forwarder did not stop within {}ms, aborting",
                grace.as_millis()
            );
            task.abort();
            None
        }
    }
}

/// Shut the connection down. Halves lost to an aborted forwarder were
/// already dropped with its task.
async fn close_connection(write_half: Option<OwnedWriteHalf>, read_half: Option<OwnedReadHalf>) {
    if let Some(mut write_half) = write_half {
        let close_timeout = Duration::from_millis(CLOSE_TIMEOUT_MS);
        match tokio::time::timeout(close_timeout, write_half.shutdown()).await {
            Ok(Ok(())) => debug!("Shutdown completed successfully"),
            Ok(Err(e)) => debug!("Error during shutdown: {}", e),
            Err(_) => warn!("Shutdown timeout during close ({}ms)", close_timeout.as_millis()),
        }
    }

    drop(read_half);
    debug!("Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    fn config_for(port: u16, timeout: Duration) -> RelayConfig {
        RelayConfig::new(Endpoint::new("127.0.0.1", port).unwrap(), timeout)
    }

    #[test]
    fn test_config_defaults() {
        let config = config_for(8080, Duration::from_secs(10));
        assert_eq!(config.output_queue_capacity, DEFAULT_OUTPUT_QUEUE_CAPACITY);
        assert_eq!(config.shutdown_grace.as_millis(), 500);
        assert_eq!(config.max_record_length, DEFAULT_MAX_RECORD_LENGTH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let zero_timeout = config_for(8080, Duration::ZERO);
        assert!(matches!(zero_timeout.validate(), Err(RelayError::Config(_))));

        let zero_queue = config_for(8080, Duration::from_secs(1)).with_output_queue_capacity(0);
        assert!(zero_queue.validate().is_err());

        let zero_record = config_for(8080, Duration::from_secs(1)).with_max_record_length(0);
        assert!(zero_record.validate().is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_connect() {
        let session = Session::new(
            config_for(8080, Duration::ZERO),
            tokio::io::empty(),
            tokio::io::sink(),
        );
        assert!(matches!(session.run().await, Err(RelayError::Config(_))));
    }

    #[tokio::test]
    async fn test_remote_close_before_data() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        // Local input that never produces anything
        let (_keep_open, input) = tokio::io::duplex(64);
        let session = Session::new(config_for(port, Duration::from_secs(5)), input, tokio::io::sink());

        let report = session.run().await.unwrap();
        assert_eq!(report.end, Completion::RemoteClosed);
        assert_eq!(
            report.path(),
            vec![
                SessionState::Connecting,
                SessionState::Active,
                SessionState::Closing,
                SessionState::Closed
            ]
        );
        assert_eq!(report.records_sent, 0);
        assert_eq!(report.records_received, 0);
        assert_eq!(report.records_written, 0);
    }

    #[tokio::test]
    async fn test_cancel_while_active() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(_)) = lines.next_line().await {}
        });

        let (_keep_open, input) = tokio::io::duplex(64);
        let session = Session::new(config_for(port, Duration::from_secs(5)), input, tokio::io::sink());
        let cancel = session.cancellation_token();
        let mut state = session.subscribe_state();

        let run = tokio::spawn(session.run());
        state.wait_for(|s| *s == SessionState::Active).await.unwrap();
        cancel.cancel();

        let report = run.await.unwrap().unwrap();
        assert_eq!(report.end, Completion::Cancelled);
        assert_eq!(report.entries_into(SessionState::Closing), 1);
        assert_eq!(*state.borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_deadline_ends_active_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let (_keep_open, input) = tokio::io::duplex(64);
        let session = Session::new(
            config_for(port, Duration::from_millis(200)),
            input,
            tokio::io::sink(),
        );

        let started = std::time::Instant::now();
        let report = session.run().await.unwrap();
        assert_eq!(report.end, Completion::DeadlineElapsed);
        assert!(started.elapsed() >= Duration::from_millis(190));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_report_serialization() {
        let report = SessionReport {
            endpoint: Endpoint::new("localhost", 23).unwrap(),
            end: Completion::RemoteClosed,
            records_sent: 1,
            records_received: 2,
            records_written: 2,
            history: vec![],
        };

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["end"], "remote_closed");
        assert_eq!(json["records_received"], 2);

        let back: SessionReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }
}
