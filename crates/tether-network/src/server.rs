//! Line echo server.
//!
//! A small TCP server that answers every line it receives with
//! `reply_prefix + line + "\n"`. It is the peer the relay is exercised
//! against: run `tether echo` in one terminal and `tether connect` in
//! another.
//!
//! # Architecture
//!
//! ```text
//! client 1 ┐
//!          │
//! client 2 ├──> EchoServer ──> one task per connection
//!          │        │              └──> Framed<TcpStream, LineCodec>
//! client n ┘        └──> CancellationToken (stop)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tether_network::{EchoServer, EchoServerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let server = EchoServer::bind(EchoServerConfig::default()).await?;
//! println!("Listening on {}", server.local_addr()?);
//!
//! let stop = CancellationToken::new();
//! server.run(stop).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Connections beyond `max_connections` are accepted and closed straight
//! away; the client sees the remote close before any data.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use tether_core::constants::{
    DEFAULT_ECHO_BIND_ADDR, DEFAULT_ECHO_MAX_CONNECTIONS, DEFAULT_ECHO_PREFIX,
    DEFAULT_MAX_RECORD_LENGTH,
};
use tether_protocol::{LineCodec, Record};

/// Configuration for the echo server
///
/// # Example
///
/// ```
/// use tether_network::EchoServerConfig;
///
/// let config = EchoServerConfig {
///     bind_addr: "127.0.0.1:0".parse().unwrap(),
///     ..Default::default()
/// };
/// assert_eq!(config.reply_prefix, "Received msg: ");
/// ```
#[derive(Debug, Clone)]
pub struct EchoServerConfig {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,

    /// Text placed before each echoed line
    pub reply_prefix: String,

    /// Maximum number of simultaneous connections
    pub max_connections: usize,

    /// Maximum line length accepted from a client
    pub max_record_length: usize,
}

impl Default for EchoServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            reply_prefix: DEFAULT_ECHO_PREFIX.to_string(),
            max_connections: DEFAULT_ECHO_MAX_CONNECTIONS,
            max_record_length: DEFAULT_MAX_RECORD_LENGTH,
        }
    }
}

impl EchoServerConfig {
    /// Default configuration bound to `bind_addr`.
    pub fn with_bind_addr(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }
}

/// Bookkeeping for one open connection
#[derive(Debug, Clone)]
struct ConnectionInfo {
    /// Server-assigned connection number
    id: u64,

    /// Remote client address
    remote_addr: SocketAddr,

    /// When the connection was established
    connected_at: DateTime<Utc>,
}

impl ConnectionInfo {
    /// How long the connection has been open
    fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }
}

/// Errors that can occur while running the echo server
#[derive(Debug, Error)]
pub enum EchoServerError {
    /// Failed to bind to address
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type ConnectionTable = Arc<Mutex<HashMap<u64, ConnectionInfo>>>;

/// TCP server that echoes lines back with a prefix.
pub struct EchoServer {
    /// TCP listener for accepting new connections
    listener: TcpListener,

    /// Open connections indexed by connection number
    connections: ConnectionTable,

    /// Server configuration
    config: EchoServerConfig,

    next_id: u64,
}

impl EchoServer {
    /// Bind the server to the configured address.
    ///
    /// # Errors
    ///
    /// Returns `EchoServerError::BindFailed` if the address is in use or
    /// cannot be bound.
    pub async fn bind(config: EchoServerConfig) -> Result<Self, EchoServerError> {
        info!("Binding echo server to {}", config.bind_addr);

        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(|source| EchoServerError::BindFailed {
                addr: config.bind_addr,
                source,
            })?;

        info!(
            "Echo server listening on {} (max {} connections)",
            config.bind_addr, config.max_connections
        );

        Ok(Self {
            listener,
            connections: Arc::new(Mutex::new(HashMap::new())),
            config,
            next_id: 1,
        })
    }

    /// Address the server actually listens on; useful with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, EchoServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &EchoServerConfig {
        &self.config
    }

    fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    /// Accept and serve connections until `stop` is cancelled.
    ///
    /// On stop, open connections are closed and their tasks joined before
    /// this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener itself fails.
    pub async fn run(mut self, stop: CancellationToken) -> Result<(), EchoServerError> {
        let mut tasks = JoinSet::new();
        let close_all = stop.child_token();

        let result = loop {
            let accepted = tokio::select! {
                _ = stop.cancelled() => break Ok(()),
                accepted = self.listener.accept() => accepted,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Connection task failed: {}", e);
                    }
                    continue;
                }
            };

            let (stream, addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Accept failed: {}", e);
                    break Err(EchoServerError::Io(e));
                }
            };
            debug!("Accepted new connection from {}", addr);

            let open = self.connection_count();
            if open >= self.config.max_connections {
                warn!(
                    addr = %addr,
                    max_connections = self.config.max_connections,
                    "Connection rejected: maximum connections reached"
                );
                drop(stream);
                continue;
            }

            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY for {}: {}", addr, e);
            }

            let info = ConnectionInfo {
                id: self.next_id,
                remote_addr: addr,
                connected_at: Utc::now(),
            };
            self.next_id += 1;
            info!(
                "Connection {} from {} (total: {})",
                info.id,
                addr,
                open + 1
            );
            lock(&self.connections).insert(info.id, info.clone());

            let connections = self.connections.clone();
            let codec = LineCodec::with_max_length(self.config.max_record_length);
            let prefix = self.config.reply_prefix.clone();
            let stop = close_all.clone();
            tasks.spawn(async move {
                serve(Framed::new(stream, codec), &prefix, &info, stop).await;
                lock(&connections).remove(&info.id);
                info!(
                    "Connection {} from {} closed after {}ms",
                    info.id,
                    info.remote_addr,
                    info.uptime().num_milliseconds()
                );
            });
        };

        close_all.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Connection task failed: {}", e);
            }
        }
        info!("Echo server stopped");

        result
    }
}

fn lock(connections: &ConnectionTable) -> std::sync::MutexGuard<'_, HashMap<u64, ConnectionInfo>> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build the reply for one received line. A CRLF terminator is treated as
/// a plain newline.
fn reply_for(prefix: &str, record: &Record) -> Record {
    let payload = record.payload();
    let payload = payload.strip_suffix(b"\r").unwrap_or(payload);
    let mut reply = BytesMut::with_capacity(prefix.len() + payload.len() + 1);
    reply.extend_from_slice(prefix.as_bytes());
    reply.extend_from_slice(payload);
    reply.extend_from_slice(b"\n");
    Record::new(reply.freeze())
}

async fn serve(
    mut framed: Framed<TcpStream, LineCodec>,
    prefix: &str,
    info: &ConnectionInfo,
    stop: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => break,
            next = framed.next() => next,
        };

        let record = match next {
            Some(Ok(record)) => record,
            Some(Err(e)) => {
                warn!(connection = info.id, "Failed to read line: {}", e);
                break;
            }
            None => break,
        };
        trace!(connection = info.id, bytes = record.len(), "Echoing line");

        if let Err(e) = framed.send(reply_for(prefix, &record)).await {
            warn!(connection = info.id, "Failed to send reply: {}", e);
            break;
        }
    }
}

/// Default bind address of the echo server.
pub fn default_bind_addr() -> SocketAddr {
    DEFAULT_ECHO_BIND_ADDR
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8080)))
}
