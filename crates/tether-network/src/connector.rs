//! Bounded TCP connect.
//!
//! The connector makes exactly one attempt to reach the remote endpoint,
//! bounded by the connect timeout. There is no retry: a failed attempt is
//! terminal for the session, and any retry policy belongs to whoever wraps
//! the whole session.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::RelayError;
use tether_core::Endpoint;

/// Single-attempt TCP connector.
///
/// # Example
///
/// ```no_run
/// use tether_core::Endpoint;
/// use tether_network::Connector;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = Connector::new(Endpoint::new("127.0.0.1", 8080)?, Duration::from_secs(10));
/// let stream = connector.connect().await?;
/// # drop(stream);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Connector {
    endpoint: Endpoint,
    timeout: Duration,
}

impl Connector {
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Connect to the endpoint.
    ///
    /// The returned stream has `TCP_NODELAY` set so typed lines go out
    /// immediately.
    ///
    /// # Errors
    ///
    /// - `RelayError::ConnectTimeout` if the attempt does not finish in time
    /// - `RelayError::Connect` if resolution fails or the peer refuses or is
    ///   unreachable
    pub async fn connect(&self) -> Result<TcpStream, RelayError> {
        info!("Connecting to {}", self.endpoint);

        let target = (self.endpoint.host(), self.endpoint.port());
        let stream = match tokio::time::timeout(self.timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                info!("Connected to {}", self.endpoint);
                stream
            }
            Ok(Err(e)) => {
                error!("Connection to {} failed: {}", self.endpoint, e);
                return Err(RelayError::Connect {
                    endpoint: self.endpoint.clone(),
                    source: e,
                });
            }
            Err(_) => {
                warn!(
                    "Connection to {} timed out after {}ms",
                    self.endpoint,
                    self.timeout.as_millis()
                );
                return Err(RelayError::ConnectTimeout {
                    endpoint: self.endpoint.clone(),
                    timeout_ms: millis(self.timeout),
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY: {}", e);
        }

        debug!(
            local_addr = ?stream.local_addr().ok(),
            peer_addr = ?stream.peer_addr().ok(),
            "Connection ready"
        );
        Ok(stream)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
