//! Errors surfaced by a relay session.

use thiserror::Error;

use tether_core::{Direction, Endpoint};

/// Errors that end a relay session.
///
/// Local output write failures are deliberately absent: they are logged and
/// the session keeps running.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Resolution failed, or the peer refused or was unreachable.
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    /// Connect attempt did not complete in time.
    #[error("Connection to {endpoint} timed out after {timeout_ms}ms")]
    ConnectTimeout { endpoint: Endpoint, timeout_ms: u64 },

    /// Reading from the source of a forwarder failed.
    #[error("{direction} read failed: {source}")]
    Read {
        direction: Direction,
        #[source]
        source: tether_core::Error,
    },

    /// Writing to the sink of a forwarder failed.
    #[error("{direction} write failed: {source}")]
    Write {
        direction: Direction,
        #[source]
        source: tether_core::Error,
    },

    /// Configuration rejected before the session started.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Whether the session never got a connection.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            RelayError::Connect { .. } | RelayError::ConnectTimeout { .. }
        )
    }

    /// Direction of the forwarder that failed, for stream errors.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            RelayError::Read { direction, .. } | RelayError::Write { direction, .. } => {
                Some(*direction)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::new("127.0.0.1", 8080).unwrap()
    }

    #[test]
    fn test_connect_failure_classification() {
        let refused = RelayError::Connect {
            endpoint: endpoint(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        let timeout = RelayError::ConnectTimeout {
            endpoint: endpoint(),
            timeout_ms: 50,
        };

        assert!(refused.is_connect_failure());
        assert!(timeout.is_connect_failure());
        assert_eq!(refused.direction(), None);
    }

    #[test]
    fn test_stream_error_direction() {
        let err = RelayError::Write {
            direction: Direction::Uplink,
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe).into(),
        };

        assert!(!err.is_connect_failure());
        assert_eq!(err.direction(), Some(Direction::Uplink));
        assert!(err.to_string().starts_with("uplink write failed"));
    }

    #[test]
    fn test_timeout_message() {
        let err = RelayError::ConnectTimeout {
            endpoint: endpoint(),
            timeout_ms: 50,
        };
        assert_eq!(
            err.to_string(),
            "Connection to 127.0.0.1:8080 timed out after 50ms"
        );
    }
}
