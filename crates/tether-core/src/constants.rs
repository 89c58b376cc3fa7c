//! Default values shared by the relay, the echo server and the CLI.
//!
//! Every tunable in the relay configuration and the echo server
//! configuration starts from one of these values. Keeping
//! them in one place means the CLI help text, the library defaults and the
//! tests all agree.
//!
//! # Usage
//!
//! ```
//! use tether_core::constants::*;
//! use std::time::Duration;
//!
//! let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
//! assert_eq!(timeout.as_secs(), 10);
//! assert_eq!(RECORD_TERMINATOR, b'\n');
//! ```

// ============================================================================
// Framing
// ============================================================================

/// Byte that terminates every record.
pub const RECORD_TERMINATOR: u8 = b'\n';

/// Default maximum record length in bytes (64 KB).
///
/// A peer that streams more than this without a newline is treated as a
/// read failure instead of growing the buffer without bound.
pub const DEFAULT_MAX_RECORD_LENGTH: usize = 64 * 1024;

// ============================================================================
// Session timing
// ============================================================================

/// Default session timeout in seconds.
///
/// Covers the whole session, from the connect attempt through the relay.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default timeout as accepted on the command line.
pub const DEFAULT_TIMEOUT_STR: &str = "10s";

/// Grace period granted to forwarders to stop after cancellation (ms).
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 500;

/// Bound on the final flush/shutdown of the connection during close (ms).
pub const CLOSE_TIMEOUT_MS: u64 = 500;

// ============================================================================
// Queues
// ============================================================================

/// Default capacity of the downlink output queue, in records.
pub const DEFAULT_OUTPUT_QUEUE_CAPACITY: usize = 64;

// ============================================================================
// Echo server
// ============================================================================

/// Default bind address of the echo server.
pub const DEFAULT_ECHO_BIND_ADDR: &str = "127.0.0.1:8080";

/// Prefix the echo server puts in front of every reply.
pub const DEFAULT_ECHO_PREFIX: &str = "Received msg: ";

/// Default maximum number of simultaneous echo connections.
pub const DEFAULT_ECHO_MAX_CONNECTIONS: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_string_matches_seconds() {
        assert_eq!(DEFAULT_TIMEOUT_STR, format!("{DEFAULT_TIMEOUT_SECS}s"));
    }

    #[test]
    fn test_close_timeout_within_grace() {
        assert!(CLOSE_TIMEOUT_MS <= DEFAULT_SHUTDOWN_GRACE_MS);
    }
}
