//! Close-once completion signal.
//!
//! Both forwarders and the coordinator's deadline can decide that a session
//! is over, often at nearly the same moment. [`CompletionSignal`] turns those
//! racing decisions into a single event: the first `raise` records its
//! [`Completion`] cause and wakes every waiter; later raises are no-ops that
//! return `false`.
//!
//! ```
//! use tether_network::{Completion, CompletionSignal};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let signal = CompletionSignal::new();
//! let uplink = signal.clone();
//!
//! assert!(uplink.raise(Completion::RemoteClosed));
//! assert!(!signal.raise(Completion::LocalInputClosed));
//!
//! assert_eq!(signal.raised().await, Completion::RemoteClosed);
//! # }
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use tether_core::Direction;

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// Local input reached end-of-stream.
    LocalInputClosed,

    /// The remote peer closed the connection.
    RemoteClosed,

    /// A forwarder hit a read or write error.
    Failed(Direction),

    /// The session deadline passed.
    DeadlineElapsed,

    /// The caller cancelled the session.
    Cancelled,
}

impl Completion {
    /// Completion raised by a forwarder whose source ran dry.
    pub fn end_of_stream(direction: Direction) -> Self {
        match direction {
            Direction::Uplink => Completion::LocalInputClosed,
            Direction::Downlink => Completion::RemoteClosed,
        }
    }

    /// Whether the session ended because of a stream error.
    pub fn is_failure(&self) -> bool {
        matches!(self, Completion::Failed(_))
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::LocalInputClosed => write!(f, "local input closed"),
            Completion::RemoteClosed => write!(f, "remote closed"),
            Completion::Failed(direction) => write!(f, "{direction} failed"),
            Completion::DeadlineElapsed => write!(f, "deadline elapsed"),
            Completion::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    cause: OnceLock<Completion>,
    fired: CancellationToken,
}

/// One-shot, idempotent broadcast that ends a session.
///
/// Clones share the same signal.
#[derive(Debug, Clone, Default)]
pub struct CompletionSignal {
    inner: Arc<Inner>,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal.
    ///
    /// Returns `true` if this call fired the signal, `false` if it had
    /// already been raised; in that case the original cause is kept.
    pub fn raise(&self, cause: Completion) -> bool {
        match self.inner.cause.set(cause) {
            Ok(()) => {
                debug!(%cause, "Completion signal raised");
                self.inner.fired.cancel();
                true
            }
            Err(_) => {
                trace!(%cause, "Completion signal already raised, ignoring");
                false
            }
        }
    }

    /// Whether the signal has fired.
    pub fn is_raised(&self) -> bool {
        self.inner.fired.is_cancelled()
    }

    /// The winning cause, once raised.
    pub fn cause(&self) -> Option<Completion> {
        self.inner.cause.get().copied()
    }

    /// Wait until the signal fires and return its cause.
    ///
    /// Cancel safe.
    pub async fn raised(&self) -> Completion {
        self.inner.fired.cancelled().await;
        // The cause is always stored before the token fires.
        self.cause().unwrap_or(Completion::Cancelled)
    }
}
