//! Network layer for tether
//!
//! This crate relays newline-delimited records between local input/output
//! and a remote TCP endpoint, and provides the echo server used to try the
//! relay out.
//!
//! # Components
//!
//! - **Connector**: single bounded connect attempt
//! - **Forwarder**: moves records one direction, uplink or downlink
//! - **CompletionSignal**: close-once event that ends a session
//! - **Session**: coordinator that owns the connection and the lifecycle
//! - **EchoServer**: line echo peer
//!
//! # Example
//!
//! ```no_run
//! use tether_core::Endpoint;
//! use tether_network::{RelayConfig, Session};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint: Endpoint = "127.0.0.1:8080".parse()?;
//! let config = RelayConfig::new(endpoint, Duration::from_secs(10));
//!
//! let session = Session::new(config, tokio::io::stdin(), tokio::io::stdout());
//! let report = session.run().await?;
//! println!("{} records sent, {} received", report.records_sent, report.records_received);
//! # Ok(())
//! # }
//! ```

mod connector;
mod error;
mod forwarder;
mod server;
mod session;
mod signal;
mod state;

pub use connector::Connector;
pub use error::RelayError;
pub use forwarder::{Delivery, Forwarded, Forwarder, OutputQueue, RecordSink, Stop};
pub use server::{EchoServer, EchoServerConfig, EchoServerError, default_bind_addr};
pub use session::{RelayConfig, Session, SessionReport};
pub use signal::{Completion, CompletionSignal};
pub use state::{SessionState, StateMachine, StateTransition};
