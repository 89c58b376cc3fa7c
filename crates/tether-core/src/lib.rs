pub mod constants;
pub mod duration;
pub mod error;
pub mod types;

pub use duration::parse_duration;
pub use error::{Error, Result};
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
