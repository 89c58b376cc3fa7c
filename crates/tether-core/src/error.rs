use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Framing errors
    #[error("Record exceeds maximum length of {max_length} bytes")]
    RecordTooLong { max_length: usize },

    // Session errors
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Configuration errors
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
