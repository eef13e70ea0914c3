use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Protocol mismatch: expected {expected}, got {actual}")]
    ProtocolMismatch { expected: String, actual: String },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Whether the stream ended cleanly on a frame boundary
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
