use thiserror::Error;

/// All errors produced by the GameLink channel layer.
#[derive(Debug, Error)]
pub enum GameLinkError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort { expected: usize, actual: usize },

    #[error("datagram length mismatch: frame declares {expected} bytes, datagram carries {actual}")]
    DatagramLengthMismatch { expected: usize, actual: usize },

    #[error("undefined flag bits set: 0x{0:02x}")]
    UnknownFlags(u8),

    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("engine is shut down")]
    EngineClosed,

    #[error("no receive callback registered")]
    CallbackNotSet,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, GameLinkError>;
