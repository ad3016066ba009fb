use std::time::Duration;

use thiserror::Error;

/// Wire-level violations raised while reading a camera connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("unknown message kind 0x{0:02x}")]
    UnknownKind(u8),

    #[error("payload length {length} outside 1..={max}")]
    InvalidLength { length: u32, max: u32 },

    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("unexpected {0} message from camera")]
    UnexpectedKind(&'static str),

    #[error("no data received for {0:?}")]
    Timeout(Duration),

    #[error("connection closed in the middle of a message")]
    Truncated,

    #[error("connection closed before handshake")]
    ClosedBeforeHandshake,
}

/// Bridge-wide error type
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Decode fatal: {0}")]
    DecodeFatal(String),

    #[error("No sync anchors within {0:?}")]
    SyncTimeout(Duration),

    #[error("Sender unavailable: {0}")]
    SenderUnavailable(String),

    #[error("All {slots} camera slots are occupied")]
    ResourceExhausted { slots: usize },

    #[error("Invalid slot index {0}")]
    InvalidSlot(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
