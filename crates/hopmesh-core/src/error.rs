//! Error types for the mesh engine.

use thiserror::Error;

/// Configuration error
///
/// Returned synchronously by the tunable setters and by config loading. The
/// previously active value is always kept when one of these is returned.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A numeric tunable is outside its accepted range
    #[error("{field} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// A queue or table capacity of zero
    #[error("{0} must be at least 1")]
    ZeroCapacity(&'static str),

    /// Network name too long or not printable
    #[error("invalid network name: {0}")]
    InvalidNetworkName(String),

    /// Config file could not be parsed
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by mesh operations
#[derive(Error, Debug)]
pub enum MeshError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Payload does not fit the envelope
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    /// Payload contains a NUL byte, which terminates the wire field
    #[error("payload contains a NUL byte at offset {0}")]
    PayloadContainsNul(usize),

    /// Unicast destination is this node or the broadcast address
    #[error("invalid unicast destination {0}")]
    InvalidDestination(crate::mesh::NodeAddress),

    /// Outgoing queue is full
    #[error("outgoing queue full ({capacity} frames)")]
    QueueFull { capacity: usize },
}

/// Reasons a received buffer is not a valid envelope
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer length differs from the fixed frame size
    #[error("frame is {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    /// Message type tag is not known
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// A NUL-terminated field has no terminator
    #[error("{0} field is not NUL-terminated")]
    UnterminatedField(&'static str),

    /// Network name holds non-printable characters
    #[error("network name is not printable ASCII")]
    InvalidNetworkName,
}

/// Error reported by a [`Transport`](crate::mesh::Transport) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Radio is busy with another frame
    #[error("radio busy")]
    Busy,

    /// Next hop is not known to the radio layer
    #[error("unknown peer {0}")]
    UnknownPeer(crate::mesh::NodeAddress),

    /// Any other radio failure
    #[error("{0}")]
    Other(String),
}

/// Result type alias for mesh operations
pub type MeshResult<T> = std::result::Result<T, MeshError>;
