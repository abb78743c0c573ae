use crate::protocol::MsgKind;
use thiserror::Error;

/// Errors raised by the wire codec and the transport layer
#[derive(Error, Debug)]
pub enum NetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Message truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Unknown message kind: {0}")]
    UnknownKind(u8),

    #[error("Unexpected message kind: expected {expected:?}, got {actual:?}")]
    UnexpectedKind { expected: MsgKind, actual: MsgKind },

    #[error("Too many elements for a bounded message: {count} > {max}")]
    TooManyElements { count: usize, max: usize },

    #[error("Operation `{operation}` is not supported by a {role} socket")]
    InvalidRole {
        operation: &'static str,
        role: &'static str,
    },

    #[error("No remote endpoint to send to")]
    NotConnected,

    #[error("Handshake failed after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },

    #[error("Could not resolve an IPv4 address for {0}")]
    UnresolvedHost(String),
}

pub type NetResult<T> = Result<T, NetError>;
