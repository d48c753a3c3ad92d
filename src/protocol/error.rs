//! Error types and wire error codes.

use enum_primitive_derive::Primitive;
use thiserror::Error;

use super::command::CommandTag;

/// An error encountered while reading or writing the wire protocol.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The peer speaks a protocol version we cannot interoperate with.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),
    /// A command other than what we were expecting was received.
    #[error("unexpected command: {0:?}")]
    UnexpectedCommand(CommandTag),
    /// The message is invalid.
    #[error("invalid message: {0}")]
    Invalid(String),
    /// An I/O error, such as an unexpected EOF in the middle of a tagstruct.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// The command is not implemented.
    #[error("unimplemented command: {0:?}")]
    Unimplemented(CommandTag),
    /// An error code sent by the peer.
    #[error("peer error: {0:?}")]
    PeerError(PulseError),
    /// A reply did not arrive in time.
    #[error("timeout waiting for reply")]
    Timeout,
}

/// An error code understood by the native protocol. The numeric values are
/// part of the wire format.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Primitive)]
pub enum PulseError {
    /// Access failure.
    AccessDenied = 1,
    /// Unknown command.
    Command = 2,
    /// Invalid argument.
    Invalid = 3,
    /// Entity exists.
    Exist = 4,
    /// No such entity.
    NoEntity = 5,
    /// Connection refused.
    ConnectionRefused = 6,
    /// Protocol error.
    Protocol = 7,
    /// Timeout.
    Timeout = 8,
    /// No authentication key.
    AuthKey = 9,
    /// Internal error.
    Internal = 10,
    /// Connection terminated.
    ConnectionTerminated = 11,
    /// Entity killed.
    Killed = 12,
    /// Invalid server.
    InvalidServer = 13,
    /// Module initialization failed.
    ModInitFailed = 14,
    /// Bad state.
    BadState = 15,
    /// No data.
    NoData = 16,
    /// Incompatible protocol version.
    Version = 17,
    /// Data too large.
    TooLarge = 18,
    /// Operation not supported.
    NotSupported = 19,
    /// The error code was unknown to the client.
    Unknown = 20,
    /// Extension does not exist.
    NoExtension = 21,
    /// Obsolete functionality.
    Obsolete = 22,
    /// Missing implementation.
    NotImplemented = 23,
    /// The caller forked without calling execve() and tried to reuse the context.
    Forked = 24,
    /// An IO error happened.
    Io = 25,
    /// Device or resource busy.
    Busy = 26,
}
