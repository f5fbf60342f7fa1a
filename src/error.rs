//! Typed error hierarchy surfaced by the stream façade (§7).
//!
//! This replaces the original's C++ exception classes
//! (`socket_error`, `socket_io_error`, `socket_eof_error`, ...) with a single
//! enum. `InvalidPacket` never escapes the public API: it is caught inside
//! the broker's dispatch loop, logged, and the offending datagram dropped.

use std::io;

pub type AuResult<T> = Result<T, AuError>;

#[derive(Debug, thiserror::Error)]
pub enum AuError {
    /// Operation attempted on a façade that was never connected/bound.
    #[error("socket is uninitialized")]
    SocketUninitialized,

    /// Hostname-to-address resolution failed.
    #[error("failed to resolve host: {0}")]
    HostResolveError(String),

    /// Setup failure: socket create/bind, or duplicate registration.
    #[error("socket error: {0}")]
    SocketError(String),

    /// A system call failed, or a short write was observed.
    #[error("socket io error: {0}")]
    SocketIoError(#[from] io::Error),

    /// The peer cleanly closed its side of the stream.
    #[error("socket reached eof")]
    SocketEofError,

    /// Internal only: a datagram failed checksum/length validation.
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),
}

impl AuError {
    /// Translates a locking-queue shutdown observed on the send path.
    pub fn send_shut_down() -> Self {
        AuError::SocketIoError(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "send queue was shut down",
        ))
    }

    /// Translates a locking-queue shutdown observed on the recv path.
    pub fn recv_shut_down() -> Self {
        AuError::SocketEofError
    }

    /// Surfaced by `send`/`recv` once a connection has been poisoned by an
    /// earlier raw-socket I/O failure.
    pub fn connection_poisoned() -> Self {
        AuError::SocketIoError(io::Error::new(
            io::ErrorKind::Other,
            "connection poisoned by an earlier raw-socket I/O error",
        ))
    }
}
