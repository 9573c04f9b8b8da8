//! Error types shared by the supervisor, detector and device roles.

use std::io;
use thiserror::Error;

/// Failure decoding an [`crate::codec::IpcMessage`] off a child pipe.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The pipe was closed with no bytes (or a partial message) pending.
    #[error("pipe closed (eof)")]
    Eof,
    /// The read would have blocked; no full message is available yet.
    #[error("would block")]
    WouldBlock,
    /// The message type tag or payload was not well formed.
    #[error("malformed ipc message: {reason}")]
    Malformed { reason: String },
    /// The underlying pipe read failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Fatal errors that abort supervisor startup.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to bind osc server on port {port}: {source}")]
    OscBind { port: u16, source: io::Error },
    #[error("failed to spawn detector child: {0}")]
    DetectorSpawn(#[source] io::Error),
    #[error("failed to initialize event loop: {0}")]
    EventLoop(#[source] io::Error),
    #[error("failed to create configuration directory: {0}")]
    ConfigDir(#[source] io::Error),
}
