//! Server error types.

use std::{io, net::SocketAddr, time::Duration};

use thiserror::Error;

/// Errors that stop the server or a single session.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Transport I/O failed
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The peer did not accept a write in time
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// The session was stopped while writing
    #[error("session stopped")]
    Stopped,

    /// A message could not be encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ptree_proto::ProtocolError),
}
