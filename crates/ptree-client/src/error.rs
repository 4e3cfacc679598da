//! Client error types.

use std::io;

use ptree_proto::{
    MessageType, ProtocolError,
    payloads::{
        tree::{CreateCode, DeleteCode},
        value::{SubscribeCode, UnsubscribeCode},
    },
};
use thiserror::Error;

/// Failures of a client request.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport I/O failed
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// A message could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection is closed
    #[error("disconnected")]
    Disconnected,

    /// No response within the configured request timeout
    #[error("request timed out")]
    Timeout,

    /// The server answered with a message of the wrong type
    #[error("unexpected response {0:?}")]
    UnexpectedResponse(MessageType),

    /// Create was rejected
    #[error("create failed: {0:?}")]
    CreateFailed(CreateCode),

    /// Delete was rejected
    #[error("delete failed: {0:?}")]
    DeleteFailed(DeleteCode),

    /// Subscribe was rejected
    #[error("subscribe failed: {0:?}")]
    SubscribeFailed(SubscribeCode),

    /// Unsubscribe was rejected
    #[error("unsubscribe failed: {0:?}")]
    UnsubscribeFailed(UnsubscribeCode),
}
