//! Error types for the store and the framer.

use ptree_proto::Uuid;
use thiserror::Error;

/// Outcome of a failed store operation.
///
/// Every variant maps onto a response code; none of them end a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Path is not absolute, has an empty segment or an overlong segment
    #[error("malformed path")]
    MalformedPath,

    /// An ancestor of the path to create is missing or not a node
    #[error("parent not found")]
    ParentNotFound,

    /// A sibling with the same name exists
    #[error("property already exists")]
    AlreadyExist,

    /// Nodes and rpc endpoints cannot carry a payload
    #[error("payload not allowed for this property type")]
    TypeError,

    /// Nothing at the given path or uuid
    #[error("object not found")]
    ObjectNotFound,

    /// Node still has children
    #[error("node is not empty")]
    NotEmpty,

    /// Operation is not allowed on this property (the root)
    #[error("operation not permitted")]
    NotPermitted,

    /// Subscription target does not exist
    #[error("uuid {0} not found")]
    UuidNotFound(Uuid),

    /// Property exists but is not a value
    #[error("uuid {0} is not a value")]
    NotAValue(Uuid),

    /// Unsubscribe without a prior subscribe
    #[error("not subscribed to uuid {0}")]
    NotSubscribed(Uuid),

    /// Every uuid is in use
    #[error("uuid space exhausted")]
    UuidExhausted,
}

/// Framing failures. The framer resets and keeps going after each one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Header did not complete within the idle read allowance
    #[error("timed out waiting for header")]
    HeaderTimeout,

    /// Body did not complete within the idle read allowance
    #[error("timed out waiting for body")]
    BodyTimeout,

    /// Header declared a body above the configured ceiling
    #[error("declared body of {declared} bytes exceeds limit of {max}")]
    Oversized {
        /// Body size from the header
        declared: usize,
        /// Configured ceiling
        max: usize,
    },

    /// Header declared a total size smaller than the header
    #[error("declared size {declared} is smaller than the header")]
    Undersized {
        /// Total size from the header
        declared: u32,
    },
}
