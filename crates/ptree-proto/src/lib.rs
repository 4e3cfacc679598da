//! Wire format for the property tree protocol.
//!
//! Every message is a fixed 9-byte header (zero-copy binary) followed by a
//! body whose layout is determined by the header's message type. Bodies are
//! sequences of little-endian integers, length-prefixed byte buffers and
//! strings, and count-prefixed block arrays of nested records.
//!
//! # Components
//!
//! - [`header`]: the 9-byte [`MessageHeader`]
//! - [`message_type`]: message type tags
//! - [`codec`]: the [`WireFormat`] trait and its primitive encodings
//! - [`payloads`]: typed message bodies and the [`Message`] enum
//! - [`frame`]: header plus body, ready for the transport
//!
//! # Security
//!
//! Decoding never reads past the supplied slice and never panics on peer
//! input. Every length and count is checked against the remaining bytes
//! before anything is allocated.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod errors;
pub mod flags;
pub mod frame;
pub mod header;
pub mod message_type;
pub mod payloads;

pub use codec::WireFormat;
pub use errors::{ProtocolError, Result};
pub use flags::FeatureFlags;
pub use frame::Frame;
pub use header::MessageHeader;
pub use message_type::MessageType;
pub use payloads::{Message, PropertyType};

/// Property identifier assigned by the server.
pub type Uuid = u32;

/// Uuid carried on the wire when there is no property to name.
pub const NO_UUID: Uuid = 0;

/// Protocol version negotiated during sign-in.
pub const PROTOCOL_VERSION: u32 = 1;

/// Transaction id carried by messages the server sends unprompted
/// (notifications and forwarded RPC calls).
pub const UNSOLICITED_TRANSACTION_ID: u32 = u32::MAX;
