//! Message header.
//!
//! ```text
//! offset  size  field
//! 0       1     message type
//! 1       4     total size, header included (LE)
//! 5       4     transaction id (LE)
//! ```
//!
//! The layout is packed and verified at compile time by `zerocopy`, so a
//! header can be read straight out of a receive buffer.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{LittleEndian, U32},
};

use crate::{
    errors::{ProtocolError, Result},
    message_type::MessageType,
};

/// Fixed-size header preceding every message body.
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
pub struct MessageHeader {
    message_type: u8,
    size: U32<LittleEndian>,
    transaction_id: U32<LittleEndian>,
}

const _: () = assert!(size_of::<MessageHeader>() == MessageHeader::SIZE);

impl MessageHeader {
    /// Encoded header size in bytes.
    pub const SIZE: usize = 9;

    /// Build a header for a body of `body_len` bytes.
    pub fn new(message_type: MessageType, transaction_id: u32, body_len: usize) -> Result<Self> {
        let size = u32::try_from(body_len + Self::SIZE)
            .map_err(|_| ProtocolError::LengthOverflow(body_len))?;
        Ok(Self {
            message_type: message_type.to_u8(),
            size: U32::new(size),
            transaction_id: U32::new(transaction_id),
        })
    }

    /// Read a header from the front of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from_prefix(bytes)
            .map(|(header, _)| header)
            .map_err(|_| ProtocolError::Truncated { needed: Self::SIZE, remaining: bytes.len() })
    }

    /// Raw header bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }

    /// Raw message type byte, possibly unknown.
    #[must_use]
    pub fn message_type_raw(&self) -> u8 {
        self.message_type
    }

    /// Parsed message type.
    pub fn message_type(&self) -> Result<MessageType> {
        MessageType::from_u8(self.message_type)
    }

    /// Total message size including the header.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.size.get()
    }

    /// Body size declared by this header.
    pub fn body_len(&self) -> Result<usize> {
        let size = self.size();
        (size as usize)
            .checked_sub(Self::SIZE)
            .ok_or(ProtocolError::UndersizedMessage(size))
    }

    /// Transaction id echoed in the response.
    #[must_use]
    pub fn transaction_id(&self) -> u32 {
        self.transaction_id.get()
    }
}
