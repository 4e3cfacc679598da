//! Frame: a header and the body it describes.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    codec::WireFormat,
    errors::Result,
    header::MessageHeader,
    message_type::MessageType,
};

/// A complete message as it travels on the wire.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message header; its size always matches `body`
    pub header: MessageHeader,
    /// Encoded message body
    pub body: Bytes,
}

impl Frame {
    /// Pair a header with a body received from the transport.
    pub fn new(header: MessageHeader, body: impl Into<Bytes>) -> Self {
        Self { header, body: body.into() }
    }

    /// Encode `body` and build a matching header.
    pub fn encode<T: WireFormat>(
        message_type: MessageType,
        transaction_id: u32,
        body: &T,
    ) -> Result<Self> {
        let header = MessageHeader::new(message_type, transaction_id, body.encoded_len())?;
        Ok(Self { header, body: body.to_bytes() })
    }

    /// Header followed by body, ready to write to the transport.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(MessageHeader::SIZE + self.body.len());
        out.put_slice(&self.header.to_bytes());
        out.put_slice(&self.body);
        out.freeze()
    }

    /// Transaction id from the header.
    #[must_use]
    pub fn transaction_id(&self) -> u32 {
        self.header.transaction_id()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 32;
        let shown = &self.body[..self.body.len().min(PREVIEW)];
        f.debug_struct("Frame")
            .field("type", &self.header.message_type_raw())
            .field("transaction_id", &self.header.transaction_id())
            .field("body_len", &self.body.len())
            .field("body", &hex::encode(shown))
            .finish()
    }
}
