//! Typed message bodies.
//!
//! [`Message`] is the decoded form of a frame. Receivers decode once by the
//! header's type tag and dispatch with a `match`; senders build a variant and
//! call [`Message::into_frame`].

pub mod rpc;
pub mod session;
pub mod tree;
pub mod value;

use crate::{
    codec::{WireFormat, wire_enum},
    errors::Result,
    frame::Frame,
    message_type::MessageType,
};

wire_enum! {
    /// Kind of property in the tree.
    pub enum PropertyType as "property type" {
        /// Opaque byte payload that can be read, written and watched
        Value = 0,
        /// Container of other properties
        Node = 1,
        /// Endpoint whose invocations are forwarded to its creator
        Rpc = 2,
    }
}

/// Any protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Open a session
    SigninRequest(session::SigninRequest),
    /// Accepted version
    SigninResponse(session::SigninResponse),
    /// Create a property
    CreateRequest(tree::CreateRequest),
    /// Create outcome
    CreateResponse(tree::CreateResponse),
    /// Structural change notification
    MetaUpdateNotification(tree::MetaUpdateNotification),
    /// Delete a property
    DeleteRequest(tree::DeleteRequest),
    /// Delete outcome
    DeleteResponse(tree::DeleteResponse),
    /// Replace a value payload
    SetValueIndication(value::SetValueIndication),
    /// Subscribe to a value
    SubscribeRequest(value::SubscribeRequest),
    /// Subscribe outcome
    SubscribeResponse(value::SubscribeResponse),
    /// Value change notification
    PropertyUpdateNotification(value::PropertyUpdateNotification),
    /// Unsubscribe from a value
    UnsubscribeRequest(value::UnsubscribeRequest),
    /// Unsubscribe outcome
    UnsubscribeResponse(value::UnsubscribeResponse),
    /// Read a value
    GetValueRequest(value::GetValueRequest),
    /// Value payload
    GetValueResponse(value::GetValueResponse),
    /// Invoke an rpc endpoint
    RpcRequest(rpc::RpcRequest),
    /// Rpc return value
    RpcResponse(rpc::RpcResponse),
    /// Forwarded invocation
    HandleRpcRequest(rpc::HandleRpcRequest),
    /// Handler's answer
    HandleRpcResponse(rpc::HandleRpcResponse),
    /// Look up a path
    GetSpecificMetaRequest(tree::GetSpecificMetaRequest),
    /// Metadata of a path
    GetSpecificMetaResponse(tree::GetSpecificMetaResponse),
}

/// Expands `$body` once per variant with `$inner` bound to the payload.
macro_rules! each_variant {
    ($message:expr, $inner:ident => $body:expr) => {
        match $message {
            Message::SigninRequest($inner) => $body,
            Message::SigninResponse($inner) => $body,
            Message::CreateRequest($inner) => $body,
            Message::CreateResponse($inner) => $body,
            Message::MetaUpdateNotification($inner) => $body,
            Message::DeleteRequest($inner) => $body,
            Message::DeleteResponse($inner) => $body,
            Message::SetValueIndication($inner) => $body,
            Message::SubscribeRequest($inner) => $body,
            Message::SubscribeResponse($inner) => $body,
            Message::PropertyUpdateNotification($inner) => $body,
            Message::UnsubscribeRequest($inner) => $body,
            Message::UnsubscribeResponse($inner) => $body,
            Message::GetValueRequest($inner) => $body,
            Message::GetValueResponse($inner) => $body,
            Message::RpcRequest($inner) => $body,
            Message::RpcResponse($inner) => $body,
            Message::HandleRpcRequest($inner) => $body,
            Message::HandleRpcResponse($inner) => $body,
            Message::GetSpecificMetaRequest($inner) => $body,
            Message::GetSpecificMetaResponse($inner) => $body,
        }
    };
}

impl Message {
    /// Type tag of this message.
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::SigninRequest(_) => MessageType::SigninRequest,
            Self::SigninResponse(_) => MessageType::SigninResponse,
            Self::CreateRequest(_) => MessageType::CreateRequest,
            Self::CreateResponse(_) => MessageType::CreateResponse,
            Self::MetaUpdateNotification(_) => MessageType::MetaUpdateNotification,
            Self::DeleteRequest(_) => MessageType::DeleteRequest,
            Self::DeleteResponse(_) => MessageType::DeleteResponse,
            Self::SetValueIndication(_) => MessageType::SetValueIndication,
            Self::SubscribeRequest(_) => MessageType::SubscribePropertyUpdateRequest,
            Self::SubscribeResponse(_) => MessageType::SubscribePropertyUpdateResponse,
            Self::PropertyUpdateNotification(_) => MessageType::PropertyUpdateNotification,
            Self::UnsubscribeRequest(_) => MessageType::UnsubscribePropertyUpdateRequest,
            Self::UnsubscribeResponse(_) => MessageType::UnsubscribePropertyUpdateResponse,
            Self::GetValueRequest(_) => MessageType::GetValueRequest,
            Self::GetValueResponse(_) => MessageType::GetValueResponse,
            Self::RpcRequest(_) => MessageType::RpcRequest,
            Self::RpcResponse(_) => MessageType::RpcResponse,
            Self::HandleRpcRequest(_) => MessageType::HandleRpcRequest,
            Self::HandleRpcResponse(_) => MessageType::HandleRpcResponse,
            Self::GetSpecificMetaRequest(_) => MessageType::GetSpecificMetaRequest,
            Self::GetSpecificMetaResponse(_) => MessageType::GetSpecificMetaResponse,
        }
    }

    /// Decode a body of the given type.
    pub fn decode(message_type: MessageType, body: &[u8]) -> Result<Self> {
        let message = match message_type {
            MessageType::SigninRequest => Self::SigninRequest(WireFormat::from_slice(body)?),
            MessageType::SigninResponse => Self::SigninResponse(WireFormat::from_slice(body)?),
            MessageType::CreateRequest => Self::CreateRequest(WireFormat::from_slice(body)?),
            MessageType::CreateResponse => Self::CreateResponse(WireFormat::from_slice(body)?),
            MessageType::MetaUpdateNotification => {
                Self::MetaUpdateNotification(WireFormat::from_slice(body)?)
            },
            MessageType::DeleteRequest => Self::DeleteRequest(WireFormat::from_slice(body)?),
            MessageType::DeleteResponse => Self::DeleteResponse(WireFormat::from_slice(body)?),
            MessageType::SetValueIndication => {
                Self::SetValueIndication(WireFormat::from_slice(body)?)
            },
            MessageType::SubscribePropertyUpdateRequest => {
                Self::SubscribeRequest(WireFormat::from_slice(body)?)
            },
            MessageType::SubscribePropertyUpdateResponse => {
                Self::SubscribeResponse(WireFormat::from_slice(body)?)
            },
            MessageType::PropertyUpdateNotification => {
                Self::PropertyUpdateNotification(WireFormat::from_slice(body)?)
            },
            MessageType::UnsubscribePropertyUpdateRequest => {
                Self::UnsubscribeRequest(WireFormat::from_slice(body)?)
            },
            MessageType::UnsubscribePropertyUpdateResponse => {
                Self::UnsubscribeResponse(WireFormat::from_slice(body)?)
            },
            MessageType::GetValueRequest => Self::GetValueRequest(WireFormat::from_slice(body)?),
            MessageType::GetValueResponse => Self::GetValueResponse(WireFormat::from_slice(body)?),
            MessageType::RpcRequest => Self::RpcRequest(WireFormat::from_slice(body)?),
            MessageType::RpcResponse => Self::RpcResponse(WireFormat::from_slice(body)?),
            MessageType::HandleRpcRequest => Self::HandleRpcRequest(WireFormat::from_slice(body)?),
            MessageType::HandleRpcResponse => {
                Self::HandleRpcResponse(WireFormat::from_slice(body)?)
            },
            MessageType::GetSpecificMetaRequest => {
                Self::GetSpecificMetaRequest(WireFormat::from_slice(body)?)
            },
            MessageType::GetSpecificMetaResponse => {
                Self::GetSpecificMetaResponse(WireFormat::from_slice(body)?)
            },
        };
        Ok(message)
    }

    /// Decode a complete frame.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        Self::decode(frame.header.message_type()?, &frame.body)
    }

    /// Encode into a frame carrying `transaction_id`.
    pub fn into_frame(self, transaction_id: u32) -> Result<Frame> {
        let message_type = self.message_type();
        each_variant!(&self, inner => Frame::encode(message_type, transaction_id, inner))
    }

    /// Encoded body size.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        each_variant!(self, inner => inner.encoded_len())
    }
}
