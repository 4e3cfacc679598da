//! Message type tags.
//!
//! The first byte of every header. Tags start at `0x2a` and are assigned in
//! declaration order.

use crate::errors::{ProtocolError, Result};

/// Message type carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client opens a session
    SigninRequest = 0x2a,
    /// Server answers sign-in with the accepted version
    SigninResponse = 0x2b,
    /// Create a node, value or rpc endpoint
    CreateRequest = 0x2c,
    /// Result of a create
    CreateResponse = 0x2d,
    /// Structural changes pushed to every signed-in session
    MetaUpdateNotification = 0x2e,
    /// Delete a property by path
    DeleteRequest = 0x2f,
    /// Result of a delete
    DeleteResponse = 0x30,
    /// Replace a value payload (no response)
    SetValueIndication = 0x31,
    /// Subscribe to value changes
    SubscribePropertyUpdateRequest = 0x32,
    /// Result of a subscribe
    SubscribePropertyUpdateResponse = 0x33,
    /// Value changes pushed to subscribers
    PropertyUpdateNotification = 0x34,
    /// Cancel a value subscription
    UnsubscribePropertyUpdateRequest = 0x35,
    /// Result of an unsubscribe
    UnsubscribePropertyUpdateResponse = 0x36,
    /// Read a value payload
    GetValueRequest = 0x37,
    /// Value payload, empty if the uuid does not name a value
    GetValueResponse = 0x38,
    /// Invoke an rpc endpoint
    RpcRequest = 0x39,
    /// Return value of an rpc invocation
    RpcResponse = 0x3a,
    /// Rpc invocation forwarded to the endpoint's owner
    HandleRpcRequest = 0x3b,
    /// Owner's answer to a forwarded invocation
    HandleRpcResponse = 0x3c,
    /// Look up the metadata of a single path
    GetSpecificMetaRequest = 0x3d,
    /// Metadata of the requested path
    GetSpecificMetaResponse = 0x3e,
}

impl MessageType {
    /// Wire byte for this type.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        let ty = match value {
            0x2a => Self::SigninRequest,
            0x2b => Self::SigninResponse,
            0x2c => Self::CreateRequest,
            0x2d => Self::CreateResponse,
            0x2e => Self::MetaUpdateNotification,
            0x2f => Self::DeleteRequest,
            0x30 => Self::DeleteResponse,
            0x31 => Self::SetValueIndication,
            0x32 => Self::SubscribePropertyUpdateRequest,
            0x33 => Self::SubscribePropertyUpdateResponse,
            0x34 => Self::PropertyUpdateNotification,
            0x35 => Self::UnsubscribePropertyUpdateRequest,
            0x36 => Self::UnsubscribePropertyUpdateResponse,
            0x37 => Self::GetValueRequest,
            0x38 => Self::GetValueResponse,
            0x39 => Self::RpcRequest,
            0x3a => Self::RpcResponse,
            0x3b => Self::HandleRpcRequest,
            0x3c => Self::HandleRpcResponse,
            0x3d => Self::GetSpecificMetaRequest,
            0x3e => Self::GetSpecificMetaResponse,
            other => return Err(ProtocolError::UnknownMessageType(other)),
        };
        Ok(ty)
    }

    /// True for messages the server sends without a matching request.
    #[must_use]
    pub fn is_unsolicited(self) -> bool {
        matches!(
            self,
            Self::MetaUpdateNotification | Self::PropertyUpdateNotification | Self::HandleRpcRequest
        )
    }
}
