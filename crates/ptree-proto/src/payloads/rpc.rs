//! RPC payloads.
//!
//! # Protocol Flow
//!
//! 1. Caller sends `RpcRequest(uuid, parameter)` with transaction id `t`
//! 2. Server forwards `HandleRpcRequest(caller, t, uuid, parameter)` to the
//!    session that created the endpoint
//! 3. Handler answers with `HandleRpcResponse(caller, t, return_value)`
//! 4. Server sends `RpcResponse(return_value)` to the caller with id `t`

use bytes::Bytes;

use crate::{Uuid, codec::wire_record};

wire_record! {
    /// Invoke the rpc endpoint `uuid`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RpcRequest {
        /// Target endpoint
        pub uuid: Uuid,
        /// Opaque argument
        pub parameter: Bytes,
    }
}

wire_record! {
    /// Return value; empty if the endpoint could not be reached.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RpcResponse {
        /// Opaque result
        pub return_value: Bytes,
    }
}

wire_record! {
    /// Invocation forwarded to the endpoint's owner.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct HandleRpcRequest {
        /// Session id of the caller
        pub caller_id: u64,
        /// Transaction id of the caller's request
        pub caller_transaction_id: u32,
        /// Target endpoint
        pub uuid: Uuid,
        /// Opaque argument
        pub parameter: Bytes,
    }
}

wire_record! {
    /// Owner's answer, echoing the caller identification.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct HandleRpcResponse {
        /// Session id of the caller
        pub caller_id: u64,
        /// Transaction id of the caller's request
        pub caller_transaction_id: u32,
        /// Opaque result
        pub return_value: Bytes,
    }
}
