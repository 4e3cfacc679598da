//! Value payloads: reads, writes and subscriptions.

use bytes::Bytes;

use crate::{
    Uuid,
    codec::{wire_enum, wire_record},
};

wire_record! {
    /// Replace the payload of a value. No response is sent.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SetValueIndication {
        /// Target value
        pub uuid: Uuid,
        /// New payload
        pub data: Bytes,
    }
}

wire_record! {
    /// Subscribe to changes of a value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubscribeRequest {
        /// Target value
        pub uuid: Uuid,
    }
}

wire_enum! {
    /// Outcome of a subscribe.
    pub enum SubscribeCode as "subscribe response" {
        /// Subscribed (or already subscribed)
        Ok = 0,
        /// No property with that uuid
        UuidNotFound = 1,
        /// Property is not a value
        NotAValue = 2,
    }
}

wire_record! {
    /// Result of a subscribe.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubscribeResponse {
        /// Outcome
        pub code: SubscribeCode,
    }
}

wire_record! {
    /// Cancel a value subscription.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UnsubscribeRequest {
        /// Target value
        pub uuid: Uuid,
    }
}

wire_enum! {
    /// Outcome of an unsubscribe.
    pub enum UnsubscribeCode as "unsubscribe response" {
        /// Unsubscribed
        Ok = 0,
        /// Session was not subscribed
        NotSubscribed = 1,
        /// Property is not a value
        NotAValue = 2,
        /// No property with that uuid
        UuidNotFound = 3,
    }
}

wire_record! {
    /// Result of an unsubscribe.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UnsubscribeResponse {
        /// Outcome
        pub code: UnsubscribeCode,
    }
}

wire_record! {
    /// New payload of one value.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct PropertyUpdate {
        /// Changed value
        pub uuid: Uuid,
        /// Payload after the change
        pub data: Bytes,
    }
}

wire_record! {
    /// Value changes pushed to a subscriber, oldest first.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct PropertyUpdateNotification {
        /// Updates in the order they happened
        pub updates: Vec<PropertyUpdate>,
    }
}

wire_record! {
    /// Read the payload of a value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GetValueRequest {
        /// Target value
        pub uuid: Uuid,
    }
}

wire_record! {
    /// Current payload; empty when the uuid does not name a value.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct GetValueResponse {
        /// Payload
        pub data: Bytes,
    }
}
