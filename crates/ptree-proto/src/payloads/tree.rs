//! Structural payloads: create, delete and metadata.

use bytes::Bytes;

use super::PropertyType;
use crate::{
    Uuid,
    codec::{wire_enum, wire_record},
};

wire_record! {
    /// Create a property at `path`.
    ///
    /// `data` is the initial payload of a value and must be empty for nodes
    /// and rpc endpoints.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CreateRequest {
        /// Kind of property
        pub property_type: PropertyType,
        /// Initial payload
        pub data: Bytes,
        /// Absolute path of the new property
        pub path: String,
    }
}

wire_enum! {
    /// Outcome of a create.
    pub enum CreateCode as "create response" {
        /// Created
        Ok = 0,
        /// An ancestor of the path does not exist
        ParentNotFound = 1,
        /// Path is not a well-formed absolute path
        MalformedPath = 2,
        /// A sibling with the same name exists
        AlreadyExist = 3,
        /// Payload given for a node or rpc endpoint
        TypeError = 4,
    }
}

wire_record! {
    /// Result of a create; `uuid` is 0 unless `code` is `Ok`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateResponse {
        /// Outcome
        pub code: CreateCode,
        /// Uuid of the new property
        pub uuid: Uuid,
    }
}

wire_record! {
    /// Delete the property at `path`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DeleteRequest {
        /// Absolute path
        pub path: String,
    }
}

wire_enum! {
    /// Outcome of a delete.
    pub enum DeleteCode as "delete response" {
        /// Deleted
        Ok = 0,
        /// Nothing at the path
        ObjectNotFound = 1,
        /// The root cannot be deleted
        NotPermitted = 2,
        /// Node still has children
        NotEmpty = 3,
        /// Path is not a well-formed absolute path
        MalformedPath = 4,
    }
}

wire_record! {
    /// Result of a delete.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeleteResponse {
        /// Outcome
        pub code: DeleteCode,
    }
}

wire_record! {
    /// A property that came into existence.
    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    pub struct MetaCreate {
        /// Uuid of the property
        pub uuid: Uuid,
        /// Kind of property
        pub property_type: PropertyType,
        /// Absolute path
        pub path: String,
    }
}

wire_record! {
    /// A property that was deleted.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MetaDelete {
        /// Uuid of the deleted property
        pub uuid: Uuid,
    }
}

wire_record! {
    /// Structural changes, applied creations first then deletions.
    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct MetaUpdateNotification {
        /// Properties created
        pub creations: Vec<MetaCreate>,
        /// Properties deleted
        pub deletions: Vec<MetaDelete>,
    }
}

wire_record! {
    /// Look up a single path.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct GetSpecificMetaRequest {
        /// Absolute path
        pub path: String,
    }
}

wire_record! {
    /// Metadata for the requested path; uuid 0 if nothing is there.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct GetSpecificMetaResponse {
        /// Metadata
        pub meta: MetaCreate,
    }
}
