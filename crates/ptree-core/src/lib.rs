//! Property tree core logic
//!
//! The shared property store and the per-connection message framer. Nothing
//! here performs I/O: the store is a concurrent data structure driven by
//! whoever holds it, and the framer is a state machine fed with whatever
//! bytes the transport produced.
//!
//! # Architecture
//!
//! The store owns a tree of [`store::Property`] values. Ownership flows from
//! parent to child through `Arc`; children refer back to their parent with a
//! `Weak` that is only used to rebuild paths. A sharded uuid index gives
//! direct access to any live property. There is no tree-wide lock: each
//! node's children, each value's payload and each value's watcher set are
//! locked independently.
//!
//! Value changes are delivered to [`store::ValueWatcher`] implementations,
//! which the server implements on its sessions.
//!
//! # Components
//!
//! - [`store`]: property tree, uuid index and allocator
//! - [`framer`]: byte stream to frame reassembly
//! - [`error`]: store and framing errors

pub mod error;
pub mod framer;
pub mod store;

pub use error::{FrameError, StoreError};
pub use framer::{Framer, FramerConfig, FramerEvent, FramerState};
pub use store::{Property, PropertyKind, PropertyMeta, PropertyStore, ValueWatcher};

/// Server-assigned identity of a client session.
pub type SessionId = u64;
