//! Property tree client
//!
//! Async client for the property tree server. Requests are typed methods on
//! [`Client`] that resolve when the matching response arrives; everything the
//! server sends unprompted is delivered as a [`ClientEvent`].
//!
//! # Components
//!
//! - [`client`]: connection, request correlation, event delivery
//! - [`meta_cache`]: locally known paths and uuids
//! - [`config`]: client configuration
//! - [`error`]: client error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod meta_cache;

pub use client::{Client, ClientEvent, ClientEvents};
pub use config::ClientConfig;
pub use error::ClientError;
pub use meta_cache::MetaCache;
