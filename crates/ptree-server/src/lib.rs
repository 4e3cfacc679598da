//! Property tree server
//!
//! Runs the shared [`ptree_core::PropertyStore`] behind a TCP listener.
//! Each connection becomes a [`Session`] with its own framer, outbox and
//! send lock; requests are dispatched inline on the connection's receive
//! task and notifications to other sessions are queued on their outboxes.
//!
//! # Components
//!
//! - [`server`]: accept loop and session lifecycle
//! - [`session`]: per-connection receive loop and notification flusher
//! - [`dispatcher`]: request handling
//! - [`outbox`]: notification queue and coalescing
//! - [`registry`]: live sessions, structural broadcast
//! - [`transport`]: listener abstraction
//! - [`config`]: runtime configuration
//! - [`error`]: server error types

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod outbox;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{DEFAULT_PORT, ServerConfig};
pub use dispatcher::Dispatcher;
pub use error::ServerError;
pub use outbox::{MetaEntry, Outbox, Outgoing};
pub use registry::SessionRegistry;
pub use server::Server;
pub use session::Session;
pub use transport::Listener;
