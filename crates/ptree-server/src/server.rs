//! Connection acceptor and session lifecycle.
//!
//! # Architecture
//!
//! ```text
//!              ┌────────────┐
//!   accept ──► │   Server   │ ── spawn per connection ──┐
//!              └─────┬──────┘                           │
//!                    │ owns                             ▼
//!      ┌─────────────┼──────────────┐        ┌──────────────────┐
//!      ▼             ▼              ▼        │ receive loop     │
//! PropertyStore  SessionRegistry  Dispatcher │ flusher          │
//!                                            └──────────────────┘
//! ```
//!
//! Every session task is tracked. Shutdown stops accepting, cancels every
//! session and waits up to [`ServerConfig::shutdown_timeout`] for them.

use std::{net::SocketAddr, sync::Arc};

use ptree_core::PropertyStore;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig, dispatcher::Dispatcher, error::ServerError, registry::SessionRegistry,
    session::Session, transport::Listener,
};

/// Property tree server.
#[derive(Debug)]
pub struct Server {
    config: Arc<ServerConfig>,
    store: Arc<PropertyStore>,
    registry: Arc<SessionRegistry>,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Server {
    /// Server with an empty tree.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(PropertyStore::new());
        let registry = Arc::new(SessionRegistry::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.framer.max_body_size,
        );
        Self {
            config: Arc::new(config),
            store,
            registry,
            dispatcher,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Bind a TCP listener on the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let addr = self.config.bind_addr;
        TcpListener::bind(addr).await.map_err(|source| ServerError::Bind { addr, source })
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The shared tree
    #[must_use]
    pub fn store(&self) -> &Arc<PropertyStore> {
        &self.store
    }

    /// Live sessions
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Accept connections until [`Server::shutdown`] is called, then wind
    /// down every session.
    pub async fn run<L: Listener>(&self, listener: L) -> Result<(), ServerError> {
        info!(addr = ?listener.local_addr().ok(), "accepting connections");

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_session(stream, peer),
                    Err(error) => warn!(%error, "accept failed"),
                },
            }
        }

        self.wind_down().await;
        Ok(())
    }

    /// Serve one already-connected stream.
    pub fn spawn_session<S>(&self, stream: S, peer: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let id = self.registry.next_session_id();
        let session = Arc::new(Session::new(
            id,
            writer,
            self.shutdown.child_token(),
            &self.config,
        ));
        self.registry.register(Arc::clone(&session));
        info!(session_id = id, %peer, "session opened");

        let registry = Arc::clone(&self.registry);
        let dispatcher = self.dispatcher.clone();
        let config = Arc::clone(&self.config);
        self.tasks.spawn(async move {
            let flusher = tokio::spawn(Arc::clone(&session).run_flusher());
            session.run_receiver(reader, &dispatcher, &config).await;

            session.stop();
            if let Err(error) = flusher.await {
                warn!(session_id = id, %error, "flusher task failed");
            }
            registry.unregister(id);
            info!(
                session_id = id,
                %peer,
                framing_errors = session.framing_errors(),
                "session closed"
            );
        });
    }

    /// Ask [`Server::run`] to return.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn wind_down(&self) {
        self.tasks.close();
        self.registry.stop_all();

        let sessions = self.tasks.len();
        debug!(sessions, "waiting for sessions");
        if tokio::time::timeout(self.config.shutdown_timeout, self.tasks.wait()).await.is_err() {
            warn!(remaining = self.tasks.len(), "sessions did not stop in time");
        }
        info!("server stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn sessions_register_and_unregister() {
        let server = Server::new(ServerConfig::default());
        let (client, stream) = tokio::io::duplex(1024);

        server.spawn_session(stream, SocketAddr::from(([127, 0, 0, 1], 1)));
        assert_eq!(server.registry().len(), 1);

        drop(client);
        tokio::time::timeout(Duration::from_secs(5), async {
            while !server.registry().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_open_sessions() {
        let server = Arc::new(Server::new(ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..ServerConfig::default()
        }));
        let listener = server.bind().await.unwrap();

        let (_client, stream) = tokio::io::duplex(1024);
        server.spawn_session(stream, SocketAddr::from(([127, 0, 0, 1], 1)));

        let running = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run(listener).await }
        });
        server.shutdown();

        tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap().unwrap();
        assert!(server.registry().is_empty());
    }
}
