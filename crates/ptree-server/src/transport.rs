//! Listener abstraction.
//!
//! Production accepts plain TCP from tokio; tests plug in turmoil's
//! simulated TCP through the same trait.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
};

/// Source of incoming byte-stream connections.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Type of an accepted connection.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Accept the next connection.
    ///
    /// Blocks until a peer connects and returns the stream and the peer's
    /// address.
    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Address the listener is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl Listener for TcpListener {
    type Stream = tokio::net::TcpStream;

    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        // Messages are small and latency-sensitive.
        stream.set_nodelay(true)?;
        Ok((stream, peer))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpListener::local_addr(self)
    }
}
