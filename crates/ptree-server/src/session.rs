//! Client sessions.
//!
//! A session is created for every accepted connection and lives until the
//! connection closes or the server shuts down. It runs two tasks:
//!
//! - the receive loop reads bytes, drives the [`Framer`] and hands complete
//!   frames to the [`Dispatcher`]; responses are written before the next
//!   read
//! - the flusher waits for entries in the [`Outbox`] and writes them
//!
//! Both write through the same send lock and drain the outbox while holding
//! it, so everything this session sends leaves in the order it was queued.
//! A send gives up when the session is stopped or the peer does not accept
//! it within [`ServerConfig::write_timeout`]; a peer whose outbox reaches
//! [`ServerConfig::max_outbox_entries`] is disconnected.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use parking_lot::Mutex;
use ptree_core::{Framer, FramerEvent, Property, SessionId, ValueWatcher};
use ptree_proto::{
    FeatureFlags, Frame, Message, Uuid,
    payloads::{rpc::RpcResponse, value::PropertyUpdate},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Notify,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    config::ServerConfig,
    dispatcher::Dispatcher,
    error::ServerError,
    outbox::{MetaEntry, Outbox, Outgoing},
};

/// Bytes requested from the transport per read.
const READ_CHUNK: usize = 16 * 1024;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// State of one client connection.
pub struct Session {
    id: SessionId,
    signed_in: AtomicBool,
    update_interval_ms: AtomicU32,
    features: AtomicU64,
    writer: tokio::sync::Mutex<Writer>,
    write_timeout: Duration,
    outbox: Mutex<Outbox>,
    wake: Notify,
    stop: CancellationToken,
    pending_rpcs: Mutex<HashMap<u32, Arc<Property>>>,
    framing_errors: AtomicU64,
}

impl Session {
    /// Create a session writing to `writer`.
    ///
    /// `stop` ends both session tasks; pass a child of the server's token.
    pub fn new(
        id: SessionId,
        writer: impl AsyncWrite + Send + Unpin + 'static,
        stop: CancellationToken,
        config: &ServerConfig,
    ) -> Self {
        Self {
            id,
            signed_in: AtomicBool::new(false),
            update_interval_ms: AtomicU32::new(0),
            features: AtomicU64::new(0),
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            write_timeout: config.write_timeout,
            outbox: Mutex::new(Outbox::new(
                config.framer.max_body_size,
                config.max_outbox_entries,
            )),
            wake: Notify::new(),
            stop,
            pending_rpcs: Mutex::new(HashMap::new()),
            framing_errors: AtomicU64::new(0),
        }
    }

    /// Session identity
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Whether the peer has signed in
    #[must_use]
    pub fn is_signed_in(&self) -> bool {
        self.signed_in.load(Ordering::Acquire)
    }

    /// Mark the session signed in with the peer's requested settings.
    pub fn sign_in(&self, update_interval_ms: u32, features: FeatureFlags) {
        self.update_interval_ms.store(update_interval_ms, Ordering::Relaxed);
        self.features.store(features.bits(), Ordering::Relaxed);
        self.signed_in.store(true, Ordering::Release);
    }

    /// Requested notification interval in milliseconds
    #[must_use]
    pub fn update_interval_ms(&self) -> u32 {
        self.update_interval_ms.load(Ordering::Relaxed)
    }

    /// Features requested at sign-in
    #[must_use]
    pub fn features(&self) -> FeatureFlags {
        FeatureFlags::from_bits_retain(self.features.load(Ordering::Relaxed))
    }

    /// Framing errors seen on this connection
    #[must_use]
    pub fn framing_errors(&self) -> u64 {
        self.framing_errors.load(Ordering::Relaxed)
    }

    /// True once the session has been told to stop.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Stop both session tasks.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Queue a structural change.
    pub fn push_meta(&self, entry: MetaEntry) {
        self.push(Outgoing::Meta(entry));
    }

    /// Queue a complete message.
    pub fn push_frame(&self, frame: Frame) {
        self.push(Outgoing::Frame(frame));
    }

    fn push(&self, entry: Outgoing) {
        if self.is_stopped() {
            return;
        }
        let queued = self.outbox.lock().push(entry);
        if queued {
            self.wake.notify_one();
        } else {
            warn!(session_id = self.id, "outbox full, disconnecting");
            self.stop();
        }
    }

    /// Remove and merge everything queued so far.
    pub fn take_outgoing(&self) -> Vec<Frame> {
        self.outbox.lock().drain()
    }

    /// Record an rpc call made by this session that awaits its answer.
    ///
    /// Holding the endpoint keeps its uuid from being reissued while the
    /// call is outstanding.
    pub fn add_pending_rpc(&self, transaction_id: u32, endpoint: Arc<Property>) {
        self.pending_rpcs.lock().insert(transaction_id, endpoint);
    }

    /// Clear a pending call answered by `handler_id`.
    ///
    /// Returns `false`, leaving the table untouched, if no such call was
    /// recorded or its endpoint belongs to another session.
    pub fn complete_rpc(&self, transaction_id: u32, handler_id: SessionId) -> bool {
        let mut pending = self.pending_rpcs.lock();
        let owned = pending
            .get(&transaction_id)
            .is_some_and(|endpoint| endpoint.rpc_handler() == Some(handler_id));
        if owned {
            pending.remove(&transaction_id);
        }
        owned
    }

    /// Drop every pending call served by `handler_id` and answer each with
    /// an empty return value. Returns how many were dropped.
    pub fn abandon_rpcs_handled_by(&self, handler_id: SessionId) -> usize {
        let abandoned: Vec<u32> = {
            let mut pending = self.pending_rpcs.lock();
            let ids: Vec<u32> = pending
                .iter()
                .filter(|(_, endpoint)| endpoint.rpc_handler() == Some(handler_id))
                .map(|(&transaction_id, _)| transaction_id)
                .collect();
            for transaction_id in &ids {
                pending.remove(transaction_id);
            }
            ids
        };

        for &transaction_id in &abandoned {
            let answer = Message::RpcResponse(RpcResponse { return_value: Bytes::new() });
            match answer.into_frame(transaction_id) {
                Ok(frame) => self.push_frame(frame),
                Err(error) => {
                    warn!(session_id = self.id, transaction_id, %error, "rpc answer not encodable");
                },
            }
        }
        if !abandoned.is_empty() {
            debug!(
                session_id = self.id,
                handler_id,
                count = abandoned.len(),
                "rpc handler gone, calls answered empty"
            );
        }
        abandoned.len()
    }

    /// Number of calls awaiting an answer
    #[must_use]
    pub fn pending_rpc_count(&self) -> usize {
        self.pending_rpcs.lock().len()
    }

    /// Write everything queued, then `frame` if given, under the send lock.
    ///
    /// Fails when the session is stopped or the write does not complete
    /// within the write timeout; a frame may be left half-written, so the
    /// connection is unusable afterwards.
    pub async fn send(&self, frame: Option<Frame>) -> Result<(), ServerError> {
        tokio::select! {
            () = self.stop.cancelled() => Err(ServerError::Stopped),
            written = tokio::time::timeout(self.write_timeout, self.write(frame)) => {
                written.map_err(|_elapsed| ServerError::WriteTimeout(self.write_timeout))?
            },
        }
    }

    async fn write(&self, frame: Option<Frame>) -> Result<(), ServerError> {
        let mut writer = self.writer.lock().await;
        let mut frames = self.take_outgoing();
        frames.extend(frame);
        if frames.is_empty() {
            return Ok(());
        }

        for frame in &frames {
            trace!(
                session_id = self.id,
                transaction_id = frame.transaction_id(),
                body = %hex::encode(&frame.body),
                "send"
            );
            writer.write_all(&frame.to_bytes()).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Receive loop. Returns when the peer disconnects, a write fails or the
    /// session is stopped.
    pub async fn run_receiver<R>(
        self: &Arc<Self>,
        mut reader: R,
        dispatcher: &Dispatcher,
        config: &ServerConfig,
    ) where
        R: AsyncRead + Unpin,
    {
        let mut framer = Framer::new(config.framer.clone());
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            let read = tokio::select! {
                () = self.stop.cancelled() => break,
                read = tokio::time::timeout(config.read_timeout, reader.read(&mut buf)) => read,
            };

            let events = match read {
                Err(_idle) => framer.on_idle().map(FramerEvent::Rejected).into_iter().collect(),
                Ok(Ok(0)) => {
                    debug!(session_id = self.id, "peer closed connection");
                    break;
                },
                Ok(Ok(n)) => framer.on_bytes(&buf[..n]),
                Ok(Err(error)) => {
                    debug!(session_id = self.id, %error, "read failed");
                    break;
                },
            };

            for event in events {
                match event {
                    FramerEvent::Frame(frame) => {
                        let response = dispatcher.handle(self, frame);
                        if let Err(error) = self.send(response).await {
                            debug!(session_id = self.id, %error, "write failed");
                            return;
                        }
                    },
                    FramerEvent::Rejected(error) => {
                        self.framing_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(session_id = self.id, %error, "framing error, resetting");
                    },
                }
            }
        }
    }

    /// Flusher loop. Writes queued notifications until stopped.
    pub async fn run_flusher(self: Arc<Self>) {
        loop {
            tokio::select! {
                () = self.stop.cancelled() => break,
                () = self.wake.notified() => {},
            }

            if let Err(error) = self.send(None).await {
                debug!(session_id = self.id, %error, "notification write failed");
                self.stop();
                break;
            }
        }
    }
}

impl ValueWatcher for Session {
    fn subscriber_id(&self) -> SessionId {
        self.id
    }

    fn on_update(&self, uuid: Uuid, data: &Bytes) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.push(Outgoing::Value(PropertyUpdate { uuid, data: data.clone() }));
        !self.is_stopped()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("signed_in", &self.is_signed_in())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use ptree_proto::{MessageType, PropertyType, payloads::tree::MetaCreate};
    use tokio::io::AsyncReadExt;

    use super::*;

    fn session(writer: impl AsyncWrite + Send + Unpin + 'static) -> Arc<Session> {
        session_with(writer, &ServerConfig::default())
    }

    fn session_with(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        config: &ServerConfig,
    ) -> Arc<Session> {
        Arc::new(Session::new(1, writer, CancellationToken::new(), config))
    }

    fn created(uuid: u32) -> MetaEntry {
        MetaEntry::Created(MetaCreate {
            uuid,
            property_type: PropertyType::Node,
            path: format!("/n{uuid}"),
        })
    }

    #[test]
    fn sign_in_records_settings() {
        let session = session(tokio::io::sink());
        assert!(!session.is_signed_in());

        session.sign_in(100, FeatureFlags::ENABLE_METAUPDATE);
        assert!(session.is_signed_in());
        assert_eq!(session.update_interval_ms(), 100);
        assert_eq!(session.features(), FeatureFlags::ENABLE_METAUPDATE);
    }

    #[test]
    fn stopped_session_rejects_updates() {
        let session = session(tokio::io::sink());
        assert!(session.on_update(100, &Bytes::from_static(b"x")));

        session.stop();
        assert!(!session.on_update(100, &Bytes::from_static(b"y")));
        session.push_meta(MetaEntry::Deleted(ptree_proto::payloads::tree::MetaDelete { uuid: 1 }));
        assert_eq!(session.take_outgoing().len(), 1);
    }

    #[tokio::test]
    async fn send_writes_queued_entries_before_response() {
        let (client, server) = tokio::io::duplex(4096);
        let session = session(server);
        session.push_meta(created(100));
        let response =
            Message::SigninResponse(ptree_proto::payloads::session::SigninResponse { version: 1 })
                .into_frame(3)
                .unwrap();

        session.send(Some(response)).await.unwrap();
        drop(session);

        let mut bytes = Vec::new();
        let mut client = client;
        client.read_to_end(&mut bytes).await.unwrap();

        let mut framer = Framer::default();
        let types: Vec<MessageType> = framer
            .on_bytes(&bytes)
            .into_iter()
            .filter_map(|event| match event {
                FramerEvent::Frame(frame) => frame.header.message_type().ok(),
                FramerEvent::Rejected(_) => None,
            })
            .collect();
        assert_eq!(types, vec![MessageType::MetaUpdateNotification, MessageType::SigninResponse]);
    }

    #[test]
    fn pending_rpcs_complete_once() {
        let session = session(tokio::io::sink());
        let store = ptree_core::PropertyStore::new();
        let uuid = store.create("/call", PropertyType::Rpc, Bytes::new(), 2).unwrap();

        session.add_pending_rpc(7, store.get_by_uuid(uuid).unwrap());
        assert_eq!(session.pending_rpc_count(), 1);
        assert!(session.complete_rpc(7, 2));
        assert!(!session.complete_rpc(7, 2));
        assert_eq!(session.pending_rpc_count(), 0);
    }

    #[test]
    fn only_the_endpoint_owner_completes_a_call() {
        let session = session(tokio::io::sink());
        let store = ptree_core::PropertyStore::new();
        let uuid = store.create("/call", PropertyType::Rpc, Bytes::new(), 2).unwrap();
        session.add_pending_rpc(7, store.get_by_uuid(uuid).unwrap());

        assert!(!session.complete_rpc(7, 3));
        assert_eq!(session.pending_rpc_count(), 1);
        assert!(session.complete_rpc(7, 2));
    }

    #[test]
    fn calls_to_a_departed_handler_are_answered_empty() {
        let session = session(tokio::io::sink());
        let store = ptree_core::PropertyStore::new();
        let gone = store.create("/gone", PropertyType::Rpc, Bytes::new(), 2).unwrap();
        let alive = store.create("/alive", PropertyType::Rpc, Bytes::new(), 3).unwrap();
        session.add_pending_rpc(7, store.get_by_uuid(gone).unwrap());
        session.add_pending_rpc(8, store.get_by_uuid(alive).unwrap());
        session.add_pending_rpc(9, store.get_by_uuid(gone).unwrap());

        assert_eq!(session.abandon_rpcs_handled_by(2), 2);
        assert_eq!(session.pending_rpc_count(), 1);

        let mut answered: Vec<u32> =
            session.take_outgoing().iter().map(Frame::transaction_id).collect();
        answered.sort_unstable();
        assert_eq!(answered, vec![7, 9]);
        assert!(session.complete_rpc(8, 3));
    }

    #[test]
    fn overflowing_outbox_stops_session() {
        let config = ServerConfig { max_outbox_entries: 2, ..ServerConfig::default() };
        let session = session_with(tokio::io::sink(), &config);

        session.push_meta(created(100));
        session.push_meta(created(101));
        assert!(!session.is_stopped());

        session.push_meta(created(102));
        assert!(session.is_stopped());
        assert!(!session.on_update(100, &Bytes::from_static(b"x")));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_peer_times_out() {
        let config =
            ServerConfig { write_timeout: Duration::from_millis(200), ..ServerConfig::default() };
        let (_peer, server) = tokio::io::duplex(64);
        let session = session_with(server, &config);
        for uuid in 100..200 {
            session.push_meta(created(uuid));
        }

        let result = session.send(None).await;
        assert!(matches!(result, Err(ServerError::WriteTimeout(_))), "{result:?}");
    }

    #[tokio::test]
    async fn stop_interrupts_blocked_send() {
        let (_peer, server) = tokio::io::duplex(64);
        let session = session(server);
        for uuid in 100..200 {
            session.push_meta(created(uuid));
        }

        let sending = tokio::spawn({
            let session = Arc::clone(&session);
            async move { session.send(None).await }
        });
        tokio::task::yield_now().await;
        session.stop();

        let result = tokio::time::timeout(Duration::from_secs(5), sending).await.unwrap().unwrap();
        assert!(matches!(result, Err(ServerError::Stopped)), "{result:?}");
    }
}
