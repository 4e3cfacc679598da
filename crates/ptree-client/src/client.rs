//! Connection to a property tree server.
//!
//! # Architecture
//!
//! ```text
//!  caller ── request() ──► send lock ──► transport
//!     ▲                                      │
//!     │ oneshot (by transaction id)          ▼
//!     └────────────── reader task ◄──── Framer
//!                         │
//!                         └──► ClientEvent channel (notifications, rpc calls)
//! ```
//!
//! Every request gets a fresh transaction id and waits on its own oneshot.
//! The reader task completes the oneshot when a response with that id
//! arrives; unsolicited messages are turned into [`ClientEvent`]s. Structural
//! notifications also update the [`MetaCache`] before they are forwarded, so
//! a create's own announcement is cached by the time the create returns.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use bytes::Bytes;
use parking_lot::Mutex;
use ptree_core::{Framer, FramerEvent};
use ptree_proto::{
    Frame, Message, NO_UUID, PropertyType, UNSOLICITED_TRANSACTION_ID, Uuid,
    payloads::{
        rpc::{HandleRpcRequest, HandleRpcResponse, RpcRequest},
        session::SigninRequest,
        tree::{
            CreateCode, CreateRequest, DeleteCode, DeleteRequest, GetSpecificMetaRequest,
            MetaCreate, MetaUpdateNotification,
        },
        value::{
            GetValueRequest, PropertyUpdate, SetValueIndication, SubscribeCode,
            SubscribeRequest, UnsubscribeCode, UnsubscribeRequest,
        },
    },
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpStream, ToSocketAddrs},
    sync::{mpsc, oneshot},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{config::ClientConfig, error::ClientError, meta_cache::MetaCache};

const READ_CHUNK: usize = 16 * 1024;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Something the server sent without being asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Properties were created or deleted
    MetaUpdate(MetaUpdateNotification),
    /// A subscribed value changed
    PropertyUpdate(PropertyUpdate),
    /// Another client called an rpc endpoint this client owns; answer with
    /// [`Client::respond_rpc`]
    RpcCall(HandleRpcRequest),
    /// The connection closed
    Disconnected,
}

/// Receiving end of a client's events.
pub type ClientEvents = mpsc::UnboundedReceiver<ClientEvent>;

/// Transaction id source. Never yields the unsolicited sentinel.
#[derive(Debug, Default)]
struct TransactionIds(AtomicU32);

impl TransactionIds {
    fn next(&self) -> u32 {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed);
            if id != UNSOLICITED_TRANSACTION_ID {
                return id;
            }
        }
    }
}

struct Shared {
    writer: tokio::sync::Mutex<Writer>,
    pending: Mutex<HashMap<u32, oneshot::Sender<Message>>>,
    transaction_ids: TransactionIds,
    meta: MetaCache,
    closed: CancellationToken,
}

impl Shared {
    async fn write(&self, frame: &Frame) -> Result<(), ClientError> {
        let mut writer = self.writer.lock().await;
        trace!(
            transaction_id = frame.transaction_id(),
            message_type = frame.header.message_type_raw(),
            len = frame.body.len(),
            "send"
        );
        writer.write_all(&frame.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    fn dispatch(&self, frame: &Frame, events: &mpsc::UnboundedSender<ClientEvent>) {
        let transaction_id = frame.transaction_id();
        let message = match Message::from_frame(frame) {
            Ok(message) => message,
            Err(error) => {
                warn!(transaction_id, %error, "dropping undecodable message");
                return;
            },
        };

        if transaction_id != UNSOLICITED_TRANSACTION_ID {
            match self.pending.lock().remove(&transaction_id) {
                Some(waiter) => {
                    let _ = waiter.send(message);
                },
                None => debug!(transaction_id, "response without a pending request"),
            }
            return;
        }

        match message {
            Message::MetaUpdateNotification(update) => {
                self.meta.apply(&update);
                let _ = events.send(ClientEvent::MetaUpdate(update));
            },
            Message::PropertyUpdateNotification(notification) => {
                for update in notification.updates {
                    let _ = events.send(ClientEvent::PropertyUpdate(update));
                }
            },
            Message::HandleRpcRequest(call) => {
                let _ = events.send(ClientEvent::RpcCall(call));
            },
            other => warn!(message_type = ?other.message_type(), "unexpected unsolicited message"),
        }
    }
}

async fn read_loop<R>(
    shared: Arc<Shared>,
    mut reader: R,
    events: mpsc::UnboundedSender<ClientEvent>,
    config: ClientConfig,
) where
    R: AsyncRead + Unpin,
{
    let mut framer = Framer::new(config.framer);
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            () = shared.closed.cancelled() => break,
            read = tokio::time::timeout(config.read_timeout, reader.read(&mut buf)) => read,
        };

        let framed = match read {
            Err(_idle) => {
                if let Some(error) = framer.on_idle() {
                    warn!(%error, "framing error, resetting");
                }
                continue;
            },
            Ok(Ok(0)) => {
                debug!("server closed connection");
                break;
            },
            Ok(Ok(n)) => framer.on_bytes(&buf[..n]),
            Ok(Err(error)) => {
                debug!(%error, "read failed");
                break;
            },
        };

        for event in framed {
            match event {
                FramerEvent::Frame(frame) => shared.dispatch(&frame, &events),
                FramerEvent::Rejected(error) => warn!(%error, "framing error, resetting"),
            }
        }
    }

    shared.closed.cancel();
    // Dropping the senders fails every outstanding request.
    shared.pending.lock().clear();
    let _ = events.send(ClientEvent::Disconnected);
}

/// Async handle to one server connection.
///
/// Dropping the client closes the connection.
pub struct Client {
    shared: Arc<Shared>,
    config: ClientConfig,
}

impl Client {
    /// Connect over TCP.
    pub async fn connect(
        addr: impl ToSocketAddrs,
        config: ClientConfig,
    ) -> Result<(Self, ClientEvents), ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream, config))
    }

    /// Run the protocol over an established stream.
    ///
    /// Must be called from within a tokio runtime; the reader task is
    /// spawned onto it.
    pub fn from_stream<S>(stream: S, config: ClientConfig) -> (Self, ClientEvents)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            transaction_ids: TransactionIds::default(),
            meta: MetaCache::new(),
            closed: CancellationToken::new(),
        });

        tokio::spawn(read_loop(Arc::clone(&shared), reader, events_tx, config.clone()));
        (Self { shared, config }, events_rx)
    }

    /// Properties announced by the server or looked up by this client
    #[must_use]
    pub fn meta_cache(&self) -> &MetaCache {
        &self.shared.meta
    }

    /// False once the connection has closed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.shared.closed.is_cancelled()
    }

    /// Close the connection.
    pub fn close(&self) {
        self.shared.closed.cancel();
    }

    /// Sign in with the configured refresh rate and features. Returns the
    /// version the server accepted; 0 means it did not support ours.
    pub async fn signin(&self) -> Result<u32, ClientError> {
        let request = Message::SigninRequest(SigninRequest {
            version: ptree_proto::PROTOCOL_VERSION,
            refresh_rate: self.config.refresh_rate,
            features: self.config.features,
        });
        match self.request(request).await? {
            Message::SigninResponse(response) => Ok(response.version),
            other => Err(unexpected(&other)),
        }
    }

    /// Create a property and return its uuid.
    pub async fn create(
        &self,
        path: &str,
        property_type: PropertyType,
        data: impl Into<Bytes>,
    ) -> Result<Uuid, ClientError> {
        let request = Message::CreateRequest(CreateRequest {
            property_type,
            data: data.into(),
            path: path.to_owned(),
        });
        match self.request(request).await? {
            Message::CreateResponse(response) if response.code == CreateCode::Ok => {
                Ok(response.uuid)
            },
            Message::CreateResponse(response) => Err(ClientError::CreateFailed(response.code)),
            other => Err(unexpected(&other)),
        }
    }

    /// Delete the property at `path`.
    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let request = Message::DeleteRequest(DeleteRequest { path: path.to_owned() });
        match self.request(request).await? {
            Message::DeleteResponse(response) if response.code == DeleteCode::Ok => Ok(()),
            Message::DeleteResponse(response) => Err(ClientError::DeleteFailed(response.code)),
            other => Err(unexpected(&other)),
        }
    }

    /// Replace a value. The server does not acknowledge this.
    pub async fn set_value(&self, uuid: Uuid, data: impl Into<Bytes>) -> Result<(), ClientError> {
        let indication = Message::SetValueIndication(SetValueIndication { uuid, data: data.into() });
        self.notify(indication).await
    }

    /// Receive [`ClientEvent::PropertyUpdate`]s for a value.
    pub async fn subscribe(&self, uuid: Uuid) -> Result<(), ClientError> {
        match self.request(Message::SubscribeRequest(SubscribeRequest { uuid })).await? {
            Message::SubscribeResponse(response) if response.code == SubscribeCode::Ok => Ok(()),
            Message::SubscribeResponse(response) => {
                Err(ClientError::SubscribeFailed(response.code))
            },
            other => Err(unexpected(&other)),
        }
    }

    /// Stop receiving updates for a value.
    pub async fn unsubscribe(&self, uuid: Uuid) -> Result<(), ClientError> {
        match self.request(Message::UnsubscribeRequest(UnsubscribeRequest { uuid })).await? {
            Message::UnsubscribeResponse(response) if response.code == UnsubscribeCode::Ok => {
                Ok(())
            },
            Message::UnsubscribeResponse(response) => {
                Err(ClientError::UnsubscribeFailed(response.code))
            },
            other => Err(unexpected(&other)),
        }
    }

    /// Current payload of a value. Empty if `uuid` is not a value.
    pub async fn get_value(&self, uuid: Uuid) -> Result<Bytes, ClientError> {
        match self.request(Message::GetValueRequest(GetValueRequest { uuid })).await? {
            Message::GetValueResponse(response) => Ok(response.data),
            other => Err(unexpected(&other)),
        }
    }

    /// Call an rpc endpoint and wait for the owner's answer.
    pub async fn rpc(&self, uuid: Uuid, parameter: impl Into<Bytes>) -> Result<Bytes, ClientError> {
        let request = Message::RpcRequest(RpcRequest { uuid, parameter: parameter.into() });
        match self.request(request).await? {
            Message::RpcResponse(response) => Ok(response.return_value),
            other => Err(unexpected(&other)),
        }
    }

    /// Answer a [`ClientEvent::RpcCall`].
    pub async fn respond_rpc(
        &self,
        call: &HandleRpcRequest,
        return_value: impl Into<Bytes>,
    ) -> Result<(), ClientError> {
        let response = Message::HandleRpcResponse(HandleRpcResponse {
            caller_id: call.caller_id,
            caller_transaction_id: call.caller_transaction_id,
            return_value: return_value.into(),
        });
        self.notify(response).await
    }

    /// Look up a property by path. `None` if it does not exist.
    pub async fn get_specific_meta(&self, path: &str) -> Result<Option<MetaCreate>, ClientError> {
        let request = Message::GetSpecificMetaRequest(GetSpecificMetaRequest {
            path: path.to_owned(),
        });
        match self.request(request).await? {
            Message::GetSpecificMetaResponse(response) if response.meta.uuid == NO_UUID => Ok(None),
            Message::GetSpecificMetaResponse(response) => {
                self.shared.meta.insert(response.meta.clone());
                Ok(Some(response.meta))
            },
            other => Err(unexpected(&other)),
        }
    }

    async fn request(&self, message: Message) -> Result<Message, ClientError> {
        let transaction_id = self.shared.transaction_ids.next();
        let frame = message.into_frame(transaction_id)?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(transaction_id, tx);
        if self.shared.closed.is_cancelled() {
            self.shared.pending.lock().remove(&transaction_id);
            return Err(ClientError::Disconnected);
        }

        if let Err(error) = self.shared.write(&frame).await {
            self.shared.pending.lock().remove(&transaction_id);
            return Err(error);
        }

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::Disconnected),
            Err(_) => {
                self.shared.pending.lock().remove(&transaction_id);
                Err(ClientError::Timeout)
            },
        }
    }

    async fn notify(&self, message: Message) -> Result<(), ClientError> {
        if self.shared.closed.is_cancelled() {
            return Err(ClientError::Disconnected);
        }
        let frame = message.into_frame(self.shared.transaction_ids.next())?;
        self.shared.write(&frame).await
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.closed.cancel();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connected", &self.is_connected())
            .field("pending", &self.shared.pending.lock().len())
            .finish_non_exhaustive()
    }
}

fn unexpected(message: &Message) -> ClientError {
    ClientError::UnexpectedResponse(message.message_type())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ptree_proto::payloads::{
        session::SigninResponse,
        tree::{CreateResponse, MetaDelete},
        value::{PropertyUpdateNotification, SubscribeResponse},
    };
    use tokio::io::DuplexStream;

    use super::*;

    /// Scripted server: answers each request with whatever `respond`
    /// returns, as `(message, transaction id)` pairs.
    fn fake_server<F>(stream: DuplexStream, mut respond: F)
    where
        F: FnMut(u32, Message) -> Vec<(Message, u32)> + Send + 'static,
    {
        tokio::spawn(async move {
            let (mut reader, mut writer) = tokio::io::split(stream);
            let mut framer = Framer::default();
            let mut buf = vec![0u8; 4096];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                for event in framer.on_bytes(&buf[..n]) {
                    let FramerEvent::Frame(frame) = event else { continue };
                    let request = Message::from_frame(&frame).unwrap();
                    for (message, tid) in respond(frame.transaction_id(), request) {
                        let bytes = message.into_frame(tid).unwrap().to_bytes();
                        writer.write_all(&bytes).await.unwrap();
                    }
                }
            }
        });
    }

    fn client(stream: DuplexStream) -> (Client, ClientEvents) {
        let config = ClientConfig {
            request_timeout: Duration::from_millis(200),
            ..ClientConfig::default()
        };
        Client::from_stream(stream, config)
    }

    #[test]
    fn transaction_ids_skip_sentinel() {
        let ids = TransactionIds(AtomicU32::new(u32::MAX - 1));
        assert_eq!(ids.next(), u32::MAX - 1);
        assert_eq!(ids.next(), 0);
        assert_eq!(ids.next(), 1);
    }

    #[tokio::test]
    async fn responses_are_matched_by_transaction_id() {
        let (local, remote) = tokio::io::duplex(4096);
        fake_server(remote, |tid, request| match request {
            Message::SigninRequest(request) => {
                assert_eq!(request.version, 1);
                vec![(Message::SigninResponse(SigninResponse { version: 1 }), tid)]
            },
            _ => vec![],
        });

        let (client, _events) = client(local);
        assert_eq!(client.signin().await.unwrap(), 1);
        assert_eq!(client.signin().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn create_failure_carries_code() {
        let (local, remote) = tokio::io::duplex(4096);
        fake_server(remote, |tid, _| {
            let response = CreateResponse { code: CreateCode::ParentNotFound, uuid: 0 };
            vec![(Message::CreateResponse(response), tid)]
        });

        let (client, _events) = client(local);
        let result = client.create("/a/b", PropertyType::Value, Bytes::new()).await;
        assert!(matches!(result, Err(ClientError::CreateFailed(CreateCode::ParentNotFound))));
    }

    #[tokio::test]
    async fn announcement_is_cached_before_create_returns() {
        let (local, remote) = tokio::io::duplex(4096);
        fake_server(remote, |tid, request| {
            let Message::CreateRequest(request) = request else { return vec![] };
            let meta = MetaUpdateNotification {
                creations: vec![MetaCreate {
                    uuid: 100,
                    property_type: request.property_type,
                    path: request.path,
                }],
                deletions: vec![],
            };
            vec![
                (Message::MetaUpdateNotification(meta), UNSOLICITED_TRANSACTION_ID),
                (Message::CreateResponse(CreateResponse { code: CreateCode::Ok, uuid: 100 }), tid),
            ]
        });

        let (client, mut events) = client(local);
        let uuid = client.create("/a", PropertyType::Node, Bytes::new()).await.unwrap();
        assert_eq!(uuid, 100);
        assert_eq!(client.meta_cache().uuid_of("/a"), Some(100));
        assert!(matches!(events.recv().await, Some(ClientEvent::MetaUpdate(_))));
    }

    #[tokio::test]
    async fn notifications_become_events() {
        let (local, remote) = tokio::io::duplex(4096);
        fake_server(remote, |tid, request| {
            let Message::SubscribeRequest(_) = request else { return vec![] };
            let updates = PropertyUpdateNotification {
                updates: vec![
                    PropertyUpdate { uuid: 100, data: Bytes::from_static(b"a") },
                    PropertyUpdate { uuid: 100, data: Bytes::from_static(b"b") },
                ],
            };
            let call = HandleRpcRequest {
                caller_id: 3,
                caller_transaction_id: 9,
                uuid: 101,
                parameter: Bytes::new(),
            };
            let deleted =
                MetaUpdateNotification { creations: vec![], deletions: vec![MetaDelete { uuid: 5 }] };
            vec![
                (Message::SubscribeResponse(SubscribeResponse { code: SubscribeCode::Ok }), tid),
                (Message::PropertyUpdateNotification(updates), UNSOLICITED_TRANSACTION_ID),
                (Message::HandleRpcRequest(call), UNSOLICITED_TRANSACTION_ID),
                (Message::MetaUpdateNotification(deleted), UNSOLICITED_TRANSACTION_ID),
            ]
        });

        let (client, mut events) = client(local);
        client.subscribe(100).await.unwrap();

        let mut received = Vec::new();
        for _ in 0..4 {
            received.push(events.recv().await.unwrap());
        }
        assert_eq!(
            received[0],
            ClientEvent::PropertyUpdate(PropertyUpdate { uuid: 100, data: Bytes::from_static(b"a") })
        );
        assert_eq!(
            received[1],
            ClientEvent::PropertyUpdate(PropertyUpdate { uuid: 100, data: Bytes::from_static(b"b") })
        );
        assert!(matches!(&received[2], ClientEvent::RpcCall(call) if call.caller_transaction_id == 9));
        assert!(matches!(received[3], ClientEvent::MetaUpdate(_)));
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let (local, remote) = tokio::io::duplex(4096);
        fake_server(remote, |_, _| vec![]);

        let (client, _events) = client(local);
        assert!(matches!(client.get_value(100).await, Err(ClientError::Timeout)));
        assert_eq!(client.shared.pending.lock().len(), 0);
    }

    #[tokio::test]
    async fn disconnect_fails_requests_and_emits_event() {
        let (local, remote) = tokio::io::duplex(4096);
        let (client, mut events) = client(local);
        drop(remote);

        assert_eq!(events.recv().await, Some(ClientEvent::Disconnected));
        assert!(!client.is_connected());
        assert!(matches!(client.get_value(100).await, Err(ClientError::Disconnected)));
        assert!(matches!(client.set_value(100, Bytes::new()).await, Err(ClientError::Disconnected)));
    }

    #[tokio::test]
    async fn missing_path_has_no_meta() {
        let (local, remote) = tokio::io::duplex(4096);
        fake_server(remote, |tid, request| {
            let Message::GetSpecificMetaRequest(request) = request else { return vec![] };
            let meta = MetaCreate { uuid: NO_UUID, property_type: PropertyType::Value, path: request.path };
            vec![(
                Message::GetSpecificMetaResponse(
                    ptree_proto::payloads::tree::GetSpecificMetaResponse { meta },
                ),
                tid,
            )]
        });

        let (client, _events) = client(local);
        assert_eq!(client.get_specific_meta("/nope").await.unwrap(), None);
        assert!(client.meta_cache().is_empty());
    }
}
