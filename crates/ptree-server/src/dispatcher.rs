//! Request dispatch.
//!
//! Decodes each frame once into a [`Message`], runs the store operation and
//! builds the response carrying the request's transaction id. Store errors
//! map one-to-one onto response codes; nothing a peer sends can end its
//! session from here.
//!
//! Side effects on other sessions are queued, never written directly:
//!
//! - create/delete queue a structural change on every signed-in session
//!   (the requester included) while the parent node is still locked, so
//!   announcements follow mutation order
//! - set-value queues an update on each subscriber through the store's
//!   watchers
//! - rpc calls are queued on the endpoint owner; answers on the caller
//!
//! Values and paths are refused up front when the notification announcing
//! them would exceed the body limit, since no peer could receive it.

use std::sync::Arc;

use bytes::Bytes;
use ptree_core::{PropertyStore, StoreError, ValueWatcher};
use ptree_proto::{
    Frame, Message, NO_UUID, PROTOCOL_VERSION, PropertyType, UNSOLICITED_TRANSACTION_ID,
    WireFormat,
    payloads::{
        rpc::{HandleRpcRequest, HandleRpcResponse, RpcRequest, RpcResponse},
        session::{SigninRequest, SigninResponse},
        tree::{
            CreateCode, CreateRequest, CreateResponse, DeleteCode, DeleteRequest, DeleteResponse,
            GetSpecificMetaRequest, GetSpecificMetaResponse, MetaCreate, MetaDelete,
            MetaUpdateNotification,
        },
        value::{
            GetValueRequest, GetValueResponse, PropertyUpdate, PropertyUpdateNotification,
            SetValueIndication, SubscribeCode, SubscribeRequest, SubscribeResponse,
            UnsubscribeCode, UnsubscribeRequest, UnsubscribeResponse,
        },
    },
};
use tracing::{debug, error, info, warn};

use crate::{outbox::MetaEntry, registry::SessionRegistry, session::Session};

/// Routes decoded requests to the store and to other sessions.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    store: Arc<PropertyStore>,
    registry: Arc<SessionRegistry>,
    max_body: usize,
}

impl Dispatcher {
    /// Dispatcher over a shared store and registry whose peers accept
    /// bodies of up to `max_body` bytes.
    pub fn new(
        store: Arc<PropertyStore>,
        registry: Arc<SessionRegistry>,
        max_body: usize,
    ) -> Self {
        Self { store, registry, max_body }
    }

    /// Handle one frame from `session`.
    ///
    /// Returns the response to write back, if the request has one.
    pub fn handle(&self, session: &Arc<Session>, frame: Frame) -> Option<Frame> {
        let transaction_id = frame.transaction_id();
        let message = match Message::from_frame(&frame) {
            Ok(message) => message,
            Err(error) => {
                warn!(
                    session_id = session.id(),
                    transaction_id,
                    message_type = frame.header.message_type_raw(),
                    %error,
                    "dropping undecodable message"
                );
                return None;
            },
        };

        if !session.is_signed_in() && !matches!(message, Message::SigninRequest(_)) {
            warn!(
                session_id = session.id(),
                transaction_id,
                message_type = ?message.message_type(),
                "dropping request before sign-in"
            );
            return None;
        }

        let response = match message {
            Message::SigninRequest(request) => Some(self.on_signin(session, request)),
            Message::CreateRequest(request) => Some(self.on_create(session, request)),
            Message::DeleteRequest(request) => Some(self.on_delete(request)),
            Message::SetValueIndication(indication) => {
                self.on_set_value(session, indication);
                None
            },
            Message::SubscribeRequest(request) => Some(self.on_subscribe(session, request)),
            Message::UnsubscribeRequest(request) => Some(self.on_unsubscribe(session, request)),
            Message::GetValueRequest(request) => Some(self.on_get_value(request)),
            Message::RpcRequest(request) => self.on_rpc(session, transaction_id, request),
            Message::HandleRpcResponse(response) => {
                self.on_handle_rpc_response(session, response);
                None
            },
            Message::GetSpecificMetaRequest(request) => Some(self.on_get_specific_meta(request)),
            other => {
                warn!(
                    session_id = session.id(),
                    message_type = ?other.message_type(),
                    "dropping message a client does not send"
                );
                None
            },
        };

        response.and_then(|message| encode(message, transaction_id))
    }

    fn on_signin(&self, session: &Session, request: SigninRequest) -> Message {
        let version = if request.version == PROTOCOL_VERSION {
            PROTOCOL_VERSION
        } else {
            warn!(
                session_id = session.id(),
                requested = request.version,
                supported = PROTOCOL_VERSION,
                "unsupported protocol version"
            );
            0
        };

        session.sign_in(request.refresh_rate, request.features);
        info!(
            session_id = session.id(),
            refresh_rate = request.refresh_rate,
            features = request.features.bits(),
            "signed in"
        );
        Message::SigninResponse(SigninResponse { version })
    }

    fn on_create(&self, session: &Session, request: CreateRequest) -> Message {
        let CreateRequest { property_type, data, path } = request;
        if !self.meta_fits(property_type, &path) {
            debug!(
                session_id = session.id(),
                path_len = path.len(),
                "create rejected, path too long"
            );
            return create_rejected(CreateCode::MalformedPath);
        }
        if !self.update_fits(&data) {
            debug!(
                session_id = session.id(),
                path = %path,
                len = data.len(),
                "create rejected, value too large"
            );
            return create_rejected(CreateCode::TypeError);
        }

        let result = self.store.create_with(&path, property_type, data, session.id(), |meta| {
            self.registry.broadcast_meta(&MetaEntry::Created(MetaCreate {
                uuid: meta.uuid,
                property_type: meta.property_type,
                path: meta.path.clone(),
            }));
        });

        let (code, uuid) = match result {
            Ok(uuid) => (CreateCode::Ok, uuid),
            Err(error) => {
                debug!(session_id = session.id(), path = %path, %error, "create rejected");
                (create_code(error), NO_UUID)
            },
        };
        Message::CreateResponse(CreateResponse { code, uuid })
    }

    fn on_delete(&self, request: DeleteRequest) -> Message {
        let result = self.store.delete_with(&request.path, |uuid| {
            self.registry.broadcast_meta(&MetaEntry::Deleted(MetaDelete { uuid }));
        });

        let code = match result {
            Ok(_) => DeleteCode::Ok,
            Err(error) => {
                debug!(path = %request.path, %error, "delete rejected");
                delete_code(error)
            },
        };
        Message::DeleteResponse(DeleteResponse { code })
    }

    fn on_set_value(&self, session: &Session, indication: SetValueIndication) {
        if !self.update_fits(&indication.data) {
            warn!(
                session_id = session.id(),
                uuid = indication.uuid,
                len = indication.data.len(),
                "value too large to announce, ignoring"
            );
            return;
        }
        if let Err(error) = self.store.set_value(indication.uuid, indication.data) {
            warn!(session_id = session.id(), uuid = indication.uuid, %error, "set value failed");
        }
    }

    fn on_subscribe(&self, session: &Arc<Session>, request: SubscribeRequest) -> Message {
        let watcher: Arc<dyn ValueWatcher> = Arc::clone(session) as Arc<dyn ValueWatcher>;
        let code = match self.store.subscribe(request.uuid, &watcher) {
            Ok(()) => SubscribeCode::Ok,
            Err(StoreError::NotAValue(_)) => SubscribeCode::NotAValue,
            Err(_) => SubscribeCode::UuidNotFound,
        };
        Message::SubscribeResponse(SubscribeResponse { code })
    }

    fn on_unsubscribe(&self, session: &Session, request: UnsubscribeRequest) -> Message {
        let code = match self.store.unsubscribe(request.uuid, session.id()) {
            Ok(()) => UnsubscribeCode::Ok,
            Err(StoreError::NotSubscribed(_)) => UnsubscribeCode::NotSubscribed,
            Err(StoreError::NotAValue(_)) => UnsubscribeCode::NotAValue,
            Err(_) => UnsubscribeCode::UuidNotFound,
        };
        Message::UnsubscribeResponse(UnsubscribeResponse { code })
    }

    fn on_get_value(&self, request: GetValueRequest) -> Message {
        let data = self.store.get_value(request.uuid).unwrap_or_default();
        Message::GetValueResponse(GetValueResponse { data })
    }

    fn on_get_specific_meta(&self, request: GetSpecificMetaRequest) -> Message {
        let meta = match self.store.meta(&request.path) {
            Ok(meta) => {
                MetaCreate { uuid: meta.uuid, property_type: meta.property_type, path: meta.path }
            },
            Err(_) => {
                MetaCreate { uuid: NO_UUID, property_type: PropertyType::Value, path: request.path }
            },
        };
        Message::GetSpecificMetaResponse(GetSpecificMetaResponse { meta })
    }

    /// Forward a call to the endpoint's owner. Answers immediately with an
    /// empty return value when there is nobody to forward to.
    fn on_rpc(&self, caller: &Session, transaction_id: u32, request: RpcRequest) -> Option<Message> {
        let RpcRequest { uuid, parameter } = request;
        let empty_answer = Some(Message::RpcResponse(RpcResponse { return_value: Bytes::new() }));

        let Ok(endpoint) = self.store.get_by_uuid(uuid) else {
            debug!(session_id = caller.id(), uuid, "rpc on unknown uuid");
            return empty_answer;
        };
        let Some(handler_id) = endpoint.rpc_handler() else {
            debug!(session_id = caller.id(), uuid, "rpc on a property that is not an endpoint");
            return empty_answer;
        };
        let Some(handler) = self.registry.get(handler_id).filter(|h| !h.is_stopped()) else {
            debug!(session_id = caller.id(), uuid, handler_id, "rpc handler is gone");
            return empty_answer;
        };

        let forward = Message::HandleRpcRequest(HandleRpcRequest {
            caller_id: caller.id(),
            caller_transaction_id: transaction_id,
            uuid,
            parameter,
        });
        let frame = encode(forward, UNSOLICITED_TRANSACTION_ID)?;

        caller.add_pending_rpc(transaction_id, endpoint);
        handler.push_frame(frame);
        debug!(session_id = caller.id(), uuid, handler_id, transaction_id, "rpc forwarded");
        None
    }

    fn on_handle_rpc_response(&self, handler: &Session, response: HandleRpcResponse) {
        let HandleRpcResponse { caller_id, caller_transaction_id, return_value } = response;

        let Some(caller) = self.registry.get(caller_id) else {
            warn!(session_id = handler.id(), caller_id, "rpc answer for a caller that is gone");
            return;
        };
        if !caller.complete_rpc(caller_transaction_id, handler.id()) {
            warn!(
                session_id = handler.id(),
                caller_id,
                caller_transaction_id,
                "rpc answer without a pending call on this handler"
            );
            return;
        }

        let answer = Message::RpcResponse(RpcResponse { return_value });
        if let Some(frame) = encode(answer, caller_transaction_id) {
            caller.push_frame(frame);
        }
    }

    /// Whether a creation at `path` can be announced in a message of its own.
    fn meta_fits(&self, property_type: PropertyType, path: &str) -> bool {
        let announcement = MetaUpdateNotification {
            creations: vec![MetaCreate { uuid: NO_UUID, property_type, path: path.to_owned() }],
            deletions: Vec::new(),
        };
        announcement.encoded_len() <= self.max_body
    }

    /// Whether `data` can be delivered to a subscriber in a message of its own.
    fn update_fits(&self, data: &Bytes) -> bool {
        let update = PropertyUpdateNotification {
            updates: vec![PropertyUpdate { uuid: NO_UUID, data: data.clone() }],
        };
        update.encoded_len() <= self.max_body
    }
}

fn create_rejected(code: CreateCode) -> Message {
    Message::CreateResponse(CreateResponse { code, uuid: NO_UUID })
}

fn encode(message: Message, transaction_id: u32) -> Option<Frame> {
    match message.into_frame(transaction_id) {
        Ok(frame) => Some(frame),
        Err(error) => {
            error!(transaction_id, %error, "failed to encode message");
            None
        },
    }
}

fn create_code(error: StoreError) -> CreateCode {
    match error {
        StoreError::MalformedPath => CreateCode::MalformedPath,
        StoreError::ParentNotFound => CreateCode::ParentNotFound,
        StoreError::AlreadyExist => CreateCode::AlreadyExist,
        StoreError::TypeError => CreateCode::TypeError,
        other => {
            error!(error = %other, "create failed unexpectedly");
            CreateCode::TypeError
        },
    }
}

fn delete_code(error: StoreError) -> DeleteCode {
    match error {
        StoreError::MalformedPath => DeleteCode::MalformedPath,
        StoreError::NotEmpty => DeleteCode::NotEmpty,
        StoreError::NotPermitted => DeleteCode::NotPermitted,
        _ => DeleteCode::ObjectNotFound,
    }
}
