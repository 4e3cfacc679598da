//! Properties: nodes, values and rpc endpoints.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Weak},
};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use ptree_proto::{PropertyType, Uuid};
use tracing::trace;

use crate::SessionId;

/// Receives the new payload of a watched value.
///
/// Implemented by sessions. Delivery must not block: the call happens on
/// the thread that performed the write.
pub trait ValueWatcher: Send + Sync {
    /// Identity under which this watcher is registered.
    fn subscriber_id(&self) -> SessionId;

    /// Deliver a change. Returns `false` once the subscriber can no longer
    /// receive anything, which removes it from the value.
    fn on_update(&self, uuid: Uuid, data: &Bytes) -> bool;
}

/// Children of a node.
#[derive(Debug, Default)]
pub(crate) struct Children {
    pub(crate) entries: BTreeMap<String, Arc<Property>>,
    /// Set when the node is deleted so racing creates under it fail.
    pub(crate) detached: bool,
}

/// Container of other properties.
#[derive(Debug, Default)]
pub struct NodeData {
    pub(crate) children: RwLock<Children>,
}

impl NodeData {
    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.children.read().entries.len()
    }

    /// True if the node has no children.
    pub fn is_empty(&self) -> bool {
        self.children.read().entries.is_empty()
    }

    /// Names of the direct children, sorted.
    pub fn child_names(&self) -> Vec<String> {
        self.children.read().entries.keys().cloned().collect()
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<Property>> {
        self.children.read().entries.get(name).cloned()
    }
}

/// Opaque payload with change watchers.
pub struct ValueData {
    payload: RwLock<Bytes>,
    watchers: Mutex<HashMap<SessionId, Weak<dyn ValueWatcher>>>,
}

impl ValueData {
    fn new(payload: Bytes) -> Self {
        Self { payload: RwLock::new(payload), watchers: Mutex::new(HashMap::new()) }
    }

    /// Current payload.
    pub fn get(&self) -> Bytes {
        self.payload.read().clone()
    }

    /// Replace the payload and notify every watcher.
    ///
    /// Watchers are called with no lock held. Those that are gone or report
    /// themselves unreachable are removed afterwards.
    pub fn set(&self, uuid: Uuid, data: Bytes) {
        *self.payload.write() = data.clone();

        let watchers: Vec<(SessionId, Weak<dyn ValueWatcher>)> =
            self.watchers.lock().iter().map(|(id, w)| (*id, Weak::clone(w))).collect();

        let mut unreachable = Vec::new();
        for (id, watcher) in watchers {
            let delivered = watcher.upgrade().is_some_and(|w| w.on_update(uuid, &data));
            if !delivered {
                unreachable.push((id, watcher));
            }
        }

        if !unreachable.is_empty() {
            let mut registered = self.watchers.lock();
            for (id, watcher) in unreachable {
                // Only drop the registration we failed on; the subscriber may
                // have re-subscribed in the meantime.
                if registered.get(&id).is_some_and(|current| Weak::ptr_eq(current, &watcher)) {
                    trace!(uuid, subscriber = id, "dropping unreachable watcher");
                    registered.remove(&id);
                }
            }
        }
    }

    /// Register a watcher. Registering the same subscriber again succeeds
    /// and keeps a single registration.
    pub fn watch(&self, watcher: &Arc<dyn ValueWatcher>) {
        self.watchers.lock().insert(watcher.subscriber_id(), Arc::downgrade(watcher));
    }

    /// Remove a watcher. Returns `false` if it was not registered.
    pub fn unwatch(&self, subscriber: SessionId) -> bool {
        self.watchers.lock().remove(&subscriber).is_some()
    }

    /// Number of registered watchers.
    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }
}

impl fmt::Debug for ValueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueData")
            .field("len", &self.payload.read().len())
            .field("watchers", &self.watcher_count())
            .finish()
    }
}

/// Variant-specific state.
#[derive(Debug)]
pub enum PropertyKind {
    /// Container
    Node(NodeData),
    /// Payload holder
    Value(ValueData),
    /// Endpoint forwarding invocations to its creator
    Rpc {
        /// Session that created the endpoint and answers its invocations
        handler: SessionId,
    },
}

/// An entry in the tree.
#[derive(Debug)]
pub struct Property {
    uuid: Uuid,
    name: String,
    parent: Weak<Property>,
    kind: PropertyKind,
}

impl Property {
    pub(crate) fn root() -> Self {
        Self {
            uuid: ptree_proto::NO_UUID,
            name: String::new(),
            parent: Weak::new(),
            kind: PropertyKind::Node(NodeData::default()),
        }
    }

    pub(crate) fn new(
        uuid: Uuid,
        name: &str,
        parent: &Arc<Property>,
        property_type: PropertyType,
        payload: Bytes,
        owner: SessionId,
    ) -> Self {
        let kind = match property_type {
            PropertyType::Node => PropertyKind::Node(NodeData::default()),
            PropertyType::Value => PropertyKind::Value(ValueData::new(payload)),
            PropertyType::Rpc => PropertyKind::Rpc { handler: owner },
        };
        Self { uuid, name: name.to_owned(), parent: Arc::downgrade(parent), kind }
    }

    /// Uuid of this property (0 for the root).
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Last path segment (empty for the root).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Variant-specific state.
    #[must_use]
    pub fn kind(&self) -> &PropertyKind {
        &self.kind
    }

    /// Wire type of this property.
    #[must_use]
    pub fn property_type(&self) -> PropertyType {
        match self.kind {
            PropertyKind::Node(_) => PropertyType::Node,
            PropertyKind::Value(_) => PropertyType::Value,
            PropertyKind::Rpc { .. } => PropertyType::Rpc,
        }
    }

    /// Node state, if this is a node.
    #[must_use]
    pub fn as_node(&self) -> Option<&NodeData> {
        match &self.kind {
            PropertyKind::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Value state, if this is a value.
    #[must_use]
    pub fn as_value(&self) -> Option<&ValueData> {
        match &self.kind {
            PropertyKind::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Handler session, if this is an rpc endpoint.
    #[must_use]
    pub fn rpc_handler(&self) -> Option<SessionId> {
        match self.kind {
            PropertyKind::Rpc { handler } => Some(handler),
            _ => None,
        }
    }

    /// Absolute path rebuilt from parent links.
    ///
    /// Stops at the first ancestor that no longer exists, so a property
    /// detached together with its parent reports a truncated path.
    pub fn path(&self) -> String {
        let mut names = vec![self.name.as_str()];
        let mut ancestors = Vec::new();
        let mut cursor = self.parent.upgrade();
        while let Some(parent) = cursor {
            cursor = parent.parent.upgrade();
            ancestors.push(parent);
        }
        names.extend(ancestors.iter().map(|p| p.name.as_str()));

        let mut path = String::new();
        for name in names.iter().rev().filter(|name| !name.is_empty()) {
            path.push('/');
            path.push_str(name);
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }
}
