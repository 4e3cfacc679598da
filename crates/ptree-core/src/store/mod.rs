//! Property store.
//!
//! A single tree rooted at an unnamed node with uuid 0, plus a uuid index
//! over every other live property.
//!
//! # Locking
//!
//! - each node's children: `RwLock`, taken top-down (parent before child)
//! - each value's payload: `RwLock`
//! - each value's watchers: `Mutex`, never held while a watcher runs
//! - uuid index: sharded `DashMap`
//! - uuid allocator: `Mutex`, innermost
//!
//! Create and delete hold the parent's children lock across the index
//! update, so a property is either reachable both by path and by uuid, or
//! by neither.

mod path;
mod property;
mod uuid;

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use ptree_proto::{PropertyType, Uuid};
use tracing::debug;

pub use self::{
    path::{MAX_SEGMENT_LEN, segments},
    property::{NodeData, Property, PropertyKind, ValueData, ValueWatcher},
    uuid::{FIRST_UUID, UuidAllocator},
};
use crate::{SessionId, error::StoreError};

/// Identity of a property as announced to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyMeta {
    /// Uuid
    pub uuid: Uuid,
    /// Kind of property
    pub property_type: PropertyType,
    /// Absolute path
    pub path: String,
}

/// The shared property tree.
#[derive(Debug)]
pub struct PropertyStore {
    root: Arc<Property>,
    index: DashMap<Uuid, Arc<Property>>,
    allocator: UuidAllocator,
}

impl PropertyStore {
    /// Empty tree holding only the root.
    pub fn new() -> Self {
        Self {
            root: Arc::new(Property::root()),
            index: DashMap::new(),
            allocator: UuidAllocator::new(),
        }
    }

    /// Create a property at `path`.
    ///
    /// `owner` becomes the handler of an rpc endpoint and is ignored for
    /// other types. Nodes and rpc endpoints must be created with an empty
    /// payload.
    pub fn create(
        &self,
        path: &str,
        property_type: PropertyType,
        payload: Bytes,
        owner: SessionId,
    ) -> Result<Uuid, StoreError> {
        self.create_with(path, property_type, payload, owner, |_| {})
    }

    /// [`PropertyStore::create`], running `on_created` before the parent is
    /// unlocked.
    ///
    /// Announcements made from `on_created` are therefore ordered the same
    /// way as the mutations they describe.
    pub fn create_with(
        &self,
        path: &str,
        property_type: PropertyType,
        payload: Bytes,
        owner: SessionId,
        on_created: impl FnOnce(&PropertyMeta),
    ) -> Result<Uuid, StoreError> {
        let segments = segments(path)?;
        let Some((name, ancestors)) = segments.split_last() else {
            return Err(StoreError::AlreadyExist);
        };

        if property_type != PropertyType::Value && !payload.is_empty() {
            return Err(StoreError::TypeError);
        }

        let parent = self.resolve(ancestors).ok_or(StoreError::ParentNotFound)?;
        let node = parent.as_node().ok_or(StoreError::ParentNotFound)?;

        let mut children = node.children.write();
        if children.detached {
            return Err(StoreError::ParentNotFound);
        }
        if children.entries.contains_key(*name) {
            return Err(StoreError::AlreadyExist);
        }

        let uuid = self.allocator.allocate().ok_or(StoreError::UuidExhausted)?;
        let property = Arc::new(Property::new(uuid, name, &parent, property_type, payload, owner));
        children.entries.insert((*name).to_owned(), Arc::clone(&property));
        self.index.insert(uuid, property);
        on_created(&PropertyMeta { uuid, property_type, path: path.to_owned() });
        drop(children);

        debug!(uuid, path, ?property_type, "created property");
        Ok(uuid)
    }

    /// Delete the property at `path` and return its uuid.
    ///
    /// Nodes must be empty. The uuid goes back to the allocator but is not
    /// reissued while anything still holds the property.
    pub fn delete(&self, path: &str) -> Result<Uuid, StoreError> {
        self.delete_with(path, |_| {})
    }

    /// [`PropertyStore::delete`], running `on_deleted` before the parent is
    /// unlocked.
    pub fn delete_with(
        &self,
        path: &str,
        on_deleted: impl FnOnce(Uuid),
    ) -> Result<Uuid, StoreError> {
        let segments = segments(path)?;
        let Some((name, ancestors)) = segments.split_last() else {
            return Err(StoreError::NotPermitted);
        };

        let parent = self.resolve(ancestors).ok_or(StoreError::ObjectNotFound)?;
        let node = parent.as_node().ok_or(StoreError::ObjectNotFound)?;

        let mut children = node.children.write();
        if children.detached {
            return Err(StoreError::ObjectNotFound);
        }
        let child = children.entries.get(*name).cloned().ok_or(StoreError::ObjectNotFound)?;

        if let Some(child_node) = child.as_node() {
            let mut grandchildren = child_node.children.write();
            if !grandchildren.entries.is_empty() {
                return Err(StoreError::NotEmpty);
            }
            grandchildren.detached = true;
        }

        children.entries.remove(*name);
        let uuid = child.uuid();
        self.index.remove(&uuid);
        self.allocator.release(uuid, Arc::downgrade(&child));
        on_deleted(uuid);
        drop(children);

        debug!(uuid, path, "deleted property");
        Ok(uuid)
    }

    /// Look up a property by path. `"/"` is the root.
    pub fn get_by_path(&self, path: &str) -> Result<Arc<Property>, StoreError> {
        let segments = segments(path)?;
        self.resolve(&segments).ok_or(StoreError::ObjectNotFound)
    }

    /// Look up a property by uuid.
    pub fn get_by_uuid(&self, uuid: Uuid) -> Result<Arc<Property>, StoreError> {
        self.index
            .get(&uuid)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StoreError::ObjectNotFound)
    }

    /// Metadata of the property at `path`.
    pub fn meta(&self, path: &str) -> Result<PropertyMeta, StoreError> {
        let property = self.get_by_path(path)?;
        Ok(PropertyMeta {
            uuid: property.uuid(),
            property_type: property.property_type(),
            path: property.path(),
        })
    }

    /// Current payload of a value.
    pub fn get_value(&self, uuid: Uuid) -> Result<Bytes, StoreError> {
        let property = self.get_by_uuid(uuid)?;
        let value = property.as_value().ok_or(StoreError::NotAValue(uuid))?;
        Ok(value.get())
    }

    /// Replace the payload of a value and notify its watchers.
    pub fn set_value(&self, uuid: Uuid, data: Bytes) -> Result<(), StoreError> {
        let property = self.get_by_uuid(uuid)?;
        let value = property.as_value().ok_or(StoreError::NotAValue(uuid))?;
        value.set(uuid, data);
        Ok(())
    }

    /// Register `watcher` for changes of a value.
    pub fn subscribe(&self, uuid: Uuid, watcher: &Arc<dyn ValueWatcher>) -> Result<(), StoreError> {
        let property = self.get_by_uuid(uuid).map_err(|_| StoreError::UuidNotFound(uuid))?;
        let value = property.as_value().ok_or(StoreError::NotAValue(uuid))?;
        value.watch(watcher);
        Ok(())
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, uuid: Uuid, subscriber: SessionId) -> Result<(), StoreError> {
        let property = self.get_by_uuid(uuid).map_err(|_| StoreError::UuidNotFound(uuid))?;
        let value = property.as_value().ok_or(StoreError::NotAValue(uuid))?;
        if value.unwatch(subscriber) { Ok(()) } else { Err(StoreError::NotSubscribed(uuid)) }
    }

    /// Number of properties, root excluded.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True if only the root exists.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The root node.
    pub fn root(&self) -> &Arc<Property> {
        &self.root
    }

    fn resolve(&self, segments: &[&str]) -> Option<Arc<Property>> {
        let mut current = Arc::clone(&self.root);
        for segment in segments {
            let next = current.as_node()?.get(segment)?;
            current = next;
        }
        Some(current)
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}
