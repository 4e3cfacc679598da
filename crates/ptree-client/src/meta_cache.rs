//! Local view of the server's tree structure.
//!
//! Fed by `MetaUpdateNotification`s and by explicit metadata lookups. The
//! cache only knows what the server announced after sign-in plus what was
//! looked up; it is not a full mirror.

use std::collections::HashMap;

use parking_lot::RwLock;
use ptree_proto::{
    Uuid,
    payloads::tree::{MetaCreate, MetaUpdateNotification},
};

#[derive(Debug, Default)]
struct Maps {
    by_uuid: HashMap<Uuid, MetaCreate>,
    by_path: HashMap<String, Uuid>,
}

/// Path and uuid index of known properties.
#[derive(Debug, Default)]
pub struct MetaCache {
    maps: RwLock<Maps>,
}

impl MetaCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a notification: creations first, then deletions.
    pub fn apply(&self, update: &MetaUpdateNotification) {
        let mut maps = self.maps.write();
        for created in &update.creations {
            insert(&mut maps, created.clone());
        }
        for deleted in &update.deletions {
            if let Some(meta) = maps.by_uuid.remove(&deleted.uuid) {
                maps.by_path.remove(&meta.path);
            }
        }
    }

    /// Record one property.
    pub fn insert(&self, meta: MetaCreate) {
        insert(&mut self.maps.write(), meta);
    }

    /// Metadata by uuid.
    pub fn get(&self, uuid: Uuid) -> Option<MetaCreate> {
        self.maps.read().by_uuid.get(&uuid).cloned()
    }

    /// Uuid of the property at `path`.
    pub fn uuid_of(&self, path: &str) -> Option<Uuid> {
        self.maps.read().by_path.get(path).copied()
    }

    /// Number of known properties.
    pub fn len(&self) -> usize {
        self.maps.read().by_uuid.len()
    }

    /// True if nothing is known.
    pub fn is_empty(&self) -> bool {
        self.maps.read().by_uuid.is_empty()
    }
}

fn insert(maps: &mut Maps, meta: MetaCreate) {
    // A uuid reissued for a new path replaces the stale entry.
    if let Some(old) = maps.by_uuid.get(&meta.uuid) {
        let old_path = old.path.clone();
        maps.by_path.remove(&old_path);
    }
    maps.by_path.insert(meta.path.clone(), meta.uuid);
    maps.by_uuid.insert(meta.uuid, meta);
}
