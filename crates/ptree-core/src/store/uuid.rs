//! Uuid allocation.
//!
//! Fresh uuids come from a counter starting at [`FIRST_UUID`]. Uuids of
//! deleted properties go to a FIFO pool and are handed out again before the
//! counter advances, but only once nothing holds the deleted property any
//! more. An in-flight operation that cloned the `Arc` before the delete
//! therefore never sees its uuid reassigned underneath it.

use std::{collections::VecDeque, sync::Weak};

use parking_lot::Mutex;
use ptree_proto::Uuid;

use super::property::Property;

/// Lowest uuid handed out; smaller values are reserved.
pub const FIRST_UUID: Uuid = 100;

#[derive(Debug)]
struct AllocatorState {
    next: Option<Uuid>,
    released: VecDeque<(Uuid, Weak<Property>)>,
}

/// Uuid allocator owned by the store.
#[derive(Debug)]
pub struct UuidAllocator {
    state: Mutex<AllocatorState>,
}

impl UuidAllocator {
    /// Allocator whose first uuid is [`FIRST_UUID`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AllocatorState { next: Some(FIRST_UUID), released: VecDeque::new() }),
        }
    }

    /// Next free uuid, or `None` once the 32-bit space is used up.
    pub fn allocate(&self) -> Option<Uuid> {
        let mut state = self.state.lock();

        let reusable = state.released.iter().position(|(_, property)| property.strong_count() == 0);
        if let Some((uuid, _)) = reusable.and_then(|index| state.released.remove(index)) {
            return Some(uuid);
        }

        let uuid = state.next?;
        state.next = uuid.checked_add(1);
        Some(uuid)
    }

    /// Return the uuid of a deleted property.
    pub fn release(&self, uuid: Uuid, property: Weak<Property>) {
        self.state.lock().released.push_back((uuid, property));
    }

    /// Uuids waiting in the pool.
    pub fn released(&self) -> usize {
        self.state.lock().released.len()
    }
}

impl Default for UuidAllocator {
    fn default() -> Self {
        Self::new()
    }
}
