//! Live session registry.
//!
//! Used for two things: broadcasting structural changes to every signed-in
//! session, and finding the session on the other end of an rpc call.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;
use ptree_core::SessionId;

use crate::{outbox::MetaEntry, session::Session};

/// Sessions by id.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Empty registry. Session ids start at 1.
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Reserve a fresh session id.
    pub fn next_session_id(&self) -> SessionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Add a session.
    pub fn register(&self, session: Arc<Session>) {
        self.sessions.write().insert(session.id(), session);
    }

    /// Remove a session. Calls other sessions have pending on it are
    /// answered with an empty return value.
    pub fn unregister(&self, id: SessionId) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(&id)?;
        for session in self.sessions.read().values() {
            session.abandon_rpcs_handled_by(id);
        }
        Some(removed)
    }

    /// Look up a session.
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Queue a structural change on every signed-in session.
    ///
    /// Only enqueues; never waits on a connection.
    pub fn broadcast_meta(&self, entry: &MetaEntry) {
        let sessions = self.sessions.read();
        for session in sessions.values().filter(|s| s.is_signed_in()) {
            session.push_meta(entry.clone());
        }
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// True if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Stop every registered session.
    pub fn stop_all(&self) {
        for session in self.sessions.read().values() {
            session.stop();
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
