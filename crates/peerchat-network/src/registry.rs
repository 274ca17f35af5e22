//! Session registry: the single source of truth for reachable peers.
//!
//! Maps each peer id to at most one live [`Session`]. Registering a
//! session for a peer that already has one closes the old session
//! first. Iteration works on a snapshot, so sessions may be added or
//! removed while a broadcast is walking the list.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use peerchat_types::{PeerId, SessionId};

use crate::session::Session;

/// Thread-safe peer id → session map.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<PeerId, Arc<Session>>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session`, closing and returning any session it replaces.
    pub fn put(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        let replaced = self.lock().insert(session.peer().clone(), session);
        if let Some(old) = &replaced {
            tracing::info!(peer = %old.peer(), old = %old.id(), "session replaced by reconnect");
            old.close();
        }
        replaced
    }

    /// Looks up the live session for `peer`.
    pub fn get(&self, peer: &PeerId) -> Option<Arc<Session>> {
        self.lock().get(peer).cloned()
    }

    /// Removes and returns the session for `peer`, whatever its id.
    pub fn remove(&self, peer: &PeerId) -> Option<Arc<Session>> {
        self.lock().remove(peer)
    }

    /// Removes the entry for `peer` only if it is still session `id`.
    ///
    /// Returns `true` if something was removed. A loop belonging to a
    /// replaced session gets `false` and leaves the newer one alone.
    pub fn remove_if_current(&self, peer: &PeerId, id: SessionId) -> bool {
        let mut sessions = self.lock();
        match sessions.get(peer) {
            Some(current) if current.id() == id => {
                sessions.remove(peer);
                true
            }
            _ => false,
        }
    }

    /// Stable copy of all live sessions.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.lock().values().cloned().collect()
    }

    /// Calls `f` for every session in a snapshot.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Session>),
    {
        for session in self.snapshot() {
            f(&session);
        }
    }

    /// Sorted list of registered peer ids.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.lock().keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if no session is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and closes every session. Returns them for orderly shutdown.
    pub fn close_all(&self) -> Vec<Arc<Session>> {
        let drained: Vec<Arc<Session>> = self.lock().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close();
        }
        drained
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PeerId, Arc<Session>>> {
        // Poisoning leaves the map intact.
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
