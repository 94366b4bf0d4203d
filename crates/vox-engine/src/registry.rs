use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use vox_core::ids::{ClientId, SessionId};

use crate::channel::InputChannel;

/// Tracks every session's lifecycle state under one lock, so every
/// check-then-act (start dedup, activation, stop) is atomic.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionEntry>,
    /// Sessions whose first connect attempt is still in flight.
    starting: HashSet<SessionId>,
}

struct SessionEntry {
    active: bool,
    destination: ClientId,
    channel: Arc<InputChannel>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Claim the right to start a session. Returns false when the session
    /// is already active or a start is already in flight, so at most one
    /// driver task ever exists per id.
    pub fn begin_start(&self, id: &SessionId) -> bool {
        let mut inner = self.inner.lock();
        let active = inner.sessions.get(id).map(|e| e.active).unwrap_or(false);
        if active || inner.starting.contains(id) {
            return false;
        }
        inner.starting.insert(id.clone());
        true
    }

    /// Mark a session live and install its input channel. A pre-existing
    /// entry keeps its current destination, so a client that re-attached
    /// during a reconnect is not clobbered.
    pub fn activate(&self, id: &SessionId, destination: ClientId, channel: Arc<InputChannel>) {
        let mut inner = self.inner.lock();
        inner.starting.remove(id);
        match inner.sessions.get_mut(id) {
            Some(entry) => {
                entry.active = true;
                entry.channel = channel;
            }
            None => {
                inner.sessions.insert(
                    id.clone(),
                    SessionEntry {
                        active: true,
                        destination,
                        channel,
                    },
                );
            }
        }
    }

    /// Point a session's output at a different client. The live connection
    /// is untouched.
    pub fn retarget(&self, id: &SessionId, destination: ClientId) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(id) {
            Some(entry) => {
                debug!(session_id = %id, destination = %destination, "session retargeted");
                entry.destination = destination;
                true
            }
            None => false,
        }
    }

    /// Request a stop: clears the active flag only. The driver observes it
    /// on its next poll and finalizes.
    pub fn stop(&self, id: &SessionId) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(id) {
            Some(entry) if entry.active => {
                entry.active = false;
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, id: &SessionId) -> bool {
        self.inner
            .lock()
            .sessions
            .get(id)
            .map(|e| e.active)
            .unwrap_or(false)
    }

    pub fn destination(&self, id: &SessionId) -> Option<ClientId> {
        self.inner
            .lock()
            .sessions
            .get(id)
            .map(|e| e.destination.clone())
    }

    pub fn channel(&self, id: &SessionId) -> Option<Arc<InputChannel>> {
        self.inner
            .lock()
            .sessions
            .get(id)
            .map(|e| e.channel.clone())
    }

    /// Remove every trace of a session, including a pending start mark.
    pub fn remove(&self, id: &SessionId) {
        let mut inner = self.inner.lock();
        inner.starting.remove(id);
        inner.sessions.remove(id);
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.lock().sessions.keys().cloned().collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
