use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, instrument};

use vox_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;

/// Durable resumption handles, at most one per session.
///
/// A newly saved handle supersedes any previous one for the same session.
/// Handles are cleared only explicitly; reads go through an in-memory cache
/// populated lazily from the database.
pub struct HandleStore {
    db: Database,
    cache: Mutex<HashMap<SessionId, String>>,
}

impl HandleStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Save a handle for a session, superseding any previous one.
    #[instrument(skip(self, handle), fields(session_id = %session_id))]
    pub fn save(&self, session_id: &SessionId, handle: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO handles (session_id, handle, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET handle = ?2, updated_at = ?3",
                rusqlite::params![session_id.as_str(), handle, now],
            )?;
            Ok(())
        })?;
        self.cache
            .lock()
            .insert(session_id.clone(), handle.to_string());
        debug!(session_id = %session_id, "resumption handle saved");
        Ok(())
    }

    /// Load the current handle for a session, if one exists.
    pub fn load(&self, session_id: &SessionId) -> Result<Option<String>, StoreError> {
        if let Some(handle) = self.cache.lock().get(session_id) {
            return Ok(Some(handle.clone()));
        }

        let handle: Option<String> = self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT handle FROM handles WHERE session_id = ?1",
                    [session_id.as_str()],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(StoreError::from(other)),
                })?;
            Ok(result)
        })?;

        if let Some(ref h) = handle {
            self.cache.lock().insert(session_id.clone(), h.clone());
        }
        Ok(handle)
    }

    pub fn has(&self, session_id: &SessionId) -> Result<bool, StoreError> {
        Ok(self.load(session_id)?.is_some())
    }

    /// Remove a session's handle. Fresh starts only happen after this.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn clear(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM handles WHERE session_id = ?1",
                [session_id.as_str()],
            )?;
            Ok(())
        })?;
        self.cache.lock().remove(session_id);
        debug!(session_id = %session_id, "resumption handle cleared");
        Ok(())
    }
}
