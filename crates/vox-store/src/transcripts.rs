use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use vox_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;

/// Who said a transcript line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown transcript role: {other}")),
        }
    }
}

/// One role-tagged, timestamped transcript line.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub id: i64,
    pub session_id: SessionId,
    pub role: Role,
    pub text: String,
    pub created_at: String,
}

/// Append-only transcript log, one record stream per session.
pub struct TranscriptRepo {
    db: Database,
}

impl TranscriptRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, text), fields(session_id = %session_id, role = %role))]
    pub fn append(
        &self,
        session_id: &SessionId,
        role: Role,
        text: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO transcripts (session_id, role, text, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![session_id.as_str(), role.to_string(), text, now],
            )?;
            Ok(())
        })
    }

    /// List a session's transcript lines in insert order.
    pub fn list(&self, session_id: &SessionId) -> Result<Vec<TranscriptLine>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, text, created_at FROM transcripts
                 WHERE session_id = ?1 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                let role_str: String = row.get(2)?;
                results.push(TranscriptLine {
                    id: row.get(0)?,
                    session_id: SessionId::from_raw(row.get::<_, String>(1)?),
                    role: role_str
                        .parse()
                        .map_err(|e: String| StoreError::Database(e))?,
                    text: row.get(3)?,
                    created_at: row.get(4)?,
                });
            }
            Ok(results)
        })
    }
}
