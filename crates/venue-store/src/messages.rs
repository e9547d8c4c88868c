use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;

/// A text message submitted by an audience member. Immutable once stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessage {
    pub id: i64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only access to the `messages` table.
#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message, stamping it with the current time.
    #[instrument(skip(self, message), fields(len = message.len()))]
    pub fn insert(&self, message: &str) -> Result<TextMessage, StoreError> {
        let created_at = Utc::now();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (message, created_at) VALUES (?1, ?2)",
                rusqlite::params![message, created_at.to_rfc3339()],
            )?;
            Ok(TextMessage {
                id: conn.last_insert_rowid(),
                message: message.to_owned(),
                created_at,
            })
        })
    }

    /// Every stored message in insertion order.
    pub fn load_all(&self) -> Result<Vec<TextMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id, message, created_at FROM messages ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut messages = Vec::new();
            for row in rows {
                let (id, message, created_at) = row?;
                messages.push(TextMessage {
                    id,
                    message,
                    created_at: parse_timestamp(&created_at)?,
                });
            }
            Ok(messages)
        })
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        self.db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table: "messages",
            column: "created_at",
            detail: format!("{raw:?}: {e}"),
        })
}
