//! Conversation persistence.
//!
//! Each assistant run is one row: the run id, the owning user and the full
//! message list as JSON.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use super::error::StorageError;
use super::state::{timestamp_ms, AssistantRun};

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn quote_identifier(name: &str) -> Result<String, StorageError> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(format!("\"{name}\""))
    } else {
        Err(StorageError::InvalidTableName(name.to_string()))
    }
}

pub struct SqliteAssistantStorage {
    table_name: String,
    table: String,
    conn: Mutex<Connection>,
}

impl SqliteAssistantStorage {
    pub fn open(path: impl AsRef<Path>, table_name: &str) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?, table_name)
    }

    pub fn with_connection(conn: Connection, table_name: &str) -> Result<Self, StorageError> {
        let table = quote_identifier(table_name)?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                run_id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                messages TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );"
        ))?;

        Ok(Self {
            table_name: table_name.to_string(),
            table,
            conn: Mutex::new(conn),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|e| StorageError::Lock(e.to_string()))
    }

    pub fn read(&self, run_id: &str) -> Result<Option<AssistantRun>, StorageError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT run_id, user_id, messages, created_at, updated_at FROM {} WHERE run_id = ?1",
                    self.table
                ),
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((run_id, user_id, messages, created_at, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(AssistantRun {
            run_id,
            user_id,
            messages: serde_json::from_str(&messages)?,
            created_at: created_at as u64,
            updated_at: updated_at as u64,
        }))
    }

    /// Inserts or replaces the run and bumps its `updated_at`.
    pub fn upsert(&self, run: &AssistantRun) -> Result<AssistantRun, StorageError> {
        let mut stored = run.clone();
        stored.updated_at = timestamp_ms().max(run.created_at);

        let messages = serde_json::to_string(&stored.messages)?;
        let conn = self.lock()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (run_id, user_id, messages, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(run_id) DO UPDATE SET
                    user_id = excluded.user_id,
                    messages = excluded.messages,
                    updated_at = excluded.updated_at",
                self.table
            ),
            params![
                stored.run_id,
                stored.user_id,
                messages,
                stored.created_at as i64,
                stored.updated_at as i64
            ],
        )?;

        debug!(table = %self.table_name, run_id = %stored.run_id, messages = stored.messages.len(), "saved run");
        Ok(stored)
    }

    /// Run ids of a user, most recently updated first.
    pub fn run_ids(&self, user_id: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT run_id FROM {} WHERE user_id = ?1 ORDER BY updated_at DESC, run_id",
            self.table
        ))?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}
