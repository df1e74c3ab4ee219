//! SQLite-backed chat and settings store.
//!
//! Every operation opens its own connection, does its work and drops it.
//! There are no long-held transactions. Correctness relies on a single
//! worker writing chat records, not on store isolation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, Row, params, params_from_iter};

use crate::errors::StoreError;
use crate::model::{ChatDescriptor, ChatKind, ChatRecord, LocalFields, MessageId, RemoteFields};
use crate::settings::DEFAULT_SETTINGS;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS chats (
        id                 INTEGER PRIMARY KEY AUTOINCREMENT,
        remote_id          INTEGER NOT NULL,
        access_hash        INTEGER NOT NULL,
        display_name       TEXT    NOT NULL,
        username           TEXT,
        storage_name       TEXT,
        kind               TEXT    NOT NULL,
        last_downloaded_id INTEGER NOT NULL DEFAULT 0,
        enabled            INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS chats_remote_id ON chats (remote_id);
    CREATE TABLE IF NOT EXISTS settings (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );";

const CHAT_COLUMNS: &str =
    "id, remote_id, access_hash, display_name, username, storage_name, kind, last_downloaded_id, enabled";

// ─── ChatFilter ───────────────────────────────────────────────────────────────

/// Optional constraints for [`Store::load_chats`]. Empty means "all chats".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChatFilter {
    pub enabled:   Option<bool>,
    pub remote_id: Option<i64>,
}

impl ChatFilter {
    pub fn enabled() -> Self {
        Self { enabled: Some(true), remote_id: None }
    }

    pub fn remote_id(remote_id: i64) -> Self {
        Self { enabled: None, remote_id: Some(remote_id) }
    }

    fn to_sql(self) -> (String, Vec<i64>) {
        let mut clauses = Vec::new();
        let mut args = Vec::new();
        if let Some(enabled) = self.enabled {
            clauses.push("enabled = ?");
            args.push(i64::from(enabled));
        }
        if let Some(remote_id) = self.remote_id {
            clauses.push("remote_id = ?");
            args.push(remote_id);
        }
        let mut sql = format!("SELECT {CHAT_COLUMNS} FROM chats");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id");
        (sql, args)
    }
}

// ─── Store ────────────────────────────────────────────────────────────────────

/// Handle to the local database file. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection, StoreError> {
        Ok(Connection::open(&self.path)?)
    }

    /// Create missing tables and seed any missing setting keys.
    ///
    /// Safe to call on every start; existing values are left alone.
    pub fn setup(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = self.open()?;
        conn.execute_batch(SCHEMA)?;
        let mut stmt = conn.prepare("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")?;
        for (key, value) in DEFAULT_SETTINGS {
            stmt.execute(params![key, value])?;
        }
        tracing::debug!("[tgstash] Store ready at {}", self.path.display());
        Ok(())
    }

    // ── Chats ──────────────────────────────────────────────────────────────

    pub fn load_chats(&self, filter: ChatFilter) -> Result<Vec<ChatRecord>, StoreError> {
        let conn = self.open()?;
        let (sql, args) = filter.to_sql();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), read_chat)?;
        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }

    /// Insert a new chat and return its local id.
    pub fn insert_chat(&self, chat: &ChatDescriptor) -> Result<i64, StoreError> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO chats
                (remote_id, access_hash, display_name, username, storage_name, kind, last_downloaded_id, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                chat.remote_id,
                chat.access_hash,
                chat.display_name,
                chat.username,
                chat.storage_name,
                chat.kind.as_str(),
                chat.last_downloaded_id,
                chat.enabled,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Overwrite the platform-owned columns of one chat.
    pub fn update_remote_fields(&self, local_id: i64, fields: &RemoteFields) -> Result<(), StoreError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE chats SET display_name = ?1, username = ?2, kind = ?3, access_hash = ?4 WHERE id = ?5",
            params![fields.display_name, fields.username, fields.kind.as_str(), fields.access_hash, local_id],
        )?;
        expect_one(changed, local_id)
    }

    /// Write the progress-owned columns of one chat. The cursor only moves up.
    pub fn update_local_fields(&self, local_id: i64, fields: &LocalFields) -> Result<(), StoreError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE chats SET last_downloaded_id = MAX(last_downloaded_id, ?1), enabled = ?2 WHERE id = ?3",
            params![fields.last_downloaded_id, fields.enabled, local_id],
        )?;
        expect_one(changed, local_id)
    }

    /// Raise the cursor of every record for `remote_id` to `cursor`, leaving
    /// all other columns alone. Returns how many records moved.
    pub fn advance_cursor(&self, remote_id: i64, cursor: MessageId) -> Result<usize, StoreError> {
        let conn = self.open()?;
        let moved = conn.execute(
            "UPDATE chats SET last_downloaded_id = ?1 WHERE remote_id = ?2 AND last_downloaded_id < ?1",
            params![cursor, remote_id],
        )?;
        Ok(moved)
    }

    /// Set or clear the on-disk folder override of one chat.
    pub fn set_storage_name(&self, local_id: i64, storage_name: Option<&str>) -> Result<(), StoreError> {
        let conn = self.open()?;
        let changed = conn.execute(
            "UPDATE chats SET storage_name = ?1 WHERE id = ?2",
            params![storage_name, local_id],
        )?;
        expect_one(changed, local_id)
    }

    pub fn delete_chats(&self, local_ids: &[i64]) -> Result<usize, StoreError> {
        if local_ids.is_empty() {
            return Ok(0);
        }
        let conn = self.open()?;
        let placeholders = vec!["?"; local_ids.len()].join(", ");
        let deleted = conn.execute(
            &format!("DELETE FROM chats WHERE id IN ({placeholders})"),
            params_from_iter(local_ids.iter()),
        )?;
        Ok(deleted)
    }

    // ── Settings ───────────────────────────────────────────────────────────

    pub fn load_settings(&self) -> Result<HashMap<String, String>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut settings = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            settings.insert(key, value);
        }
        Ok(settings)
    }

    /// Write every given key/value pair in one transaction.
    pub fn save_settings(&self, settings: &HashMap<String, String>) -> Result<(), StoreError> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO settings (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            for (key, value) in settings {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn read_chat(row: &Row<'_>) -> rusqlite::Result<ChatRecord> {
    let kind: String = row.get(6)?;
    Ok(ChatRecord {
        local_id:           row.get(0)?,
        remote_id:          row.get(1)?,
        access_hash:        row.get(2)?,
        display_name:       row.get(3)?,
        username:           row.get(4)?,
        storage_name:       row.get(5)?,
        kind:               kind.parse::<ChatKind>().ok(),
        last_downloaded_id: row.get(7)?,
        enabled:            row.get(8)?,
    })
}

fn expect_one(changed: usize, local_id: i64) -> Result<(), StoreError> {
    match changed {
        1 => Ok(()),
        0 => Err(StoreError::Corrupt(format!("chat {local_id} does not exist"))),
        n => Err(StoreError::Corrupt(format!("{n} rows share local id {local_id}"))),
    }
}
