//! Library persistence - the store the reconciler searches, adds to and prunes

use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::ScanError;
use crate::models::{MediaEntry, MediaId, MediaKind, NewMediaEntry, ProviderMeta, Root, RootId};

/// Filter for `LibraryStore::search`; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaFilter {
    pub root_id: Option<RootId>,
    pub rel_path: Option<String>,
    pub mtime: Option<i64>,
    pub content_hash: Option<String>,
}

impl MediaFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_path(root_id: RootId, rel_path: impl Into<String>) -> Self {
        Self {
            root_id: Some(root_id),
            rel_path: Some(rel_path.into()),
            ..Default::default()
        }
    }

    pub fn by_hash(hash: impl Into<String>) -> Self {
        Self {
            content_hash: Some(hash.into()),
            ..Default::default()
        }
    }
}

/// Search result: ids in store order plus the entities keyed by id
#[derive(Debug, Clone, Default)]
pub struct SearchResult {
    pub ids: Vec<MediaId>,
    pub entities: HashMap<MediaId, MediaEntry>,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Entries in id order
    pub fn iter(&self) -> impl Iterator<Item = &MediaEntry> {
        self.ids.iter().filter_map(|id| self.entities.get(id))
    }
}

/// Persistence collaborator consumed by the reconciler
pub trait LibraryStore: Send {
    fn search(&self, filter: &MediaFilter) -> Result<SearchResult, ScanError>;

    /// Add an entry; each add is atomic
    fn add(&mut self, entry: &NewMediaEntry) -> Result<MediaId, ScanError>;

    /// Remove a batch of entries atomically
    fn remove(&mut self, ids: &[MediaId]) -> Result<(), ScanError>;

    /// Remove `stale` and add `entry` as one unit; on error neither happens
    fn replace(&mut self, stale: &[MediaId], entry: &NewMediaEntry) -> Result<MediaId, ScanError>;
}

/// Validate a raw identifier returned by the storage engine
pub fn check_id(raw: i64) -> Result<MediaId, ScanError> {
    if raw > 0 {
        Ok(raw)
    } else {
        Err(ScanError::invalid_id(raw))
    }
}

/// SQLite-backed library
pub struct SqliteLibrary {
    conn: Connection,
}

impl SqliteLibrary {
    /// Open or create database
    pub fn open(path: &Path) -> Result<Self, ScanError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self, ScanError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), ScanError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS roots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS media (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                root_id INTEGER NOT NULL,
                rel_path TEXT NOT NULL,
                kind TEXT NOT NULL,
                artist TEXT,
                title TEXT NOT NULL,
                duration REAL NOT NULL CHECK (duration > 0),
                mtime INTEGER NOT NULL,
                content_hash TEXT,
                provider_json TEXT NOT NULL DEFAULT '{}',
                added_at INTEGER NOT NULL,
                UNIQUE (root_id, rel_path)
            );
            CREATE INDEX IF NOT EXISTS idx_media_hash ON media(content_hash);
            ",
        )?;
        Ok(())
    }

    /// Get the id of a root path, registering it on first use
    pub fn ensure_root(&mut self, path: &Path) -> Result<RootId, ScanError> {
        let path_str = path.to_string_lossy().to_string();
        self.conn
            .execute("INSERT OR IGNORE INTO roots (path) VALUES (?1)", params![path_str])?;
        let id: i64 = self
            .conn
            .query_row("SELECT id FROM roots WHERE path = ?1", params![path_str], |row| {
                row.get(0)
            })?;
        check_id(id)
    }

    /// All registered roots
    pub fn roots(&self) -> Result<Vec<Root>, ScanError> {
        let mut stmt = self.conn.prepare("SELECT id, path FROM roots ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Root::new(row.get(0)?, PathBuf::from(row.get::<_, String>(1)?)))
        })?;

        let mut roots = Vec::new();
        for row in rows {
            roots.push(row?);
        }
        Ok(roots)
    }

    /// Get entry count
    pub fn entry_count(&self) -> Result<u64, ScanError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<MediaEntry> {
        let kind_str: String = row.get(3)?;
        let kind = MediaKind::parse(&kind_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Text,
                Box::new(ScanError::persistence(format!("unknown media kind {:?}", kind_str))),
            )
        })?;
        let provider_json: String = row.get(9)?;
        let added_at: i64 = row.get(10)?;

        Ok(MediaEntry {
            id: row.get(0)?,
            root_id: row.get(1)?,
            rel_path: row.get(2)?,
            kind,
            artist: row.get(4)?,
            title: row.get(5)?,
            duration: row.get(6)?,
            mtime: row.get(7)?,
            content_hash: row.get(8)?,
            provider_meta: serde_json::from_str::<ProviderMeta>(&provider_json).unwrap_or_default(),
            added_at: DateTime::<Utc>::from_timestamp(added_at, 0).unwrap_or_default(),
        })
    }
}

impl LibraryStore for SqliteLibrary {
    fn search(&self, filter: &MediaFilter) -> Result<SearchResult, ScanError> {
        let mut sql = String::from(
            "SELECT id, root_id, rel_path, kind, artist, title, duration, mtime, content_hash, provider_json, added_at
             FROM media WHERE 1 = 1",
        );
        let mut values: Vec<Value> = Vec::new();

        if let Some(root_id) = filter.root_id {
            values.push(Value::Integer(root_id));
            sql.push_str(&format!(" AND root_id = ?{}", values.len()));
        }
        if let Some(rel_path) = &filter.rel_path {
            values.push(Value::Text(rel_path.clone()));
            sql.push_str(&format!(" AND rel_path = ?{}", values.len()));
        }
        if let Some(mtime) = filter.mtime {
            values.push(Value::Integer(mtime));
            sql.push_str(&format!(" AND mtime = ?{}", values.len()));
        }
        if let Some(hash) = &filter.content_hash {
            values.push(Value::Text(hash.clone()));
            sql.push_str(&format!(" AND content_hash = ?{}", values.len()));
        }
        sql.push_str(" ORDER BY id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), Self::row_to_entry)?;

        let mut result = SearchResult::default();
        for row in rows {
            let entry = row?;
            result.ids.push(entry.id);
            result.entities.insert(entry.id, entry);
        }
        Ok(result)
    }

    fn add(&mut self, entry: &NewMediaEntry) -> Result<MediaId, ScanError> {
        insert_entry(&self.conn, entry)
    }

    fn remove(&mut self, ids: &[MediaId]) -> Result<(), ScanError> {
        if ids.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction()?;
        delete_entries(&tx, ids)?;
        tx.commit()?;
        Ok(())
    }

    fn replace(&mut self, stale: &[MediaId], entry: &NewMediaEntry) -> Result<MediaId, ScanError> {
        // dropping an uncommitted transaction rolls it back
        let tx = self.conn.transaction()?;
        delete_entries(&tx, stale)?;
        let id = insert_entry(&tx, entry)?;
        tx.commit()?;
        Ok(id)
    }
}

fn insert_entry(conn: &Connection, entry: &NewMediaEntry) -> Result<MediaId, ScanError> {
    if entry.duration.is_nan() || entry.duration <= 0.0 {
        return Err(ScanError::persistence(format!(
            "Refusing entry with duration {} for {}",
            entry.duration, entry.rel_path
        )));
    }

    let provider_json = serde_json::to_string(&entry.provider_meta)?;
    conn.execute(
        "INSERT INTO media
         (root_id, rel_path, kind, artist, title, duration, mtime, content_hash, provider_json, added_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.root_id,
            entry.rel_path,
            entry.kind.as_str(),
            entry.artist,
            entry.title,
            entry.duration,
            entry.mtime,
            entry.content_hash,
            provider_json,
            Utc::now().timestamp(),
        ],
    )?;
    check_id(conn.last_insert_rowid())
}

fn delete_entries(conn: &Connection, ids: &[MediaId]) -> Result<(), ScanError> {
    let mut stmt = conn.prepare("DELETE FROM media WHERE id = ?1")?;
    for id in ids {
        stmt.execute(params![id])?;
    }
    Ok(())
}
