//! SQL storage backend.
//!
//! Documents are rows in `<table> (_Key, src, created, updated, version)`
//! with every version mirrored into `<table>_history`. The row update and
//! its history insert always run inside one transaction, so a crash never
//! leaves the current row inconsistent with its own history.
//!
//! Execution is SQLite via rusqlite; the postgres and mysql dialects are
//! string-complete in [`crate::core::dialect`] but have no driver wired in,
//! so opening such a DSN reports `Unsupported`.

use crate::core::collection::{Document, StorageEngine};
use crate::core::dialect::{table_name, Dialect};
use crate::core::error::DocketError;
use crate::core::keymap::{normalize_key, validate_key};
use crate::core::time;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::path::Path;

fn db_connect(db_path: &Path) -> Result<Connection, DocketError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(DocketError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(DocketError::RusqliteError)?;
    Ok(conn)
}

pub struct SQLStore {
    dialect: Dialect,
    table: String,
    conn: Connection,
    versioning: bool,
}

impl SQLStore {
    /// Open the SQL store for a collection directory. The DSN remainder
    /// (e.g. `sqlite://collection.db`) is resolved relative to the
    /// collection root.
    pub fn open(work_path: &Path, dsn_uri: &str, versioning: bool) -> Result<SQLStore, DocketError> {
        let (dialect, rest) = Dialect::from_dsn(dsn_uri)?;
        if dialect != Dialect::Sqlite {
            return Err(DocketError::Unsupported(format!(
                "{} engine is not wired into this build",
                dialect.storage_type()
            )));
        }
        let name = work_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let table = table_name(&name)?;
        let conn = db_connect(&work_path.join(rest))?;
        Ok(SQLStore {
            dialect,
            table,
            conn,
            versioning,
        })
    }

    /// Create the primary and history tables for a fresh collection.
    pub fn init(work_path: &Path, dsn_uri: &str) -> Result<(), DocketError> {
        let store = SQLStore::open(work_path, dsn_uri, true)?;
        store
            .conn
            .execute(&store.dialect.create_table(&store.table), [])?;
        store
            .conn
            .execute(&store.dialect.create_history_table(&store.table), [])?;
        Ok(())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The dialect this store's statements are built for.
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn row_to_document(key: &str, row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
        Ok(Document {
            key: key.to_string(),
            // src is deserialized after the rusqlite closure; store raw here.
            src: JsonValue::String(row.get::<_, String>(0)?),
            created: row.get(1)?,
            updated: row.get(2)?,
            version: row.get(3)?,
        })
    }

    fn finish_document(mut doc: Document) -> Result<Document, DocketError> {
        let raw = match &doc.src {
            JsonValue::String(s) => s.clone(),
            _ => String::new(),
        };
        doc.src = serde_json::from_str(&raw).map_err(|e| {
            DocketError::ValidationError(format!("stored src for {} is not JSON: {}", doc.key, e))
        })?;
        Ok(doc)
    }
}

impl StorageEngine for SQLStore {
    fn create(&mut self, key: &str, src: &JsonValue) -> Result<Document, DocketError> {
        let key = normalize_key(key);
        validate_key(&key)?;
        let src_text =
            serde_json::to_string(src).map_err(|e| DocketError::ValidationError(e.to_string()))?;
        let now = time::now_stamp();

        let tx = self.conn.transaction()?;
        let hits: i64 = tx.query_row(&self.dialect.has_key(&self.table), params![key], |row| {
            row.get(0)
        })?;
        if hits > 0 {
            return Err(DocketError::KeyConflict(key));
        }
        tx.execute(
            &self.dialect.insert_row(&self.table),
            params![key, src_text, now, now, 0i64],
        )?;
        if self.versioning {
            tx.execute(
                &self.dialect.insert_history_row(&self.table),
                params![key, src_text, now, now, 0i64],
            )?;
        }
        tx.commit()?;
        Ok(Document {
            key,
            src: src.clone(),
            created: now.clone(),
            updated: now,
            version: 0,
        })
    }

    fn read(&self, key: &str) -> Result<Document, DocketError> {
        let key = normalize_key(key);
        let doc = self
            .conn
            .query_row(&self.dialect.select_row(&self.table), params![key], |row| {
                SQLStore::row_to_document(&key, row)
            })
            .optional()?
            .ok_or_else(|| DocketError::NotFound(key.clone()))?;
        SQLStore::finish_document(doc)
    }

    fn read_version(&self, key: &str, version: i64) -> Result<Document, DocketError> {
        let key = normalize_key(key);
        if !self.versioning {
            let current = self.read(&key)?;
            if current.version == version {
                return Ok(current);
            }
            return Err(DocketError::NotFound(format!("{} version {}", key, version)));
        }
        let doc = self
            .conn
            .query_row(
                &self.dialect.select_history_row(&self.table),
                params![key, version],
                |row| SQLStore::row_to_document(&key, row),
            )
            .optional()?
            .ok_or_else(|| DocketError::NotFound(format!("{} version {}", key, version)))?;
        SQLStore::finish_document(doc)
    }

    fn update(&mut self, key: &str, src: &JsonValue) -> Result<Document, DocketError> {
        let key = normalize_key(key);
        let src_text =
            serde_json::to_string(src).map_err(|e| DocketError::ValidationError(e.to_string()))?;
        let now = time::now_stamp();
        let versioning = self.versioning;

        let tx = self.conn.transaction()?;
        let current: Option<(String, i64)> = tx
            .query_row(&self.dialect.select_row(&self.table), params![key], |row| {
                Ok((row.get::<_, String>(1)?, row.get::<_, i64>(3)?))
            })
            .optional()?;
        let (created, version) = current.ok_or_else(|| DocketError::NotFound(key.clone()))?;
        let new_version = version + 1;
        tx.execute(
            &self.dialect.update_row(&self.table),
            params![src_text, now, new_version, key],
        )?;
        if versioning {
            tx.execute(
                &self.dialect.insert_history_row(&self.table),
                params![key, src_text, created, now, new_version],
            )?;
        }
        tx.commit()?;
        Ok(Document {
            key,
            src: src.clone(),
            created,
            updated: now,
            version: new_version,
        })
    }

    fn delete(&mut self, key: &str) -> Result<(), DocketError> {
        let key = normalize_key(key);
        let n = self
            .conn
            .execute(&self.dialect.delete_row(&self.table), params![key])?;
        if n == 0 {
            return Err(DocketError::NotFound(key));
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, DocketError> {
        let mut stmt = self.conn.prepare(&self.dialect.select_keys(&self.table))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for k in rows {
            keys.push(k?);
        }
        Ok(keys)
    }

    fn has_key(&self, key: &str) -> Result<bool, DocketError> {
        let key = normalize_key(key);
        let hits: i64 =
            self.conn
                .query_row(&self.dialect.has_key(&self.table), params![key], |row| {
                    row.get(0)
                })?;
        Ok(hits > 0)
    }

    fn count(&self) -> Result<u64, DocketError> {
        let n: i64 = self
            .conn
            .query_row(&self.dialect.count_keys(&self.table), [], |row| row.get(0))?;
        Ok(n as u64)
    }

    fn versions(&self, key: &str) -> Result<Vec<i64>, DocketError> {
        let key = normalize_key(key);
        let mut stmt = self
            .conn
            .prepare(&self.dialect.select_versions(&self.table))?;
        let rows = stmt.query_map(params![key], |row| row.get::<_, i64>(0))?;
        let mut versions = Vec::new();
        for v in rows {
            versions.push(v?);
        }
        if versions.is_empty() {
            let current = self.read(&key)?;
            versions.push(current.version);
        }
        Ok(versions)
    }

    fn close(&mut self) -> Result<(), DocketError> {
        Ok(())
    }

    fn connection(&self) -> Option<&Connection> {
        Some(&self.conn)
    }
}
