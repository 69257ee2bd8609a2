//! SQL dialect adapter.
//!
//! All SQL string construction for the document schema lives here, so
//! engine differences (placeholder syntax, JSON column type) never leak
//! into the facade. The schema is the same everywhere: a primary table
//! `(_Key, src, created, updated, version)` and a `<table>_history` twin
//! keyed by `(_Key, version)`.

use crate::core::error::DocketError;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl Dialect {
    /// Split a DSN URI like `sqlite://collection.db` into a dialect and the
    /// engine-specific remainder.
    pub fn from_dsn(dsn_uri: &str) -> Result<(Dialect, String), DocketError> {
        let (scheme, rest) = dsn_uri.split_once("://").ok_or_else(|| {
            DocketError::ValidationError(format!("malformed DSN URI: {:?}", dsn_uri))
        })?;
        let dialect = match scheme {
            "sqlite" => Dialect::Sqlite,
            "postgres" => Dialect::Postgres,
            "mysql" => Dialect::Mysql,
            other => {
                return Err(DocketError::ValidationError(format!(
                    "unknown DSN scheme: {:?}",
                    other
                )))
            }
        };
        Ok((dialect, rest.to_string()))
    }

    pub fn storage_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::Mysql => "mysql",
        }
    }

    fn json_type(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "JSON",
            Dialect::Postgres => "JSONB",
            Dialect::Mysql => "JSON",
        }
    }

    /// Positional placeholder for 1-indexed parameter `n`.
    fn ph(&self, n: usize) -> String {
        match self {
            Dialect::Sqlite => format!("?{}", n),
            Dialect::Postgres => format!("${}", n),
            Dialect::Mysql => "?".to_string(),
        }
    }

    pub fn create_table(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  _Key VARCHAR(255) PRIMARY KEY,\n  src {},\n  created TIMESTAMP,\n  updated TIMESTAMP,\n  version INTEGER\n)",
            table,
            self.json_type()
        )
    }

    pub fn create_history_table(&self, table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {}_history (\n  _Key VARCHAR(255) NOT NULL,\n  src {},\n  created TIMESTAMP,\n  updated TIMESTAMP,\n  version INTEGER NOT NULL,\n  PRIMARY KEY (_Key, version)\n)",
            table,
            self.json_type()
        )
    }

    pub fn insert_row(&self, table: &str) -> String {
        format!(
            "INSERT INTO {} (_Key, src, created, updated, version) VALUES ({}, {}, {}, {}, {})",
            table,
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5)
        )
    }

    /// History rows are upserts: deleting a key retains its history, so a
    /// re-created key writes version 0 over the old snapshot.
    pub fn insert_history_row(&self, table: &str) -> String {
        let values = format!(
            "(_Key, src, created, updated, version) VALUES ({}, {}, {}, {}, {})",
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4),
            self.ph(5)
        );
        match self {
            Dialect::Sqlite => format!("INSERT OR REPLACE INTO {}_history {}", table, values),
            Dialect::Mysql => format!("REPLACE INTO {}_history {}", table, values),
            Dialect::Postgres => format!(
                "INSERT INTO {}_history {} ON CONFLICT (_Key, version) DO UPDATE SET src = EXCLUDED.src, created = EXCLUDED.created, updated = EXCLUDED.updated",
                table, values
            ),
        }
    }

    pub fn update_row(&self, table: &str) -> String {
        format!(
            "UPDATE {} SET src = {}, updated = {}, version = {} WHERE _Key = {}",
            table,
            self.ph(1),
            self.ph(2),
            self.ph(3),
            self.ph(4)
        )
    }

    pub fn select_row(&self, table: &str) -> String {
        format!(
            "SELECT src, created, updated, version FROM {} WHERE _Key = {}",
            table,
            self.ph(1)
        )
    }

    pub fn select_history_row(&self, table: &str) -> String {
        format!(
            "SELECT src, created, updated, version FROM {}_history WHERE _Key = {} AND version = {}",
            table,
            self.ph(1),
            self.ph(2)
        )
    }

    pub fn delete_row(&self, table: &str) -> String {
        format!("DELETE FROM {} WHERE _Key = {}", table, self.ph(1))
    }

    pub fn select_keys(&self, table: &str) -> String {
        format!("SELECT _Key FROM {} ORDER BY _Key", table)
    }

    pub fn has_key(&self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {} WHERE _Key = {}", table, self.ph(1))
    }

    pub fn count_keys(&self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", table)
    }

    pub fn scan_versions(&self, table: &str) -> String {
        format!("SELECT _Key, version FROM {}", table)
    }

    pub fn scan_history_versions(&self, table: &str) -> String {
        format!("SELECT _Key, version FROM {}_history", table)
    }

    pub fn select_versions(&self, table: &str) -> String {
        format!(
            "SELECT version FROM {}_history WHERE _Key = {} ORDER BY version",
            table,
            self.ph(1)
        )
    }
}

/// Derive and validate the table name for a collection, e.g. `data.ds`
/// becomes `data`.
pub fn table_name(collection_name: &str) -> Result<String, DocketError> {
    let base = std::path::Path::new(collection_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
        .map_err(|e| DocketError::ValidationError(e.to_string()))?;
    if !re.is_match(&base) {
        return Err(DocketError::ValidationError(format!(
            "collection name {:?} does not yield a usable table name",
            collection_name
        )));
    }
    Ok(base)
}
