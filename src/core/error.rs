use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocketError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("key conflict: {0}")]
    KeyConflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("query failed: {0}")]
    QueryError(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("collection inconsistent: {0}")]
    Inconsistent(String),
    #[error("unrepairable: {0}")]
    Unrepairable(String),
    #[error("validation error: {0}")]
    ValidationError(String),
}
