//! SQL query passthrough.
//!
//! Runs a caller-supplied statement against the backend engine and folds
//! the rows into a JSON array or a JSON-lines stream. Each row must reduce
//! to exactly one JSON value; that is the caller's contract, checked only
//! when the row comes back.

use crate::core::error::DocketError;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value as JsonValue;

fn row_value(row: &rusqlite::Row<'_>) -> Result<JsonValue, DocketError> {
    let raw = row
        .get_ref(0)
        .map_err(|e| DocketError::QueryError(e.to_string()))?;
    match raw {
        ValueRef::Text(bytes) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| DocketError::QueryError(format!("non-UTF8 row: {}", e)))?;
            serde_json::from_str(text)
                .map_err(|e| DocketError::QueryError(format!("row is not JSON: {}", e)))
        }
        ValueRef::Integer(n) => Ok(JsonValue::from(n)),
        ValueRef::Real(f) => Ok(JsonValue::from(f)),
        ValueRef::Null => Ok(JsonValue::Null),
        ValueRef::Blob(_) => Err(DocketError::QueryError(
            "row yielded a blob, expected JSON".to_string(),
        )),
    }
}

/// Execute `stmt` with positional string parameters, returning either a
/// JSON array string or newline-delimited JSON, in engine row order.
pub fn run_query(
    conn: &Connection,
    stmt: &str,
    params: &[String],
    jsonl: bool,
) -> Result<String, DocketError> {
    let mut prepared = conn
        .prepare(stmt)
        .map_err(|e| DocketError::QueryError(format!("stmt: {}, {}", stmt, e)))?;
    if prepared.column_count() != 1 {
        return Err(DocketError::QueryError(format!(
            "stmt must yield exactly one JSON value per row, got {} columns",
            prepared.column_count()
        )));
    }
    let mut rows = prepared
        .query(rusqlite::params_from_iter(params.iter()))
        .map_err(|e| DocketError::QueryError(format!("stmt: {}, {}", stmt, e)))?;

    let mut values = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| DocketError::QueryError(e.to_string()))?
    {
        values.push(row_value(row)?);
    }

    if jsonl {
        let mut out = String::new();
        for (i, v) in values.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(
                &serde_json::to_string(v).map_err(|e| DocketError::QueryError(e.to_string()))?,
            );
        }
        Ok(out)
    } else {
        serde_json::to_string(&values).map_err(|e| DocketError::QueryError(e.to_string()))
    }
}
