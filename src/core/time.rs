//! Shared timestamp helpers for collection and document metadata.

use chrono::{DateTime, Utc};
use std::time::SystemTime;

/// RFC1123 timestamp used in collection.json (e.g. `Tue, 26 Aug 2026 10:04:00 GMT`).
pub fn now_rfc1123() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Document timestamp with microsecond precision. The format sorts
/// lexicographically, which the SQL backend relies on for `ORDER BY created`.
pub fn now_stamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// Render a filesystem mtime in the document timestamp format.
pub fn stamp_from_system_time(t: SystemTime) -> String {
    let dt: DateTime<Utc> = t.into();
    dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc1123_shape() {
        let ts = now_rfc1123();
        assert!(ts.ends_with(" GMT"));
        assert_eq!(ts.matches(',').count(), 1);
    }

    #[test]
    fn test_stamp_orders_lexicographically() {
        let a = now_stamp();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = now_stamp();
        assert!(a < b);
    }

    #[test]
    fn test_stamp_from_system_time() {
        let ts = stamp_from_system_time(SystemTime::UNIX_EPOCH);
        assert!(ts.starts_with("1970-01-01 00:00:00"));
    }
}
