/// SQL DDL for the venue store.
pub const SCHEMA_VERSION: u32 = 1;

/// `messages` is append-only: rows are inserted, never updated or deleted.
/// AUTOINCREMENT keeps ids strictly increasing so `ORDER BY id` is insertion order.
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
