//! `SQLite` schema definitions for promptguard.

/// SQL statement to create the state table.
///
/// One row per persisted key; `value` is the key's JSON encoding.
pub const CREATE_STATE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// Upsert one state key.
pub const UPSERT_STATE: &str = r"
INSERT INTO state (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
";

/// Read one state key.
pub const SELECT_STATE: &str = "SELECT value FROM state WHERE key = ?1";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[CREATE_STATE_TABLE, CREATE_METADATA_TABLE];
