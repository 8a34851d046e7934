use rusqlite::Connection;

use crate::error::StorageError;

pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, unixepoch())",
        [SCHEMA_VERSION],
    )?;
    Ok(())
}

// AUTOINCREMENT keeps deleted entity ids from being handed out again.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS entities (
    entity_id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (CAST(unixepoch('now','subsec') * 1000 AS INTEGER))
);
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities (entity_type, entity_id);

CREATE TABLE IF NOT EXISTS entity_fields (
    entity_id INTEGER NOT NULL REFERENCES entities (entity_id) ON DELETE CASCADE,
    field_key TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (entity_id, field_key)
);

CREATE TABLE IF NOT EXISTS field_definitions (
    definition_id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_type TEXT NOT NULL,
    field_name TEXT NOT NULL,
    field_label TEXT NOT NULL,
    field_type TEXT NOT NULL,
    field_options BLOB,
    display_order INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_system_field INTEGER NOT NULL DEFAULT 0,
    show_in_table INTEGER NOT NULL DEFAULT 1,
    show_in_form INTEGER NOT NULL DEFAULT 1,
    UNIQUE (entity_type, field_name)
);

CREATE TABLE IF NOT EXISTS field_values (
    value_id INTEGER PRIMARY KEY AUTOINCREMENT,
    field_definition_id INTEGER NOT NULL REFERENCES field_definitions (definition_id),
    entity_type TEXT NOT NULL,
    entity_id INTEGER NOT NULL REFERENCES entities (entity_id) ON DELETE CASCADE,
    value BLOB NOT NULL,
    UNIQUE (field_definition_id, entity_id)
);
CREATE INDEX IF NOT EXISTS idx_field_values_entity ON field_values (entity_type, entity_id);
";
