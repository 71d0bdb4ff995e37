//! SQL migration definitions for the regindex database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
        version: 1,
        description: "Initial schema: titles, structures, computed_values",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Raw bulk documents, one per title
CREATE TABLE IF NOT EXISTS titles (
    number       INTEGER PRIMARY KEY,
    content      TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    size_bytes   INTEGER NOT NULL,
    imported_at  TEXT NOT NULL
);

-- Flattened hierarchy nodes
CREATE TABLE IF NOT EXISTS structures (
    id           TEXT PRIMARY KEY,
    title_number INTEGER NOT NULL REFERENCES titles(number) ON DELETE CASCADE,
    ordinal      INTEGER NOT NULL,
    div_type     TEXT NOT NULL,
    div_level    INTEGER NOT NULL,
    identifier   TEXT NOT NULL,
    node_id      TEXT,
    heading      TEXT,
    text_content TEXT,
    word_count   INTEGER NOT NULL DEFAULT 0,
    parent_id    TEXT,
    path         TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE(title_number, path)
);

CREATE INDEX IF NOT EXISTS idx_structures_title ON structures(title_number, ordinal);
CREATE INDEX IF NOT EXISTS idx_structures_div_type ON structures(div_type);
CREATE INDEX IF NOT EXISTS idx_structures_parent ON structures(parent_id);

-- Derived metrics keyed by logical name
CREATE TABLE IF NOT EXISTS computed_values (
    key        TEXT PRIMARY KEY,
    data_json  TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Dated title versions",
            sql: r#"
CREATE TABLE IF NOT EXISTS title_versions (
    title_number INTEGER NOT NULL,
    version_date TEXT NOT NULL,
    content      TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    size_bytes   INTEGER NOT NULL,
    imported_at  TEXT NOT NULL,
    PRIMARY KEY (title_number, version_date)
);

CREATE INDEX IF NOT EXISTS idx_title_versions_date ON title_versions(version_date);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
