//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding imported title
//! documents, dated title versions, their flattened structures, and computed
//! metric values.
//!
//! **Access rules:**
//! - Drivers and the CLI: read-write via [`Storage::open`]
//! - Inspection commands: read-only via [`Storage::open_readonly`]
//!
//! A single connection is shared by concurrent workers, so every write takes
//! an async write lock first.

mod migrations;

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use regindex_shared::{
    NodeKind, RegIndexError, Result, StructuralNode, StructureRecord, TitleMetrics, TitleRecord,
    TitleVersionRecord,
};
use tokio::sync::Mutex;
use uuid::Uuid;

const VERSION_COLUMNS: &str = "title_number, version_date, content_hash, size_bytes, imported_at";

const STRUCTURE_COLUMNS: &str = "id, title_number, ordinal, div_type, div_level, identifier, \
     node_id, heading, text_content, word_count, parent_id, path, created_at";

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RegIndexError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
            write_lock: Mutex::new(()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RegIndexError::Storage(format!(
                "database not found: {}",
                path.display()
            )));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
            write_lock: Mutex::new(()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        RegIndexError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(RegIndexError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Title operations
    // -----------------------------------------------------------------------

    /// Insert or replace the stored document of a title.
    pub async fn upsert_title(
        &self,
        number: u32,
        content: &str,
        content_hash: &str,
    ) -> Result<TitleRecord> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let now = Utc::now().to_rfc3339();
        let size_bytes = content.len() as u64;
        self.conn
            .execute(
                "INSERT INTO titles (number, content, content_hash, size_bytes, imported_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(number) DO UPDATE SET
                   content = excluded.content,
                   content_hash = excluded.content_hash,
                   size_bytes = excluded.size_bytes,
                   imported_at = excluded.imported_at",
                params![
                    i64::from(number),
                    content,
                    content_hash,
                    size_bytes as i64,
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        Ok(TitleRecord {
            number,
            content_hash: content_hash.to_string(),
            size_bytes,
            imported_at: now,
        })
    }

    /// Get a title's metadata by number.
    pub async fn get_title(&self, number: u32) -> Result<Option<TitleRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT number, content_hash, size_bytes, imported_at FROM titles WHERE number = ?1",
                params![i64::from(number)],
            )
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_title(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(RegIndexError::Storage(e.to_string())),
        }
    }

    /// List all titles ordered by number.
    pub async fn list_titles(&self) -> Result<Vec<TitleRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT number, content_hash, size_bytes, imported_at FROM titles ORDER BY number",
                params![],
            )
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?
        {
            results.push(row_to_title(&row)?);
        }
        Ok(results)
    }

    /// Get the stored document of a title.
    pub async fn get_title_content(&self, number: u32) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT content FROM titles WHERE number = ?1",
                params![i64::from(number)],
            )
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let content: String = row
                    .get(0)
                    .map_err(|e| RegIndexError::Storage(e.to_string()))?;
                Ok(Some(content))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(RegIndexError::Storage(e.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Title version operations
    // -----------------------------------------------------------------------

    /// Insert or replace the document of a title as of `version_date`.
    pub async fn upsert_title_version(
        &self,
        number: u32,
        version_date: &str,
        content: &str,
        content_hash: &str,
    ) -> Result<TitleVersionRecord> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let now = Utc::now().to_rfc3339();
        let size_bytes = content.len() as u64;
        self.conn
            .execute(
                "INSERT INTO title_versions
                   (title_number, version_date, content, content_hash, size_bytes, imported_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(title_number, version_date) DO UPDATE SET
                   content = excluded.content,
                   content_hash = excluded.content_hash,
                   size_bytes = excluded.size_bytes,
                   imported_at = excluded.imported_at",
                params![
                    i64::from(number),
                    version_date,
                    content,
                    content_hash,
                    size_bytes as i64,
                    now.as_str()
                ],
            )
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        Ok(TitleVersionRecord {
            title_number: number,
            version_date: version_date.to_string(),
            content_hash: content_hash.to_string(),
            size_bytes,
            imported_at: now,
        })
    }

    /// Get the metadata of one dated version.
    pub async fn get_title_version(
        &self,
        number: u32,
        version_date: &str,
    ) -> Result<Option<TitleVersionRecord>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM title_versions
             WHERE title_number = ?1 AND version_date = ?2"
        );
        let mut rows = self
            .conn
            .query(&sql, params![i64::from(number), version_date])
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_version(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(RegIndexError::Storage(e.to_string())),
        }
    }

    /// Get the stored document of one dated version.
    pub async fn get_title_version_content(
        &self,
        number: u32,
        version_date: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT content FROM title_versions WHERE title_number = ?1 AND version_date = ?2",
                params![i64::from(number), version_date],
            )
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let content: String = row
                    .get(0)
                    .map_err(|e| RegIndexError::Storage(e.to_string()))?;
                Ok(Some(content))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(RegIndexError::Storage(e.to_string())),
        }
    }

    /// Every stored version of a title, newest first.
    pub async fn list_title_versions(&self, number: u32) -> Result<Vec<TitleVersionRecord>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM title_versions
             WHERE title_number = ?1 ORDER BY version_date DESC"
        );
        let mut rows = self
            .conn
            .query(&sql, params![i64::from(number)])
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?
        {
            results.push(row_to_version(&row)?);
        }
        Ok(results)
    }

    /// Numbers of the titles that have a version on `version_date`, ascending.
    pub async fn list_version_titles(&self, version_date: &str) -> Result<Vec<u32>> {
        let mut rows = self
            .conn
            .query(
                "SELECT title_number FROM title_versions
                 WHERE version_date = ?1 ORDER BY title_number",
                params![version_date],
            )
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?
        {
            results.push(get_u32(&row, 0)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Structure operations
    // -----------------------------------------------------------------------

    /// Replace every structure of a title with `nodes`, in one transaction.
    ///
    /// Nodes must be linked: each `parent` index is mapped to the id assigned
    /// to that node. Returns the assigned ids, aligned with `nodes`.
    pub async fn replace_structures(
        &self,
        title_number: u32,
        nodes: &[StructuralNode],
    ) -> Result<Vec<String>> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let ids: Vec<String> = nodes.iter().map(|_| Uuid::now_v7().to_string()).collect();
        let now = Utc::now().to_rfc3339();

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        match write_structures(&tx, title_number, nodes, &ids, &now).await {
            Ok(()) => tx
                .commit()
                .await
                .map_err(|e| RegIndexError::Storage(e.to_string()))?,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(title = title_number, error = %rollback, "rollback failed");
                }
                return Err(e);
            }
        }

        tracing::debug!(title = title_number, nodes = nodes.len(), "structures replaced");
        Ok(ids)
    }

    /// Delete every structure of a title. Returns the number of rows removed.
    pub async fn delete_structures(&self, title_number: u32) -> Result<u64> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;
        self.conn
            .execute(
                "DELETE FROM structures WHERE title_number = ?1",
                params![i64::from(title_number)],
            )
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))
    }

    /// List a title's structures in document order, with parent indices restored.
    pub async fn list_structures(&self, title_number: u32) -> Result<Vec<StructureRecord>> {
        let sql = format!(
            "SELECT {STRUCTURE_COLUMNS} FROM structures WHERE title_number = ?1 ORDER BY ordinal"
        );
        let mut records = self
            .query_structures(&sql, params![i64::from(title_number)])
            .await?;

        let index_by_id: HashMap<String, usize> = records
            .iter()
            .enumerate()
            .map(|(idx, r)| (r.id.clone(), idx))
            .collect();
        for record in &mut records {
            record.node.parent = record
                .parent_id
                .as_ref()
                .and_then(|id| index_by_id.get(id).copied());
        }
        Ok(records)
    }

    /// Find structures of a given kind, optionally within one title.
    pub async fn find_structures_by_kind(
        &self,
        kind: &NodeKind,
        title_number: Option<u32>,
    ) -> Result<Vec<StructureRecord>> {
        match title_number {
            Some(number) => {
                let sql = format!(
                    "SELECT {STRUCTURE_COLUMNS} FROM structures
                     WHERE div_type = ?1 AND title_number = ?2 ORDER BY ordinal"
                );
                self.query_structures(&sql, params![kind.as_str(), i64::from(number)])
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT {STRUCTURE_COLUMNS} FROM structures
                     WHERE div_type = ?1 ORDER BY title_number, ordinal"
                );
                self.query_structures(&sql, params![kind.as_str()]).await
            }
        }
    }

    /// Find a title's structure by its hierarchical path.
    pub async fn find_structure_by_path(
        &self,
        title_number: u32,
        path: &str,
    ) -> Result<Option<StructureRecord>> {
        let sql = format!(
            "SELECT {STRUCTURE_COLUMNS} FROM structures WHERE title_number = ?1 AND path = ?2"
        );
        let records = self
            .query_structures(&sql, params![i64::from(title_number), path])
            .await?;
        Ok(records.into_iter().next())
    }

    /// Aggregate word, node, and section counts over a title's stored structures.
    pub async fn structure_totals(&self, title_number: u32) -> Result<TitleMetrics> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*),
                        COALESCE(SUM(word_count), 0),
                        COALESCE(SUM(CASE WHEN div_type = ?2 THEN 1 ELSE 0 END), 0)
                 FROM structures WHERE title_number = ?1",
                params![i64::from(title_number), NodeKind::Section.as_str()],
            )
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(TitleMetrics {
                title_number,
                node_count: get_count(&row, 0)?,
                word_count: get_count(&row, 1)?,
                section_count: get_count(&row, 2)?,
            }),
            Ok(None) => Ok(TitleMetrics {
                title_number,
                ..TitleMetrics::default()
            }),
            Err(e) => Err(RegIndexError::Storage(e.to_string())),
        }
    }

    async fn query_structures(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<StructureRecord>> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?
        {
            results.push(row_to_structure(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Computed values
    // -----------------------------------------------------------------------

    /// Store a computed value under `key` (upserts).
    pub async fn upsert_computed_value(&self, key: &str, data: &serde_json::Value) -> Result<()> {
        self.check_writable()?;
        let _guard = self.write_lock.lock().await;

        let data_json = serde_json::to_string(data)
            .map_err(|e| RegIndexError::Storage(format!("encode computed value '{key}': {e}")))?;
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO computed_values (key, data_json, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                   data_json = excluded.data_json,
                   updated_at = excluded.updated_at",
                params![key, data_json.as_str(), now.as_str()],
            )
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Get a computed value by key.
    pub async fn get_computed_value(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut rows = self
            .conn
            .query(
                "SELECT data_json FROM computed_values WHERE key = ?1",
                params![key],
            )
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let data: String = row
                    .get(0)
                    .map_err(|e| RegIndexError::Storage(e.to_string()))?;
                Ok(Some(decode_value(key, &data)?))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(RegIndexError::Storage(e.to_string())),
        }
    }

    /// List computed values whose key starts with `prefix`, ordered by key.
    pub async fn list_computed_values(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, serde_json::Value)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT key, data_json FROM computed_values
                 WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
                params![prefix],
            )
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?;

        let mut results = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| RegIndexError::Storage(e.to_string()))?
        {
            let key: String = row
                .get(0)
                .map_err(|e| RegIndexError::Storage(e.to_string()))?;
            let data: String = row
                .get(1)
                .map_err(|e| RegIndexError::Storage(e.to_string()))?;
            let value = decode_value(&key, &data)?;
            results.push((key, value));
        }
        Ok(results)
    }
}

/// Delete a title's rows and insert `nodes` in pre-order on `conn`.
async fn write_structures(
    conn: &Connection,
    title_number: u32,
    nodes: &[StructuralNode],
    ids: &[String],
    created_at: &str,
) -> Result<()> {
    conn.execute(
        "DELETE FROM structures WHERE title_number = ?1",
        params![i64::from(title_number)],
    )
    .await
    .map_err(|e| RegIndexError::Storage(e.to_string()))?;

    for (ordinal, (node, id)) in nodes.iter().zip(ids).enumerate() {
        let parent_id = node.parent.and_then(|idx| ids.get(idx)).map(String::as_str);
        conn.execute(
            "INSERT INTO structures (id, title_number, ordinal, div_type, div_level, identifier,
                 node_id, heading, text_content, word_count, parent_id, path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                id.as_str(),
                i64::from(title_number),
                ordinal as i64,
                node.kind.as_str(),
                i64::from(node.level),
                node.identifier.as_str(),
                node.node_id.as_deref(),
                node.heading.as_deref(),
                node.text.as_deref(),
                node.word_count as i64,
                parent_id,
                node.path.as_str(),
                created_at,
            ],
        )
        .await
        .map_err(|e| {
            RegIndexError::Storage(format!(
                "insert structure '{}' of title {title_number}: {e}",
                node.path
            ))
        })?;
    }
    Ok(())
}

fn decode_value(key: &str, data: &str) -> Result<serde_json::Value> {
    serde_json::from_str(data)
        .map_err(|e| RegIndexError::Storage(format!("decode computed value '{key}': {e}")))
}

fn get_count(row: &libsql::Row, idx: i32) -> Result<usize> {
    let value: i64 = row
        .get(idx)
        .map_err(|e| RegIndexError::Storage(e.to_string()))?;
    Ok(value.max(0) as usize)
}

fn get_u32(row: &libsql::Row, idx: i32) -> Result<u32> {
    let value: i64 = row
        .get(idx)
        .map_err(|e| RegIndexError::Storage(e.to_string()))?;
    u32::try_from(value)
        .map_err(|_| RegIndexError::Storage(format!("column {idx} out of range: {value}")))
}

/// Convert a database row to a [`TitleRecord`].
fn row_to_title(row: &libsql::Row) -> Result<TitleRecord> {
    Ok(TitleRecord {
        number: get_u32(row, 0)?,
        content_hash: row
            .get::<String>(1)
            .map_err(|e| RegIndexError::Storage(e.to_string()))?,
        size_bytes: get_count(row, 2)? as u64,
        imported_at: row
            .get::<String>(3)
            .map_err(|e| RegIndexError::Storage(e.to_string()))?,
    })
}

/// Convert a database row (in [`VERSION_COLUMNS`] order) to a [`TitleVersionRecord`].
fn row_to_version(row: &libsql::Row) -> Result<TitleVersionRecord> {
    Ok(TitleVersionRecord {
        title_number: get_u32(row, 0)?,
        version_date: row
            .get::<String>(1)
            .map_err(|e| RegIndexError::Storage(e.to_string()))?,
        content_hash: row
            .get::<String>(2)
            .map_err(|e| RegIndexError::Storage(e.to_string()))?,
        size_bytes: get_count(row, 3)? as u64,
        imported_at: row
            .get::<String>(4)
            .map_err(|e| RegIndexError::Storage(e.to_string()))?,
    })
}

/// Convert a database row (in [`STRUCTURE_COLUMNS`] order) to a [`StructureRecord`].
fn row_to_structure(row: &libsql::Row) -> Result<StructureRecord> {
    let level = get_u32(row, 4)?;
    let node = StructuralNode {
        kind: NodeKind::from_attr(
            &row.get::<String>(3)
                .map_err(|e| RegIndexError::Storage(e.to_string()))?,
        ),
        level: u8::try_from(level)
            .map_err(|_| RegIndexError::Storage(format!("invalid div_level: {level}")))?,
        identifier: row
            .get::<String>(5)
            .map_err(|e| RegIndexError::Storage(e.to_string()))?,
        node_id: row.get::<String>(6).ok(),
        heading: row.get::<String>(7).ok(),
        text: row.get::<String>(8).ok(),
        word_count: get_count(row, 9)?,
        path: row
            .get::<String>(11)
            .map_err(|e| RegIndexError::Storage(e.to_string()))?,
        parent: None,
    };

    Ok(StructureRecord {
        id: row
            .get::<String>(0)
            .map_err(|e| RegIndexError::Storage(e.to_string()))?,
        title_number: get_u32(row, 1)?,
        ordinal: get_u32(row, 2)?,
        node,
        parent_id: row.get::<String>(10).ok(),
        created_at: row
            .get::<String>(12)
            .map_err(|e| RegIndexError::Storage(e.to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("regindex_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn node(kind: NodeKind, level: u8, path: &str, words: usize, parent: Option<usize>) -> StructuralNode {
        StructuralNode {
            kind,
            level,
            identifier: path.rsplit('/').next().unwrap_or_default().to_string(),
            node_id: None,
            heading: Some(format!("Heading {path}")),
            text: (words > 0).then(|| vec!["word"; words].join(" ")),
            word_count: words,
            path: path.to_string(),
            parent,
        }
    }

    fn sample_nodes() -> Vec<StructuralNode> {
        vec![
            node(NodeKind::Part, 5, "1", 2, None),
            node(NodeKind::Section, 8, "1/1.1", 3, Some(0)),
            node(NodeKind::Section, 8, "1/1.2", 4, Some(0)),
        ]
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 2);
    }

    #[tokio::test]
    async fn row_read_failure_is_an_error() {
        let storage = test_storage().await;
        let err = storage
            .query_structures("SELECT abs(-9223372036854775807 - 1)", ())
            .await
            .unwrap_err();
        assert!(matches!(err, RegIndexError::Storage(_)));
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("regindex_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn title_upsert_and_query() {
        let storage = test_storage().await;

        let record = storage
            .upsert_title(12, "<DIV1 N=\"12\"/>", "abc123")
            .await
            .expect("upsert title");
        assert_eq!(record.size_bytes, 14);

        let found = storage.get_title(12).await.expect("get title").unwrap();
        assert_eq!(found.content_hash, "abc123");
        assert_eq!(found.size_bytes, 14);

        storage
            .upsert_title(12, "<DIV1 N=\"12\">x</DIV1>", "def456")
            .await
            .expect("upsert again");
        let found = storage.get_title(12).await.unwrap().unwrap();
        assert_eq!(found.content_hash, "def456");

        let content = storage.get_title_content(12).await.unwrap();
        assert_eq!(content.as_deref(), Some("<DIV1 N=\"12\">x</DIV1>"));

        storage.upsert_title(3, "<DIV1/>", "h3").await.unwrap();
        let numbers: Vec<u32> = storage
            .list_titles()
            .await
            .expect("list titles")
            .iter()
            .map(|t| t.number)
            .collect();
        assert_eq!(numbers, vec![3, 12]);

        assert!(storage.get_title(99).await.unwrap().is_none());
        assert!(storage.get_title_content(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn title_versions_are_keyed_by_date() {
        let storage = test_storage().await;

        storage
            .upsert_title_version(7, "2024-01-01", "<DIV1 N=\"7\">old</DIV1>", "h1")
            .await
            .expect("insert version");
        storage
            .upsert_title_version(7, "2025-01-01", "<DIV1 N=\"7\">new text</DIV1>", "h2")
            .await
            .expect("insert version");
        storage
            .upsert_title_version(3, "2025-01-01", "<DIV1/>", "h3")
            .await
            .expect("insert version");

        let replaced = storage
            .upsert_title_version(7, "2024-01-01", "<DIV1 N=\"7\">older</DIV1>", "h4")
            .await
            .expect("replace version");
        assert_eq!(replaced.size_bytes, 24);

        let found = storage
            .get_title_version(7, "2024-01-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.content_hash, "h4");
        assert_eq!(
            storage
                .get_title_version_content(7, "2025-01-01")
                .await
                .unwrap()
                .as_deref(),
            Some("<DIV1 N=\"7\">new text</DIV1>")
        );

        let dates: Vec<String> = storage
            .list_title_versions(7)
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.version_date)
            .collect();
        assert_eq!(dates, vec!["2025-01-01", "2024-01-01"]);

        assert_eq!(
            storage.list_version_titles("2025-01-01").await.unwrap(),
            vec![3, 7]
        );
        assert!(storage.get_title_version(7, "2023-01-01").await.unwrap().is_none());
        assert!(storage.list_titles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_structures_maps_parents() {
        let storage = test_storage().await;
        storage.upsert_title(1, "<x/>", "h").await.unwrap();

        let ids = storage
            .replace_structures(1, &sample_nodes())
            .await
            .expect("replace structures");
        assert_eq!(ids.len(), 3);

        let records = storage.list_structures(1).await.expect("list structures");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, ids[0]);
        assert_eq!(records[0].parent_id, None);
        assert_eq!(records[1].parent_id.as_deref(), Some(ids[0].as_str()));
        assert_eq!(records[2].parent_id.as_deref(), Some(ids[0].as_str()));
        assert_eq!(records[1].node.parent, Some(0));
        assert_eq!(records[2].ordinal, 2);
        assert_eq!(records[1].node.kind, NodeKind::Section);
        assert_eq!(records[1].node.heading.as_deref(), Some("Heading 1/1.1"));
        assert_eq!(records[0].node, sample_nodes()[0]);
    }

    #[tokio::test]
    async fn replace_structures_discards_previous_rows() {
        let storage = test_storage().await;
        storage.upsert_title(1, "<x/>", "h").await.unwrap();
        storage.replace_structures(1, &sample_nodes()).await.unwrap();

        let fewer = vec![node(NodeKind::Part, 5, "2", 1, None)];
        storage.replace_structures(1, &fewer).await.unwrap();

        let records = storage.list_structures(1).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].node.path, "2");
    }

    #[tokio::test]
    async fn failed_replace_keeps_existing_rows() {
        let storage = test_storage().await;
        storage.upsert_title(1, "<x/>", "h").await.unwrap();
        storage.replace_structures(1, &sample_nodes()).await.unwrap();

        let duplicate = vec![
            node(NodeKind::Part, 5, "9", 0, None),
            node(NodeKind::Part, 5, "9", 0, None),
        ];
        let result = storage.replace_structures(1, &duplicate).await;
        assert!(result.is_err());

        let records = storage.list_structures(1).await.unwrap();
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn structure_lookups() {
        let storage = test_storage().await;
        storage.upsert_title(1, "<x/>", "h").await.unwrap();
        storage.upsert_title(2, "<x/>", "h").await.unwrap();
        storage.replace_structures(1, &sample_nodes()).await.unwrap();
        storage
            .replace_structures(2, &[node(NodeKind::Section, 8, "2.1", 5, None)])
            .await
            .unwrap();

        let sections = storage
            .find_structures_by_kind(&NodeKind::Section, None)
            .await
            .expect("find by kind");
        assert_eq!(sections.len(), 3);

        let sections = storage
            .find_structures_by_kind(&NodeKind::Section, Some(1))
            .await
            .unwrap();
        assert_eq!(sections.len(), 2);

        let found = storage
            .find_structure_by_path(1, "1/1.2")
            .await
            .expect("find by path")
            .unwrap();
        assert_eq!(found.node.word_count, 4);
        assert!(storage.find_structure_by_path(2, "1/1.2").await.unwrap().is_none());

        let totals = storage.structure_totals(1).await.expect("totals");
        assert_eq!(totals.word_count, 9);
        assert_eq!(totals.node_count, 3);
        assert_eq!(totals.section_count, 2);

        let removed = storage.delete_structures(1).await.expect("delete");
        assert_eq!(removed, 3);
        let totals = storage.structure_totals(1).await.unwrap();
        assert_eq!(totals.node_count, 0);
        assert_eq!(totals.word_count, 0);
    }

    #[tokio::test]
    async fn computed_values() {
        let storage = test_storage().await;

        assert!(storage.get_computed_value("title-metrics-1").await.unwrap().is_none());

        storage
            .upsert_computed_value("title-metrics-1", &serde_json::json!({"word_count": 3}))
            .await
            .expect("upsert");
        storage
            .upsert_computed_value("title-metrics-2", &serde_json::json!({"word_count": 5}))
            .await
            .unwrap();
        storage
            .upsert_computed_value("global-title-metrics", &serde_json::json!({"titles": 2}))
            .await
            .unwrap();
        storage
            .upsert_computed_value("title-metrics-1", &serde_json::json!({"word_count": 4}))
            .await
            .unwrap();

        let value = storage.get_computed_value("title-metrics-1").await.unwrap().unwrap();
        assert_eq!(value["word_count"], 4);

        let listed = storage.list_computed_values("title-metrics-").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["title-metrics-1", "title-metrics-2"]);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("regindex_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.upsert_title(1, "<x/>", "h").await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_titles().await.unwrap().len(), 1);
        let result = ro.upsert_title(2, "<x/>", "h").await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let tmp = std::env::temp_dir().join(format!("regindex_missing_{}.db", Uuid::now_v7()));
        assert!(Storage::open_readonly(&tmp).await.is_err());
    }
}
